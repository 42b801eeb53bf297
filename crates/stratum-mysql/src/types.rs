//! MySQL type system and type conversion.
//!
//! This module provides:
//! - MySQL field type constants and column flags
//! - Decoding between the MySQL wire formats and `Value`
//! - Civil-calendar conversions used by the temporal encodings
//!
//! The encoding differs between text protocol (all values are strings)
//! and binary protocol (type-specific binary encoding).

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::PacketReader;
use stratum_core::Value;

/// MySQL field type codes.
///
/// These are the `MYSQL_TYPE_*` constants from the MySQL C API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    /// DECIMAL (MYSQL_TYPE_DECIMAL)
    Decimal = 0x00,
    /// TINYINT (MYSQL_TYPE_TINY)
    Tiny = 0x01,
    /// SMALLINT (MYSQL_TYPE_SHORT)
    Short = 0x02,
    /// INT (MYSQL_TYPE_LONG)
    Long = 0x03,
    /// FLOAT (MYSQL_TYPE_FLOAT)
    Float = 0x04,
    /// DOUBLE (MYSQL_TYPE_DOUBLE)
    Double = 0x05,
    /// NULL (MYSQL_TYPE_NULL)
    Null = 0x06,
    /// TIMESTAMP (MYSQL_TYPE_TIMESTAMP)
    Timestamp = 0x07,
    /// BIGINT (MYSQL_TYPE_LONGLONG)
    LongLong = 0x08,
    /// MEDIUMINT (MYSQL_TYPE_INT24)
    Int24 = 0x09,
    /// DATE (MYSQL_TYPE_DATE)
    Date = 0x0A,
    /// TIME (MYSQL_TYPE_TIME)
    Time = 0x0B,
    /// DATETIME (MYSQL_TYPE_DATETIME)
    DateTime = 0x0C,
    /// YEAR (MYSQL_TYPE_YEAR)
    Year = 0x0D,
    /// VARCHAR (MYSQL_TYPE_VARCHAR)
    VarChar = 0x0F,
    /// BIT (MYSQL_TYPE_BIT)
    Bit = 0x10,
    /// JSON (MYSQL_TYPE_JSON) - MySQL 5.7.8+
    Json = 0xF5,
    /// NEWDECIMAL (MYSQL_TYPE_NEWDECIMAL)
    NewDecimal = 0xF6,
    /// ENUM (MYSQL_TYPE_ENUM)
    Enum = 0xF7,
    /// SET (MYSQL_TYPE_SET)
    Set = 0xF8,
    /// TINYBLOB (MYSQL_TYPE_TINY_BLOB)
    TinyBlob = 0xF9,
    /// MEDIUMBLOB (MYSQL_TYPE_MEDIUM_BLOB)
    MediumBlob = 0xFA,
    /// LONGBLOB (MYSQL_TYPE_LONG_BLOB)
    LongBlob = 0xFB,
    /// BLOB (MYSQL_TYPE_BLOB)
    Blob = 0xFC,
    /// VARCHAR (MYSQL_TYPE_VAR_STRING)
    VarString = 0xFD,
    /// CHAR (MYSQL_TYPE_STRING)
    String = 0xFE,
    /// GEOMETRY (MYSQL_TYPE_GEOMETRY)
    Geometry = 0xFF,
}

impl FieldType {
    /// Parse a field type from a byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B => FieldType::Time,
            0x0C => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFE => FieldType::String,
            0xFF => FieldType::Geometry,
            // Unknown types treated as string
            _ => FieldType::String,
        }
    }

    /// Check if this is an integer type.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            FieldType::Tiny
                | FieldType::Short
                | FieldType::Long
                | FieldType::LongLong
                | FieldType::Int24
                | FieldType::Year
        )
    }

    /// Check if this is a binary/blob type.
    #[must_use]
    pub const fn is_blob(self) -> bool {
        matches!(
            self,
            FieldType::TinyBlob
                | FieldType::MediumBlob
                | FieldType::LongBlob
                | FieldType::Blob
                | FieldType::Geometry
        )
    }

    /// Check if this is a date/time type.
    #[must_use]
    pub const fn is_temporal(self) -> bool {
        matches!(
            self,
            FieldType::Date | FieldType::Time | FieldType::DateTime | FieldType::Timestamp
        )
    }
}

/// Column flags in result set metadata.
#[allow(dead_code)]
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNIQUE_KEY: u16 = 4;
    pub const MULTIPLE_KEY: u16 = 8;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const ZEROFILL: u16 = 64;
    pub const BINARY: u16 = 128;
    pub const ENUM: u16 = 256;
    pub const AUTO_INCREMENT: u16 = 512;
    pub const TIMESTAMP: u16 = 1024;
    pub const SET: u16 = 2048;
    pub const NO_DEFAULT_VALUE: u16 = 4096;
    pub const ON_UPDATE_NOW: u16 = 8192;
    pub const NUM: u16 = 32768;
}

/// Column definition from a result set or prepare response.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    /// Schema (database) name
    pub schema: String,
    /// Table name (or alias)
    pub table: String,
    /// Column name (or alias)
    pub name: String,
    /// Original column name
    pub org_name: String,
    /// Character set number
    pub charset: u16,
    /// Column length
    pub column_length: u32,
    /// Column type
    pub column_type: FieldType,
    /// Column flags
    pub flags: u16,
    /// Number of decimals
    pub decimals: u8,
}

impl ColumnDef {
    /// Check if the column is unsigned.
    #[must_use]
    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    /// Check if the column is binary.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        self.flags & column_flags::BINARY != 0
    }

    /// Check if the column is NOT NULL.
    #[must_use]
    pub const fn is_not_null(&self) -> bool {
        self.flags & column_flags::NOT_NULL != 0
    }

    /// Check if the column is auto-increment.
    #[must_use]
    pub const fn is_auto_increment(&self) -> bool {
        self.flags & column_flags::AUTO_INCREMENT != 0
    }
}

/// Decode a text protocol value to a `Value`.
///
/// In text protocol, all values are transmitted as strings.
pub fn decode_text_value(field_type: FieldType, data: &[u8], is_unsigned: bool) -> Value {
    let text = String::from_utf8_lossy(data);

    match field_type {
        FieldType::Tiny => {
            if is_unsigned {
                text.parse::<u8>().map_or_else(
                    |_| Value::Text(text.into_owned()),
                    |v| Value::TinyInt(v as i8),
                )
            } else {
                text.parse::<i8>()
                    .map_or_else(|_| Value::Text(text.into_owned()), Value::TinyInt)
            }
        }
        FieldType::Short | FieldType::Year => {
            if is_unsigned {
                text.parse::<u16>().map_or_else(
                    |_| Value::Text(text.into_owned()),
                    |v| Value::SmallInt(v as i16),
                )
            } else {
                text.parse::<i16>()
                    .map_or_else(|_| Value::Text(text.into_owned()), Value::SmallInt)
            }
        }
        FieldType::Long | FieldType::Int24 => {
            if is_unsigned {
                text.parse::<u32>()
                    .map_or_else(|_| Value::Text(text.into_owned()), |v| Value::Int(v as i32))
            } else {
                text.parse::<i32>()
                    .map_or_else(|_| Value::Text(text.into_owned()), Value::Int)
            }
        }
        FieldType::LongLong => {
            if is_unsigned {
                text.parse::<u64>().map_or_else(
                    |_| Value::Text(text.into_owned()),
                    |v| Value::BigInt(v as i64),
                )
            } else {
                text.parse::<i64>()
                    .map_or_else(|_| Value::Text(text.into_owned()), Value::BigInt)
            }
        }

        FieldType::Float => text
            .parse::<f32>()
            .map_or_else(|_| Value::Text(text.into_owned()), Value::Float),

        FieldType::Double => text
            .parse::<f64>()
            .map_or_else(|_| Value::Text(text.into_owned()), Value::Double),

        // Keep decimals as text to preserve precision
        FieldType::Decimal | FieldType::NewDecimal => Value::Decimal(text.into_owned()),

        FieldType::TinyBlob
        | FieldType::MediumBlob
        | FieldType::LongBlob
        | FieldType::Blob
        | FieldType::Geometry
        | FieldType::Bit => Value::Bytes(data.to_vec()),

        FieldType::Json => {
            serde_json::from_str(&text).map_or_else(|_| Value::Text(text.into_owned()), Value::Json)
        }

        FieldType::Null => Value::Null,

        FieldType::Date => {
            parse_date_text(&text).map_or_else(|| Value::Text(text.into_owned()), Value::Date)
        }
        FieldType::Time => {
            parse_time_text(&text).map_or_else(|| Value::Text(text.into_owned()), Value::Time)
        }
        FieldType::DateTime | FieldType::Timestamp => parse_datetime_text(&text)
            .map_or_else(|| Value::Text(text.into_owned()), Value::Timestamp),

        _ => Value::Text(text.into_owned()),
    }
}

/// Read one binary-protocol value from a row buffer.
///
/// Consumes exactly the bytes the type occupies: fixed width for numbers,
/// length-encoded for strings/blobs, a length byte plus components for
/// temporal types. Returns `None` when the buffer is truncated.
pub fn read_binary_value(
    reader: &mut PacketReader<'_>,
    field_type: FieldType,
    is_unsigned: bool,
) -> Option<Value> {
    match field_type {
        FieldType::Tiny => {
            let v = reader.read_u8()?;
            // Signed and unsigned both map to i8; interpretation is
            // application-level (matches the text path)
            let _ = is_unsigned;
            Some(Value::TinyInt(v as i8))
        }
        FieldType::Short | FieldType::Year => {
            let v = reader.read_u16_le()?;
            Some(Value::SmallInt(v as i16))
        }
        FieldType::Long | FieldType::Int24 => {
            let v = reader.read_u32_le()?;
            Some(Value::Int(v as i32))
        }
        FieldType::LongLong => {
            let v = reader.read_u64_le()?;
            Some(Value::BigInt(v as i64))
        }
        FieldType::Float => {
            let bytes = reader.read_bytes(4)?;
            Some(Value::Float(f32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ])))
        }
        FieldType::Double => {
            let bytes = reader.read_bytes(8)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            Some(Value::Double(f64::from_le_bytes(buf)))
        }
        FieldType::Decimal | FieldType::NewDecimal => {
            let bytes = reader.read_lenenc_bytes()?;
            Some(Value::Decimal(String::from_utf8_lossy(bytes).into_owned()))
        }
        FieldType::Json => {
            let bytes = reader.read_lenenc_bytes()?;
            let text = String::from_utf8_lossy(bytes);
            Some(
                serde_json::from_str(&text)
                    .map_or_else(|_| Value::Text(text.into_owned()), Value::Json),
            )
        }
        FieldType::TinyBlob
        | FieldType::MediumBlob
        | FieldType::LongBlob
        | FieldType::Blob
        | FieldType::Geometry
        | FieldType::Bit => {
            let bytes = reader.read_lenenc_bytes()?;
            Some(Value::Bytes(bytes.to_vec()))
        }
        FieldType::Date => {
            let len = reader.read_u8()? as usize;
            let data = reader.read_bytes(len)?;
            Some(decode_binary_date(data))
        }
        FieldType::Time => {
            let len = reader.read_u8()? as usize;
            let data = reader.read_bytes(len)?;
            Some(decode_binary_time(data))
        }
        FieldType::DateTime | FieldType::Timestamp => {
            let len = reader.read_u8()? as usize;
            let data = reader.read_bytes(len)?;
            Some(decode_binary_datetime(data))
        }
        FieldType::Null => Some(Value::Null),
        _ => {
            let bytes = reader.read_lenenc_bytes()?;
            Some(Value::Text(String::from_utf8_lossy(bytes).into_owned()))
        }
    }
}

fn decode_binary_date(data: &[u8]) -> Value {
    if data.len() < 4 {
        // Zero date
        return Value::Date(0);
    }
    let year = i32::from(u16::from_le_bytes([data[0], data[1]]));
    let month = i32::from(data[2]);
    let day = i32::from(data[3]);
    Value::Date(ymd_to_days(year, month, day))
}

fn decode_binary_time(data: &[u8]) -> Value {
    if data.len() < 8 {
        return Value::Time(0);
    }
    let negative = data[0] != 0;
    let days = i64::from(u32::from_le_bytes([data[1], data[2], data[3], data[4]]));
    let hours = i64::from(data[5]);
    let minutes = i64::from(data[6]);
    let seconds = i64::from(data[7]);
    let micros = if data.len() >= 12 {
        i64::from(u32::from_le_bytes([data[8], data[9], data[10], data[11]]))
    } else {
        0
    };
    let total =
        (((days * 24 + hours) * 60 + minutes) * 60 + seconds) * 1_000_000 + micros;
    Value::Time(if negative { -total } else { total })
}

fn decode_binary_datetime(data: &[u8]) -> Value {
    if data.len() < 4 {
        return Value::Timestamp(0);
    }
    let year = i32::from(u16::from_le_bytes([data[0], data[1]]));
    let month = i32::from(data[2]);
    let day = i32::from(data[3]);
    let (hour, minute, second) = if data.len() >= 7 {
        (i64::from(data[4]), i64::from(data[5]), i64::from(data[6]))
    } else {
        (0, 0, 0)
    };
    let micros = if data.len() >= 11 {
        i64::from(u32::from_le_bytes([data[7], data[8], data[9], data[10]]))
    } else {
        0
    };
    let days = i64::from(ymd_to_days(year, month, day));
    Value::Timestamp(((days * 86_400 + hour * 3600 + minute * 60 + second) * 1_000_000) + micros)
}

/// Convert days since Unix epoch to (year, month, day).
///
/// Uses the civil calendar algorithm from Howard Hinnant.
/// Unix epoch is 1970-01-01 (day 0).
pub fn days_to_ymd(days: i32) -> (i32, i32, i32) {
    // Shift epoch from 1970-01-01 to 0000-03-01 (simplifies leap year handling)
    let z = days + 719_468;

    let era = if z >= 0 { z / 146_097 } else { (z - 146_096) / 146_097 };
    let doe = (z - era * 146_097) as u32; // day of era [0, 146096]
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365; // year of era [0, 399]
    let y = yoe as i32 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100); // day of year [0, 365]
    let mp = (5 * doy + 2) / 153; // month in [0, 11] starting from March
    let d = doy - (153 * mp + 2) / 5 + 1; // day [1, 31]
    let m = if mp < 10 { mp + 3 } else { mp - 9 }; // month [1, 12]

    let year = if m <= 2 { y + 1 } else { y };

    (year, m as i32, d as i32)
}

/// Convert (year, month, day) to days since Unix epoch.
///
/// Inverse of [`days_to_ymd`], same civil-calendar derivation.
pub fn ymd_to_days(year: i32, month: i32, day: i32) -> i32 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y / 400 } else { (y - 399) / 400 };
    let yoe = (y - era * 400) as u32; // [0, 399]
    let mp = (if month > 2 { month - 3 } else { month + 9 }) as u32;
    let doy = (153 * mp + 2) / 5 + day as u32 - 1; // [0, 365]
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy; // [0, 146096]
    era * 146_097 + doe as i32 - 719_468
}

/// Split a timestamp (microseconds since epoch) into date and time parts.
pub fn timestamp_parts(micros: i64) -> (i32, i32, i32, u8, u8, u8, u32) {
    let total_seconds = micros.div_euclid(1_000_000);
    let microseconds = micros.rem_euclid(1_000_000) as u32;

    let days = total_seconds.div_euclid(86_400) as i32;
    let time_of_day = total_seconds.rem_euclid(86_400);

    let (year, month, day) = days_to_ymd(days);
    let hour = (time_of_day / 3600) as u8;
    let minute = ((time_of_day % 3600) / 60) as u8;
    let second = (time_of_day % 60) as u8;

    (year, month, day, hour, minute, second, microseconds)
}

/// Split a time duration (microseconds) into sign, days, and components.
pub fn time_parts(micros: i64) -> (bool, u32, u8, u8, u8, u32) {
    let negative = micros < 0;
    let abs = micros.unsigned_abs();

    let total_seconds = abs / 1_000_000;
    let microseconds = (abs % 1_000_000) as u32;

    let hours = total_seconds / 3600;
    let minutes = ((total_seconds % 3600) / 60) as u8;
    let seconds = (total_seconds % 60) as u8;

    let days = (hours / 24) as u32;
    let hours = (hours % 24) as u8;

    (negative, days, hours, minutes, seconds, microseconds)
}

fn parse_date_text(text: &str) -> Option<i32> {
    let mut parts = text.splitn(3, '-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: i32 = parts.next()?.parse().ok()?;
    let day: i32 = parts.next()?.parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some(ymd_to_days(year, month, day))
}

fn parse_time_text(text: &str) -> Option<i64> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (clock, frac) = match body.split_once('.') {
        Some((c, f)) => (c, Some(f)),
        None => (body, None),
    };
    let mut parts = clock.splitn(3, ':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds: i64 = parts.next().unwrap_or("0").parse().ok()?;
    let micros = frac.map_or(Some(0), parse_fraction_micros)?;
    let total = (hours * 3600 + minutes * 60 + seconds) * 1_000_000 + micros;
    Some(if negative { -total } else { total })
}

fn parse_datetime_text(text: &str) -> Option<i64> {
    let (date, time) = text.split_once([' ', 'T'])?;
    let days = i64::from(parse_date_text(date)?);
    let time_micros = parse_time_text(time)?;
    Some(days * 86_400 * 1_000_000 + time_micros)
}

fn parse_fraction_micros(frac: &str) -> Option<i64> {
    if frac.is_empty() || frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: i64 = frac.parse().ok()?;
    Some(value * 10_i64.pow(6 - frac.len() as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_from_u8() {
        assert_eq!(FieldType::from_u8(0x01), FieldType::Tiny);
        assert_eq!(FieldType::from_u8(0x03), FieldType::Long);
        assert_eq!(FieldType::from_u8(0x08), FieldType::LongLong);
        assert_eq!(FieldType::from_u8(0xFC), FieldType::Blob);
        assert_eq!(FieldType::from_u8(0xF5), FieldType::Json);
    }

    #[test]
    fn test_field_type_categories() {
        assert!(FieldType::Tiny.is_integer());
        assert!(FieldType::LongLong.is_integer());
        assert!(FieldType::Blob.is_blob());
        assert!(FieldType::Date.is_temporal());
        assert!(FieldType::Timestamp.is_temporal());
        assert!(!FieldType::VarString.is_temporal());
    }

    #[test]
    fn test_decode_text_integers() {
        let val = decode_text_value(FieldType::Long, b"42", false);
        assert!(matches!(val, Value::Int(42)));

        let val = decode_text_value(FieldType::LongLong, b"-100", false);
        assert!(matches!(val, Value::BigInt(-100)));

        let val = decode_text_value(FieldType::Tiny, b"255", true);
        assert!(matches!(val, Value::TinyInt(-1)));
    }

    #[test]
    fn test_decode_text_temporal() {
        let val = decode_text_value(FieldType::Date, b"1970-01-02", false);
        assert_eq!(val, Value::Date(1));

        let val = decode_text_value(FieldType::Time, b"01:00:00", false);
        assert_eq!(val, Value::Time(3600 * 1_000_000));

        let val = decode_text_value(FieldType::Time, b"-00:00:01.5", false);
        assert_eq!(val, Value::Time(-1_500_000));

        let val = decode_text_value(FieldType::DateTime, b"1970-01-01 00:00:01", false);
        assert_eq!(val, Value::Timestamp(1_000_000));
    }

    #[test]
    fn test_decode_text_decimal_preserves_text() {
        let val = decode_text_value(FieldType::NewDecimal, b"12.3400", false);
        assert_eq!(val, Value::Decimal("12.3400".to_string()));
    }

    #[test]
    fn test_read_binary_fixed_width() {
        let data = [0x2A, 0x00, 0x00, 0x00];
        let mut reader = PacketReader::new(&data);
        let val = read_binary_value(&mut reader, FieldType::Long, false).unwrap();
        assert_eq!(val, Value::Int(42));

        let pi = 3.5_f64.to_le_bytes();
        let mut reader = PacketReader::new(&pi);
        let val = read_binary_value(&mut reader, FieldType::Double, false).unwrap();
        assert_eq!(val, Value::Double(3.5));
    }

    #[test]
    fn test_read_binary_string_and_blob() {
        let data = [0x05, b'h', b'e', b'l', b'l', b'o', 0x01, 0xAB];
        let mut reader = PacketReader::new(&data);
        let val = read_binary_value(&mut reader, FieldType::VarString, false).unwrap();
        assert_eq!(val, Value::Text("hello".to_string()));
        let val = read_binary_value(&mut reader, FieldType::Blob, false).unwrap();
        assert_eq!(val, Value::Bytes(vec![0xAB]));
    }

    #[test]
    fn test_read_binary_date() {
        // 2024-01-31 as length-4 binary date
        let data = [4, 0xE8, 0x07, 1, 31];
        let mut reader = PacketReader::new(&data);
        let val = read_binary_value(&mut reader, FieldType::Date, false).unwrap();
        assert_eq!(val, Value::Date(ymd_to_days(2024, 1, 31)));
    }

    #[test]
    fn test_read_binary_datetime_with_micros() {
        // 1970-01-01 00:00:01.000002
        let data = [11, 0xB2, 0x07, 1, 1, 0, 0, 1, 2, 0, 0, 0];
        let mut reader = PacketReader::new(&data);
        let val = read_binary_value(&mut reader, FieldType::DateTime, false).unwrap();
        assert_eq!(val, Value::Timestamp(1_000_002));
    }

    #[test]
    fn test_read_binary_time_negative() {
        // -25:00:00 => neg=1, days=1, hours=1
        let data = [8, 1, 1, 0, 0, 0, 1, 0, 0];
        let mut reader = PacketReader::new(&data);
        let val = read_binary_value(&mut reader, FieldType::Time, false).unwrap();
        assert_eq!(val, Value::Time(-(25 * 3600) * 1_000_000));
    }

    #[test]
    fn test_days_ymd_roundtrip() {
        assert_eq!(days_to_ymd(0), (1970, 1, 1));
        assert_eq!(days_to_ymd(10957), (2000, 1, 1));
        assert_eq!(days_to_ymd(19782), (2024, 2, 29));

        for days in [-719_468, -1, 0, 1, 10957, 19782, 100_000] {
            let (y, m, d) = days_to_ymd(days);
            assert_eq!(ymd_to_days(y, m, d), days);
        }
    }

    #[test]
    fn test_timestamp_parts() {
        let (y, m, d, h, mi, s, us) = timestamp_parts(1_000_002);
        assert_eq!((y, m, d), (1970, 1, 1));
        assert_eq!((h, mi, s, us), (0, 0, 1, 2));

        // Negative timestamps land in 1969
        let (y, m, d, h, mi, s, _) = timestamp_parts(-1_000_000);
        assert_eq!((y, m, d), (1969, 12, 31));
        assert_eq!((h, mi, s), (23, 59, 59));
    }

    #[test]
    fn test_time_parts_over_24h() {
        let (neg, days, h, m, s, us) = time_parts((26 * 3600 + 61) * 1_000_000 + 7);
        assert!(!neg);
        assert_eq!(days, 1);
        assert_eq!((h, m, s), (2, 1, 1));
        assert_eq!(us, 7);
    }

    #[test]
    fn test_column_flags() {
        let col = ColumnDef {
            schema: "test".to_string(),
            table: "users".to_string(),
            name: "id".to_string(),
            org_name: "id".to_string(),
            charset: 33,
            column_length: 11,
            column_type: FieldType::Long,
            flags: column_flags::NOT_NULL
                | column_flags::AUTO_INCREMENT
                | column_flags::UNSIGNED,
            decimals: 0,
        };

        assert!(col.is_not_null());
        assert!(col.is_auto_increment());
        assert!(col.is_unsigned());
        assert!(!col.is_binary());
    }
}
