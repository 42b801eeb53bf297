//! MySQL prepared statement (binary protocol) packet encoding.
//!
//! This module builds the COM_STMT_PREPARE, COM_STMT_EXECUTE,
//! COM_STMT_SEND_LONG_DATA, COM_STMT_RESET, and COM_STMT_CLOSE packets and
//! parses the COM_STMT_PREPARE_OK response.
//!
//! # Protocol Flow
//!
//! 1. **Prepare**: Client sends COM_STMT_PREPARE with SQL
//!    - Server returns statement ID, param count, column count
//!    - Server sends param column definitions (if any)
//!    - Server sends result column definitions (if any)
//!
//! 2. **Long data** (streamed parameters): Client sends zero or more
//!    COM_STMT_SEND_LONG_DATA packets, each tagged with statement ID and
//!    parameter index. No server response.
//!
//! 3. **Execute**: Client sends COM_STMT_EXECUTE with statement ID, NULL
//!    bitmap, optional type vector, and inline binary values
//!    - Server returns result set (binary protocol) or OK packet
//!
//! 4. **Close**: Client sends COM_STMT_CLOSE with statement ID
//!    - No server response
//!
//! # References
//!
//! - [COM_STMT_PREPARE](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_stmt_prepare.html)
//! - [COM_STMT_EXECUTE](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_stmt_execute.html)

#![allow(clippy::cast_possible_truncation)]

use super::{Command, PacketWriter};
use crate::types::{FieldType, time_parts, timestamp_parts};
use stratum_core::Value;

/// Response from COM_STMT_PREPARE.
#[derive(Debug, Clone)]
pub struct StmtPrepareOk {
    /// Unique statement identifier (used in execute/close)
    pub statement_id: u32,
    /// Number of columns in result set (0 for non-SELECT)
    pub num_columns: u16,
    /// Number of parameters (placeholders) in the SQL
    pub num_params: u16,
    /// Number of warnings generated during prepare
    pub warnings: u16,
}

/// One parameter as seen by the COM_STMT_EXECUTE encoder.
///
/// Long-data parameters contribute to the type vector but their value
/// bytes were already shipped via COM_STMT_SEND_LONG_DATA, so the value
/// section skips them.
#[derive(Debug)]
pub enum BinaryParam<'a> {
    /// NULL parameter; occupies a NULL-bitmap bit and a type slot
    Null {
        /// Declared type for the type vector
        field_type: FieldType,
    },
    /// Inline binary value
    Value {
        /// The bound value
        value: &'a Value,
        /// Declared type for the type vector
        field_type: FieldType,
    },
    /// Parameter whose data was streamed via COM_STMT_SEND_LONG_DATA
    LongData {
        /// Declared type for the type vector
        field_type: FieldType,
    },
}

impl BinaryParam<'_> {
    /// The declared type sent in the type vector.
    pub fn field_type(&self) -> FieldType {
        match self {
            BinaryParam::Null { field_type }
            | BinaryParam::Value { field_type, .. }
            | BinaryParam::LongData { field_type } => *field_type,
        }
    }

    fn is_null(&self) -> bool {
        matches!(self, BinaryParam::Null { .. })
    }
}

/// Build a COM_STMT_PREPARE packet.
pub fn build_stmt_prepare_packet(sql: &[u8], sequence_id: u8) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(1 + sql.len());
    writer.write_u8(Command::StmtPrepare as u8);
    writer.write_bytes(sql);
    writer.build_packet(sequence_id)
}

/// Build a COM_STMT_EXECUTE packet.
///
/// # Packet layout
///
/// - Command byte (0x17)
/// - Statement ID (4 bytes, little-endian)
/// - Flags (1 byte): 0x00 = CURSOR_TYPE_NO_CURSOR
/// - Iteration count (4 bytes, always 1)
/// - NULL bitmap, `(num_params + 7) / 8` bytes (if num_params > 0)
/// - Types-follow flag (1 byte)
/// - Parameter types, 2 bytes each (if types-follow = 1)
/// - Inline values for non-NULL, non-long-data parameters
///
/// The server caches parameter types between executions; `send_types`
/// retransmits the vector and must be set on the first execution and
/// whenever a bound type changed.
pub fn build_stmt_execute_packet(
    statement_id: u32,
    params: &[BinaryParam<'_>],
    send_types: bool,
    sequence_id: u8,
) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(64 + params.len() * 16);

    writer.write_u8(Command::StmtExecute as u8);
    writer.write_u32_le(statement_id);

    // Flags: CURSOR_TYPE_NO_CURSOR
    writer.write_u8(0x00);

    // Iteration count: always 1
    writer.write_u32_le(1);

    if !params.is_empty() {
        let null_bitmap_len = params.len().div_ceil(8);
        let mut null_bitmap = vec![0u8; null_bitmap_len];

        for (i, param) in params.iter().enumerate() {
            if param.is_null() {
                null_bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        writer.write_bytes(&null_bitmap);

        writer.write_u8(u8::from(send_types));

        if send_types {
            for param in params {
                writer.write_u8(param.field_type() as u8);
                // Flags byte: 0x00 signed, 0x80 unsigned. Values are bound
                // from signed Rust types, so always signed here.
                writer.write_u8(0x00);
            }
        }

        for param in params {
            if let BinaryParam::Value { value, field_type } = param {
                encode_binary_value(&mut writer, value, *field_type);
            }
        }
    }

    writer.build_packet(sequence_id)
}

/// Build a COM_STMT_SEND_LONG_DATA packet for one chunk.
///
/// No server response is sent. An empty chunk is valid and is how an empty
/// stream marks its parameter as bound.
pub fn build_long_data_packet(
    statement_id: u32,
    param_index: u16,
    chunk: &[u8],
    sequence_id: u8,
) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(7 + chunk.len());
    writer.write_u8(Command::StmtSendLongData as u8);
    writer.write_u32_le(statement_id);
    writer.write_u16_le(param_index);
    writer.write_bytes(chunk);
    writer.build_packet(sequence_id)
}

/// Build a COM_STMT_CLOSE packet. The server does not respond.
pub fn build_stmt_close_packet(statement_id: u32, sequence_id: u8) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(5);
    writer.write_u8(Command::StmtClose as u8);
    writer.write_u32_le(statement_id);
    writer.build_packet(sequence_id)
}

/// Build a COM_STMT_RESET packet.
///
/// Discards data accumulated with COM_STMT_SEND_LONG_DATA on the server.
pub fn build_stmt_reset_packet(statement_id: u32, sequence_id: u8) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(5);
    writer.write_u8(Command::StmtReset as u8);
    writer.write_u32_le(statement_id);
    writer.build_packet(sequence_id)
}

/// Parse a COM_STMT_PREPARE_OK response.
///
/// # Format
///
/// - Status: 0x00 (1 byte)
/// - Statement ID (4 bytes)
/// - Number of columns (2 bytes)
/// - Number of parameters (2 bytes)
/// - Reserved: 0x00 (1 byte)
/// - Warning count (2 bytes)
pub fn parse_stmt_prepare_ok(data: &[u8]) -> Option<StmtPrepareOk> {
    if data.len() < 12 || data[0] != 0x00 {
        return None;
    }

    let statement_id = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
    let num_columns = u16::from_le_bytes([data[5], data[6]]);
    let num_params = u16::from_le_bytes([data[7], data[8]]);
    // data[9] is reserved
    let warnings = u16::from_le_bytes([data[10], data[11]]);

    Some(StmtPrepareOk {
        statement_id,
        num_columns,
        num_params,
        warnings,
    })
}

/// Determine the MySQL field type used to bind a `Value`.
pub fn field_type_for_value(value: &Value) -> FieldType {
    match value {
        Value::Null => FieldType::Null,
        Value::Bool(_) | Value::TinyInt(_) => FieldType::Tiny,
        Value::SmallInt(_) => FieldType::Short,
        Value::Int(_) => FieldType::Long,
        Value::BigInt(_) => FieldType::LongLong,
        Value::Float(_) => FieldType::Float,
        Value::Double(_) => FieldType::Double,
        Value::Decimal(_) => FieldType::NewDecimal,
        Value::Text(_) => FieldType::VarString,
        Value::Bytes(_) => FieldType::Blob,
        Value::Json(_) => FieldType::Json,
        Value::Date(_) => FieldType::Date,
        Value::Time(_) => FieldType::Time,
        Value::Timestamp(_) => FieldType::DateTime,
    }
}

/// Encode one parameter value in binary-protocol format.
fn encode_binary_value(writer: &mut PacketWriter, value: &Value, field_type: FieldType) {
    match value {
        Value::Null => {
            // Indicated in the NULL bitmap, no data here
        }
        Value::Bool(b) => {
            writer.write_u8(u8::from(*b));
        }
        Value::TinyInt(i) => {
            writer.write_u8(*i as u8);
        }
        Value::SmallInt(i) => {
            writer.write_u16_le(*i as u16);
        }
        Value::Int(i) => {
            writer.write_u32_le(*i as u32);
        }
        Value::BigInt(i) => match field_type {
            FieldType::Tiny => writer.write_u8(*i as u8),
            FieldType::Short | FieldType::Year => writer.write_u16_le(*i as u16),
            FieldType::Long | FieldType::Int24 => writer.write_u32_le(*i as u32),
            _ => writer.write_u64_le(*i as u64),
        },
        Value::Float(f) => {
            writer.write_bytes(&f.to_le_bytes());
        }
        Value::Double(f) => {
            writer.write_bytes(&f.to_le_bytes());
        }
        Value::Decimal(s) => {
            writer.write_lenenc_bytes(s.as_bytes());
        }
        Value::Text(s) => {
            writer.write_lenenc_bytes(s.as_bytes());
        }
        Value::Bytes(b) => {
            writer.write_lenenc_bytes(b);
        }
        Value::Json(j) => {
            writer.write_lenenc_bytes(j.to_string().as_bytes());
        }
        Value::Date(days) => {
            encode_binary_date(writer, *days);
        }
        Value::Time(micros) => {
            encode_binary_time(writer, *micros);
        }
        Value::Timestamp(micros) => {
            encode_binary_datetime(writer, *micros);
        }
    }
}

/// Encode a DATE parameter (days since epoch).
///
/// Always length 7: year + month + day followed by zeroed time fields.
fn encode_binary_date(writer: &mut PacketWriter, days: i32) {
    let (year, month, day) = crate::types::days_to_ymd(days);
    writer.write_u8(7);
    writer.write_u16_le(year as u16);
    writer.write_u8(month as u8);
    writer.write_u8(day as u8);
    writer.write_u8(0);
    writer.write_u8(0);
    writer.write_u8(0);
}

/// Encode a TIME parameter (signed microseconds, may exceed 24h).
///
/// Length 8 without fractional seconds, 12 with the microsecond tail.
fn encode_binary_time(writer: &mut PacketWriter, micros: i64) {
    let (negative, days, hours, minutes, seconds, microseconds) = time_parts(micros);

    if microseconds == 0 {
        writer.write_u8(8);
    } else {
        writer.write_u8(12);
    }
    writer.write_u8(u8::from(negative));
    writer.write_u32_le(days);
    writer.write_u8(hours);
    writer.write_u8(minutes);
    writer.write_u8(seconds);
    if microseconds != 0 {
        writer.write_u32_le(microseconds);
    }
}

/// Encode a DATETIME/TIMESTAMP parameter (microseconds since epoch).
///
/// Length 7 without fractional seconds, 11 with the microsecond tail.
fn encode_binary_datetime(writer: &mut PacketWriter, micros: i64) {
    let (year, month, day, hour, minute, second, microseconds) = timestamp_parts(micros);

    if microseconds == 0 {
        writer.write_u8(7);
    } else {
        writer.write_u8(11);
    }
    writer.write_u16_le(year as u16);
    writer.write_u8(month as u8);
    writer.write_u8(day as u8);
    writer.write_u8(hour);
    writer.write_u8(minute);
    writer.write_u8(second);
    if microseconds != 0 {
        writer.write_u32_le(microseconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ymd_to_days;

    fn value_param(value: &Value) -> BinaryParam<'_> {
        BinaryParam::Value {
            value,
            field_type: field_type_for_value(value),
        }
    }

    #[test]
    fn test_build_stmt_prepare_packet() {
        let packet = build_stmt_prepare_packet(b"SELECT * FROM users WHERE id = ?", 0);

        assert_eq!(packet[3], 0); // sequence_id
        assert_eq!(packet[4], Command::StmtPrepare as u8);
        assert_eq!(&packet[5..], b"SELECT * FROM users WHERE id = ?");
    }

    #[test]
    fn test_build_stmt_close_packet() {
        let packet = build_stmt_close_packet(42, 0);

        // Header (4) + command (1) + stmt_id (4)
        assert_eq!(packet.len(), 9);
        assert_eq!(packet[4], Command::StmtClose as u8);
        let stmt_id = u32::from_le_bytes([packet[5], packet[6], packet[7], packet[8]]);
        assert_eq!(stmt_id, 42);
    }

    #[test]
    fn test_build_stmt_reset_packet() {
        let packet = build_stmt_reset_packet(7, 0);
        assert_eq!(packet[4], Command::StmtReset as u8);
        assert_eq!(&packet[5..9], &[7, 0, 0, 0]);
    }

    #[test]
    fn test_parse_stmt_prepare_ok() {
        let data = [
            0x00, // status
            0x01, 0x00, 0x00, 0x00, // statement_id = 1
            0x03, 0x00, // num_columns = 3
            0x02, 0x00, // num_params = 2
            0x00, // reserved
            0x00, 0x00, // warnings = 0
        ];

        let result = parse_stmt_prepare_ok(&data).unwrap();
        assert_eq!(result.statement_id, 1);
        assert_eq!(result.num_columns, 3);
        assert_eq!(result.num_params, 2);
        assert_eq!(result.warnings, 0);
    }

    #[test]
    fn test_parse_stmt_prepare_ok_invalid() {
        // Too short
        assert!(parse_stmt_prepare_ok(&[0x00, 0x01]).is_none());

        // Wrong status byte
        let data = [
            0xFF, 0x01, 0x00, 0x00, 0x00, 0x03, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00,
        ];
        assert!(parse_stmt_prepare_ok(&data).is_none());
    }

    #[test]
    fn test_build_stmt_execute_no_params() {
        let packet = build_stmt_execute_packet(1, &[], true, 0);

        assert_eq!(packet[4], Command::StmtExecute as u8);
        let stmt_id = u32::from_le_bytes([packet[5], packet[6], packet[7], packet[8]]);
        assert_eq!(stmt_id, 1);
        // Flags
        assert_eq!(packet[9], 0x00);
        // Iteration count
        let iter_count = u32::from_le_bytes([packet[10], packet[11], packet[12], packet[13]]);
        assert_eq!(iter_count, 1);
        // Nothing follows for zero params
        assert_eq!(packet.len(), 14);
    }

    #[test]
    fn test_build_stmt_execute_with_params() {
        let int = Value::Int(42);
        let text = Value::Text("hello".to_string());
        let params = vec![value_param(&int), value_param(&text)];
        let packet = build_stmt_execute_packet(1, &params, true, 0);

        assert_eq!(packet[4], Command::StmtExecute as u8);
        // NULL bitmap (1 byte for 2 params)
        assert_eq!(packet[14], 0x00);
        // Types-follow = 1
        assert_eq!(packet[15], 0x01);
        // Types: LONG for Int, VAR_STRING for Text
        assert_eq!(packet[16], FieldType::Long as u8);
        assert_eq!(packet[17], 0x00);
        assert_eq!(packet[18], FieldType::VarString as u8);
        assert_eq!(packet[19], 0x00);
        // Values: 42 as u32, then lenenc "hello"
        assert_eq!(&packet[20..24], &[42, 0, 0, 0]);
        assert_eq!(&packet[24..30], &[5, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_build_stmt_execute_null_bitmap() {
        let int = Value::Int(42);
        let params = vec![
            BinaryParam::Null {
                field_type: FieldType::VarString,
            },
            value_param(&int),
        ];
        let packet = build_stmt_execute_packet(1, &params, true, 0);

        // NULL bitmap: bit 0 set
        assert_eq!(packet[14], 0x01);
    }

    #[test]
    fn test_build_stmt_execute_cached_types() {
        let int = Value::Int(1);
        let params = vec![value_param(&int)];
        let packet = build_stmt_execute_packet(9, &params, false, 0);

        // Types-follow = 0, value follows immediately
        assert_eq!(packet[15], 0x00);
        assert_eq!(&packet[16..20], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_long_data_param_skipped_in_values() {
        let int = Value::Int(5);
        let params = vec![
            BinaryParam::LongData {
                field_type: FieldType::Blob,
            },
            value_param(&int),
        ];
        let packet = build_stmt_execute_packet(3, &params, true, 0);

        // bitmap(1) + flag(1) + types(4) then only the int value
        assert_eq!(packet[14], 0x00); // long data is not NULL
        assert_eq!(packet[15], 0x01);
        assert_eq!(packet[16], FieldType::Blob as u8);
        assert_eq!(packet[18], FieldType::Long as u8);
        assert_eq!(&packet[20..], &[5, 0, 0, 0]);
    }

    #[test]
    fn test_build_long_data_packet() {
        let packet = build_long_data_packet(7, 2, b"abc", 0);
        assert_eq!(packet[4], Command::StmtSendLongData as u8);
        assert_eq!(&packet[5..9], &[7, 0, 0, 0]);
        assert_eq!(&packet[9..11], &[2, 0]);
        assert_eq!(&packet[11..], b"abc");
    }

    #[test]
    fn test_build_long_data_packet_empty_chunk() {
        let packet = build_long_data_packet(7, 0, b"", 0);
        // Still a complete packet marking the parameter as bound
        assert_eq!(&packet[..4], &[0x07, 0x00, 0x00, 0x00]);
        assert_eq!(packet.len(), 11);
    }

    #[test]
    fn test_encode_binary_date_exact_bytes() {
        let mut writer = PacketWriter::new();
        encode_binary_value(
            &mut writer,
            &Value::Date(ymd_to_days(2024, 1, 31)),
            FieldType::Date,
        );
        // Length 7, year 2024 little-endian, month 1, day 31, zero time
        assert_eq!(writer.as_bytes(), &[7, 0xE8, 0x07, 1, 31, 0, 0, 0]);
    }

    #[test]
    fn test_encode_binary_datetime_with_micros() {
        let mut writer = PacketWriter::new();
        // 1970-01-01 00:00:01.000002
        encode_binary_value(&mut writer, &Value::Timestamp(1_000_002), FieldType::DateTime);
        assert_eq!(
            writer.as_bytes(),
            &[11, 0xB2, 0x07, 1, 1, 0, 0, 1, 2, 0, 0, 0]
        );
    }

    #[test]
    fn test_encode_binary_datetime_without_micros() {
        let mut writer = PacketWriter::new();
        encode_binary_value(&mut writer, &Value::Timestamp(1_000_000), FieldType::DateTime);
        assert_eq!(writer.as_bytes(), &[7, 0xB2, 0x07, 1, 1, 0, 0, 1]);
    }

    #[test]
    fn test_encode_binary_time() {
        let mut writer = PacketWriter::new();
        // 01:02:03
        encode_binary_value(
            &mut writer,
            &Value::Time((3600 + 2 * 60 + 3) * 1_000_000),
            FieldType::Time,
        );
        assert_eq!(writer.as_bytes(), &[8, 0, 0, 0, 0, 0, 1, 2, 3]);
    }

    #[test]
    fn test_encode_binary_time_negative_with_micros() {
        let mut writer = PacketWriter::new();
        encode_binary_value(&mut writer, &Value::Time(-1_500_000), FieldType::Time);
        assert_eq!(
            writer.as_bytes(),
            &[12, 1, 0, 0, 0, 0, 0, 0, 1, 0x20, 0xA1, 0x07, 0]
        );
    }

    #[test]
    fn test_field_type_for_value() {
        assert_eq!(field_type_for_value(&Value::Null), FieldType::Null);
        assert_eq!(field_type_for_value(&Value::Bool(true)), FieldType::Tiny);
        assert_eq!(field_type_for_value(&Value::Int(1)), FieldType::Long);
        assert_eq!(field_type_for_value(&Value::BigInt(1)), FieldType::LongLong);
        assert_eq!(
            field_type_for_value(&Value::Text(String::new())),
            FieldType::VarString
        );
        assert_eq!(field_type_for_value(&Value::Bytes(vec![])), FieldType::Blob);
        assert_eq!(field_type_for_value(&Value::Date(0)), FieldType::Date);
        assert_eq!(
            field_type_for_value(&Value::Timestamp(0)),
            FieldType::DateTime
        );
    }
}
