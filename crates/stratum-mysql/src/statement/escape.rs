//! MySQL text-protocol literal escaping.
//!
//! Client-side (emulated) prepared statements inline parameter values into
//! the query text, so every string value must be escaped before it touches
//! the wire. Two modes exist:
//!
//! - Backslash mode (default): `\0 \n \r \\ \' \" \Z` escapes.
//! - `NO_BACKSLASH_ESCAPES` mode: the server treats backslash literally, so
//!   only quote doubling is available; values containing bytes that cannot
//!   be represented safely fall back to hex literals.

use crate::types::{days_to_ymd, time_parts, timestamp_parts};
use stratum_core::Value;

/// Escaping behavior derived from session state and configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct EscapeMode {
    /// Server has `NO_BACKSLASH_ESCAPES` enabled
    pub no_backslash_escapes: bool,
    /// `ANSI_QUOTES` is active: `"` delimits identifiers, not strings, and
    /// needs no escaping inside single-quoted literals
    pub ansi_quotes: bool,
}

/// Escape a string and wrap it in single quotes.
pub fn escape_string_literal(s: &str, mode: EscapeMode) -> Vec<u8> {
    if mode.no_backslash_escapes {
        return escape_no_backslash(s.as_bytes());
    }

    let mut out = Vec::with_capacity(s.len() + 2);
    out.push(b'\'');
    for &b in s.as_bytes() {
        match b {
            0x00 => out.extend_from_slice(b"\\0"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\'' => out.extend_from_slice(b"\\'"),
            b'"' if !mode.ansi_quotes => out.extend_from_slice(b"\\\""),
            0x1A => out.extend_from_slice(b"\\Z"),
            _ => out.push(b),
        }
    }
    out.push(b'\'');
    out
}

/// Escape under `NO_BACKSLASH_ESCAPES`: quote doubling only.
///
/// Bytes that have no safe representation without backslash escapes
/// (NUL, Ctrl-Z) force the hex-literal fallback.
fn escape_no_backslash(bytes: &[u8]) -> Vec<u8> {
    if bytes.iter().any(|&b| b == 0x00 || b == 0x1A) {
        return hex_literal(bytes);
    }

    let mut out = Vec::with_capacity(bytes.len() + 2);
    out.push(b'\'');
    for &b in bytes {
        if b == b'\'' {
            out.extend_from_slice(b"''");
        } else {
            out.push(b);
        }
    }
    out.push(b'\'');
    out
}

/// Encode bytes as a MySQL hex literal `X'..'`.
pub fn hex_literal(data: &[u8]) -> Vec<u8> {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = Vec::with_capacity(data.len() * 2 + 3);
    out.extend_from_slice(b"X'");
    for &b in data {
        out.push(HEX[(b >> 4) as usize]);
        out.push(HEX[(b & 0x0F) as usize]);
    }
    out.push(b'\'');
    out
}

/// Render a `Value` as an escaped SQL literal for the text protocol.
pub fn format_value_literal(value: &Value, mode: EscapeMode) -> Vec<u8> {
    match value {
        Value::Null => b"NULL".to_vec(),
        Value::Bool(true) => b"TRUE".to_vec(),
        Value::Bool(false) => b"FALSE".to_vec(),
        Value::TinyInt(i) => i.to_string().into_bytes(),
        Value::SmallInt(i) => i.to_string().into_bytes(),
        Value::Int(i) => i.to_string().into_bytes(),
        Value::BigInt(i) => i.to_string().into_bytes(),
        Value::Float(f) => format_float(f64::from(*f)),
        Value::Double(f) => format_float(*f),
        Value::Decimal(s) => s.clone().into_bytes(),
        Value::Text(s) => escape_string_literal(s, mode),
        Value::Bytes(b) => hex_literal(b),
        Value::Json(j) => escape_string_literal(&j.to_string(), mode),
        Value::Date(days) => {
            let (y, m, d) = days_to_ymd(*days);
            format!("'{y:04}-{m:02}-{d:02}'").into_bytes()
        }
        Value::Time(micros) => {
            let (neg, days, h, mi, s, us) = time_parts(*micros);
            let sign = if neg { "-" } else { "" };
            let hours = u64::from(days) * 24 + u64::from(h);
            if us == 0 {
                format!("'{sign}{hours:02}:{mi:02}:{s:02}'").into_bytes()
            } else {
                format!("'{sign}{hours:02}:{mi:02}:{s:02}.{us:06}'").into_bytes()
            }
        }
        Value::Timestamp(micros) => {
            let (y, m, d, h, mi, s, us) = timestamp_parts(*micros);
            if us == 0 {
                format!("'{y:04}-{m:02}-{d:02} {h:02}:{mi:02}:{s:02}'").into_bytes()
            } else {
                format!("'{y:04}-{m:02}-{d:02} {h:02}:{mi:02}:{s:02}.{us:06}'").into_bytes()
            }
        }
    }
}

fn format_float(f: f64) -> Vec<u8> {
    if f.is_nan() {
        return b"NULL".to_vec();
    }
    if f.is_infinite() {
        // Clamp to a representable extreme
        return if f.is_sign_positive() {
            b"1e308".to_vec()
        } else {
            b"-1e308".to_vec()
        };
    }
    f.to_string().into_bytes()
}
