//! Core types for the Stratum MySQL client.
//!
//! This crate provides the driver-independent building blocks:
//!
//! - `Value` for dynamically-typed parameters and results
//! - `Row` for result rows with shared column metadata
//! - The error taxonomy used across the driver

pub mod error;
pub mod row;
pub mod value;

pub use error::{
    BatchError, ConnectionError, ConnectionErrorKind, Error, ProtocolError, QueryError,
    QueryErrorKind, Result, StatementError, StatementErrorKind, EXECUTE_FAILED, SUCCESS_NO_INFO,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
