//! MySQL wire-protocol client for Stratum.
//!
//! This crate implements the MySQL client/server protocol from scratch
//! over blocking TCP. It provides:
//!
//! - Packet framing with sequence numbers and 16MB splitting
//! - Authentication (mysql_native_password, caching_sha2_password)
//! - Client-side (emulated) prepared statements: placeholder scanning,
//!   escape-at-bind, text-protocol execution
//! - Server-side prepared statements: binary parameter encoding, long-data
//!   streaming, type-vector caching
//! - Batch execution with multi-value INSERT rewriting
//! - A failover facade that redirects every operation to the currently
//!   active physical connection and re-prepares statements after a swap
//!
//! # MySQL Protocol Overview
//!
//! MySQL uses a packet-based protocol with:
//! - 3-byte payload length + 1-byte sequence number header
//! - Packets over 16MB are split
//! - Request/response pairing via sequence numbers
//!
//! # Example
//!
//! ```rust,ignore
//! use stratum_mysql::{FailoverConnection, MySqlConfig};
//! use stratum_core::Value;
//!
//! let config = MySqlConfig::new()
//!     .host("db-primary")
//!     .add_host("db-replica", 3306)
//!     .user("app")
//!     .database("orders");
//!
//! let conn = FailoverConnection::connect(config)?;
//! let mut stmt = conn.prepare("INSERT INTO orders (sku, qty) VALUES (?, ?)")?;
//! stmt.set_value(1, Value::Text("A-17".into()))?;
//! stmt.set_value(2, Value::Int(3))?;
//! stmt.execute_update()?;
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod failover;
pub mod protocol;
pub mod statement;
pub mod timeout;
pub mod types;

pub use config::{HostInfo, MySqlConfig};
pub use connection::{ConnectionState, ExecResult, MySqlConnection, ServerPrepareResult};
pub use failover::FailoverConnection;
pub use statement::{
    BatchedParameterSet, BindValue, EscapeMode, ParameterBindingStore, ParseOptions,
    ParsedStatement, PreparedStatement,
};
pub use types::{ColumnDef, FieldType};

// Re-export the core types a driver user always needs
pub use stratum_core::{Error, Result, Row, Value};
