//! Error types for Stratum operations.

use std::fmt;

/// Batch update-count sentinel: the statement executed successfully but the
/// number of affected rows is unknown (multi-value rewritten batches).
pub const SUCCESS_NO_INFO: i64 = -2;

/// Batch update-count sentinel: the statement failed to execute.
pub const EXECUTE_FAILED: i64 = -3;

/// The primary error type for all Stratum operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, authentication, disconnect, failover)
    Connection(ConnectionError),
    /// Query execution errors reported by the server or during transfer
    Query(QueryError),
    /// Statement preparation and parameter-binding errors (no I/O performed)
    Statement(StatementError),
    /// Composite batch failure carrying per-entry update counts
    Batch(BatchError),
    /// Protocol errors (malformed packets, unexpected wire data)
    Protocol(ProtocolError),
    /// I/O errors
    Io(std::io::Error),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Authentication failed
    Authentication,
    /// Connection lost during operation
    Disconnected,
    /// Connection refused
    Refused,
    /// Every configured host is unreachable; explicit reconnect required
    AllHostsDown,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
    pub sqlstate: Option<String>,
    pub sql: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Data too large for column
    DataTruncation,
    /// Deadlock detected, transaction rolled back
    Deadlock,
    /// Statement timed out and was killed by the driver
    Timeout,
    /// Statement was cancelled on request
    Cancelled,
    /// I/O failure while streaming long parameter data; the statement must
    /// be reset before reuse
    DataTransfer,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct StatementError {
    pub kind: StatementErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementErrorKind {
    /// Unparsable SQL (empty statement, unterminated quote)
    Malformed,
    /// A placeholder was left unbound at execute time
    ParameterNotSet,
    /// Parameter index outside 1..=parameter_count
    ParameterIndexOutOfRange,
}

/// Composite failure raised by batch execution.
///
/// `update_counts` has one entry per batch element that was attempted, in
/// order. Failed entries hold [`EXECUTE_FAILED`]; entries executed through a
/// multi-value rewrite hold [`SUCCESS_NO_INFO`].
#[derive(Debug)]
pub struct BatchError {
    pub message: String,
    pub update_counts: Vec<i64>,
    pub cause: Box<Error>,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Is this a connection error that warrants a failover attempt?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(c) => matches!(
                c.kind,
                ConnectionErrorKind::Connect
                    | ConnectionErrorKind::Disconnected
                    | ConnectionErrorKind::Refused
            ),
            Error::Io(_) => true,
            _ => false,
        }
    }

    /// Does this error abort a batch even when `continue_batch_on_error` is
    /// set (timeouts, cancellation, deadlock rollback)?
    pub fn aborts_batch(&self) -> bool {
        match self {
            Error::Query(q) => matches!(
                q.kind,
                QueryErrorKind::Timeout | QueryErrorKind::Cancelled | QueryErrorKind::Deadlock
            ),
            _ => false,
        }
    }

    /// Get the SQLSTATE if the server reported one.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Statement(e) => write!(f, "Statement error: {}", e.message),
            Error::Batch(e) => write!(f, "Batch error: {}", e.message),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Batch(e) => Some(e.cause.as_ref()),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for StatementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} entries attempted)",
            self.message,
            self.update_counts.len()
        )
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<StatementError> for Error {
    fn from(err: StatementError) -> Self {
        Error::Statement(err)
    }
}

impl From<BatchError> for Error {
    fn from(err: BatchError) -> Self {
        Error::Batch(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

/// Result type alias for Stratum operations.
pub type Result<T> = std::result::Result<T, Error>;
