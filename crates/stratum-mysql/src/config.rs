//! MySQL connection configuration.
//!
//! Connection parameters plus the statement-engine and failover options:
//! server-side prepare, batch rewriting, long-data chunking, query
//! timeouts, and the ordered host list the failover facade works through.

use std::collections::HashMap;
use std::time::Duration;

/// One physical host the facade may connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// Hostname or IP address
    pub host: String,
    /// Port number
    pub port: u16,
}

impl HostInfo {
    /// Create a host entry.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The `host:port` address string.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// MySQL connection configuration.
#[derive(Debug, Clone)]
pub struct MySqlConfig {
    /// Hosts in failover preference order; the first is preferred
    pub hosts: Vec<HostInfo>,
    /// Username for authentication
    pub user: String,
    /// Password for authentication
    pub password: Option<String>,
    /// Database name to connect to (optional at connect time)
    pub database: Option<String>,
    /// Character set (default: utf8mb4)
    pub charset: u8,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Additional connection attributes
    pub attributes: HashMap<String, String>,
    /// Max allowed packet size announced to the server
    pub max_packet_size: u32,

    /// Use server-side prepared statements (binary protocol) instead of
    /// client-side emulation
    pub use_server_prepare: bool,
    /// Fold eligible batched INSERTs into one multi-value statement, and
    /// other client-side batches into one multi-statement query
    pub rewrite_batched_statements: bool,
    /// Keep executing batch entries after a non-fatal failure
    pub continue_batch_on_error: bool,
    /// Honor declared stream lengths when sending long data
    pub use_stream_lengths: bool,
    /// Session uses `NO_BACKSLASH_ESCAPES`
    pub no_backslash_escapes: bool,
    /// Session uses `ANSI_QUOTES`
    pub ansi_quotes: bool,
    /// Arm the cancellation timer for statements with a timeout
    pub enable_query_timeouts: bool,
    /// Chunk size for COM_STMT_SEND_LONG_DATA packets
    pub blob_send_chunk_size: usize,
    /// Comment block prefixed to every client-side statement, e.g. for
    /// query attribution in server logs
    pub statement_comment: Option<String>,

    /// Attempt transparent failover to alternate hosts on connection
    /// failure
    pub auto_reconnect: bool,
    /// How long a failed host stays blacklisted
    pub blacklist_timeout: Duration,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            hosts: vec![HostInfo::new("localhost", 3306)],
            user: String::new(),
            password: None,
            database: None,
            charset: crate::protocol::charset::DEFAULT_CHARSET,
            connect_timeout: Duration::from_secs(30),
            attributes: HashMap::new(),
            max_packet_size: 64 * 1024 * 1024,
            use_server_prepare: false,
            rewrite_batched_statements: false,
            continue_batch_on_error: true,
            use_stream_lengths: true,
            no_backslash_escapes: false,
            ansi_quotes: false,
            enable_query_timeouts: true,
            blob_send_chunk_size: 1024 * 1024,
            statement_comment: None,
            auto_reconnect: true,
            blacklist_timeout: Duration::from_secs(50),
        }
    }
}

impl MySqlConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the preferred host, replacing the host list.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        let port = self.hosts.first().map_or(3306, |h| h.port);
        self.hosts = vec![HostInfo::new(host, port)];
        self
    }

    /// Set the preferred host's port.
    pub fn port(mut self, port: u16) -> Self {
        if let Some(first) = self.hosts.first_mut() {
            first.port = port;
        }
        self
    }

    /// Append a failover host.
    pub fn add_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.hosts.push(HostInfo::new(host, port));
        self
    }

    /// Set the username.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the character set.
    pub fn charset(mut self, charset: u8) -> Self {
        self.charset = charset;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set a connection attribute.
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Enable or disable server-side prepared statements.
    pub fn use_server_prepare(mut self, enabled: bool) -> Self {
        self.use_server_prepare = enabled;
        self
    }

    /// Enable or disable batch rewriting.
    pub fn rewrite_batched_statements(mut self, enabled: bool) -> Self {
        self.rewrite_batched_statements = enabled;
        self
    }

    /// Keep executing batch entries after a non-fatal failure.
    pub fn continue_batch_on_error(mut self, enabled: bool) -> Self {
        self.continue_batch_on_error = enabled;
        self
    }

    /// Enable or disable the statement cancellation timer.
    pub fn enable_query_timeouts(mut self, enabled: bool) -> Self {
        self.enable_query_timeouts = enabled;
        self
    }

    /// Set the long-data chunk size.
    pub fn blob_send_chunk_size(mut self, size: usize) -> Self {
        self.blob_send_chunk_size = size.max(1);
        self
    }

    /// Set the comment block prefixed to client-side statements.
    pub fn statement_comment(mut self, comment: impl Into<String>) -> Self {
        self.statement_comment = Some(comment.into());
        self
    }

    /// Enable or disable automatic failover.
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the host blacklist timeout.
    pub fn blacklist_timeout(mut self, timeout: Duration) -> Self {
        self.blacklist_timeout = timeout;
        self
    }

    /// Build client capability flags based on configuration.
    pub fn capability_flags(&self) -> u32 {
        use crate::protocol::capabilities::{
            CLIENT_CONNECT_ATTRS, CLIENT_CONNECT_WITH_DB, DEFAULT_CLIENT_FLAGS,
        };

        let mut flags = DEFAULT_CLIENT_FLAGS;

        if self.database.is_none() {
            flags &= !CLIENT_CONNECT_WITH_DB;
        }

        if !self.attributes.is_empty() {
            flags |= CLIENT_CONNECT_ATTRS;
        }

        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::capabilities;

    #[test]
    fn test_config_builder() {
        let config = MySqlConfig::new()
            .host("db.example.com")
            .port(3307)
            .add_host("db-replica.example.com", 3307)
            .user("myuser")
            .password("secret")
            .database("testdb")
            .connect_timeout(Duration::from_secs(10))
            .use_server_prepare(true)
            .rewrite_batched_statements(true)
            .blacklist_timeout(Duration::from_secs(5));

        assert_eq!(config.hosts.len(), 2);
        assert_eq!(config.hosts[0].address(), "db.example.com:3307");
        assert_eq!(config.hosts[1].host, "db-replica.example.com");
        assert_eq!(config.user, "myuser");
        assert_eq!(config.password, Some("secret".to_string()));
        assert_eq!(config.database, Some("testdb".to_string()));
        assert!(config.use_server_prepare);
        assert!(config.rewrite_batched_statements);
        assert_eq!(config.blacklist_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_host_replaces_list() {
        let config = MySqlConfig::new()
            .add_host("extra", 3306)
            .host("only");
        assert_eq!(config.hosts.len(), 1);
        assert_eq!(config.hosts[0].host, "only");
    }

    #[test]
    fn test_capability_flags() {
        let config = MySqlConfig::new().database("test");
        let flags = config.capability_flags();
        assert!(flags & capabilities::CLIENT_CONNECT_WITH_DB != 0);
        assert!(flags & capabilities::CLIENT_PROTOCOL_41 != 0);
        assert!(flags & capabilities::CLIENT_SECURE_CONNECTION != 0);

        let config = MySqlConfig::new();
        assert!(config.capability_flags() & capabilities::CLIENT_CONNECT_WITH_DB == 0);

        let config = MySqlConfig::new().attribute("program_name", "stratum");
        assert!(config.capability_flags() & capabilities::CLIENT_CONNECT_ATTRS != 0);
    }

    #[test]
    fn test_defaults() {
        let config = MySqlConfig::default();
        assert_eq!(config.hosts, vec![HostInfo::new("localhost", 3306)]);
        assert!(!config.use_server_prepare);
        assert!(!config.rewrite_batched_statements);
        assert!(config.continue_batch_on_error);
        assert!(config.auto_reconnect);
        assert_eq!(config.blob_send_chunk_size, 1024 * 1024);
    }
}
