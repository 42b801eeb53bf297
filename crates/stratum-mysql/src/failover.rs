//! Failover connection facade.
//!
//! Wraps the configured hosts behind one logical connection. At any moment
//! one physical connection is active; every delegated operation reads the
//! active reference under the facade mutex, releases it, and then performs
//! the blocking round-trip under the physical connection's own mutex. The
//! swap path holds the facade mutex for the whole reconnect attempt so two
//! threads cannot race to install different replacements.
//!
//! State machine: `Connected(active)` or `AllDown`. A connection failure
//! (with `auto_reconnect` enabled) blacklists the failed host and walks
//! the alternates in configured order; if every candidate fails the facade
//! enters `AllDown`, where every delegated call fails identically until an
//! explicit `reconnect`. After a successful swap, registered server-side
//! statements are re-marked for re-preparation: statement ids are scoped
//! to the connection that issued them.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use stratum_core::error::{ConnectionError, ConnectionErrorKind};
use stratum_core::{Error, Result};

use crate::config::MySqlConfig;
use crate::connection::{ExecResult, MySqlConnection};
use crate::statement::{PreparedStatement, StatementShared};
use crate::timeout::CancelTimer;

type Connector = Box<dyn Fn(&MySqlConfig, usize) -> Result<MySqlConnection> + Send + Sync>;

struct Active {
    conn: Arc<Mutex<MySqlConnection>>,
    host_index: usize,
    connection_id: u32,
}

struct FailoverState {
    active: Option<Active>,
    /// Bumped on every swap; server-side statement ids from older epochs
    /// are invalid
    epoch: u64,
    all_down: bool,
    /// Failed hosts and when their blacklisting expires
    blacklist: HashMap<usize, Instant>,
}

/// The logical connection: N physical hosts, one active at a time.
pub struct FailoverConnection {
    config: MySqlConfig,
    connector: Connector,
    inner: Mutex<FailoverState>,
    /// Open statements, for re-prepare marking and cleanup on close
    statements: Mutex<Vec<Weak<StatementShared>>>,
    timer: CancelTimer,
}

impl FailoverConnection {
    /// Connect to the first reachable configured host.
    pub fn connect(config: MySqlConfig) -> Result<Arc<Self>> {
        Self::connect_with(config, Box::new(MySqlConnection::connect))
    }

    /// Connect using a custom physical connector (used by tests to drive
    /// scripted connections).
    pub(crate) fn connect_with(config: MySqlConfig, connector: Connector) -> Result<Arc<Self>> {
        if config.hosts.is_empty() {
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "no hosts configured".to_string(),
                source: None,
            }));
        }

        let facade = Arc::new(Self {
            config,
            connector,
            inner: Mutex::new(FailoverState {
                active: None,
                epoch: 0,
                all_down: false,
                blacklist: HashMap::new(),
            }),
            statements: Mutex::new(Vec::new()),
            timer: CancelTimer::new(),
        });

        {
            let mut state = facade.lock_state();
            facade.try_hosts_locked(&mut state)?;
        }
        Ok(facade)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, FailoverState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read the active connection reference (installing one if needed).
    ///
    /// Returns the connection and the epoch it was observed at. The facade
    /// mutex is released before the caller performs I/O.
    pub(crate) fn checkout(&self) -> Result<(Arc<Mutex<MySqlConnection>>, u64)> {
        let mut state = self.lock_state();
        if state.all_down {
            return Err(all_hosts_down());
        }
        if state.active.is_none() {
            self.try_hosts_locked(&mut state)?;
        }
        let active = state.active.as_ref().expect("active connection installed");
        Ok((Arc::clone(&active.conn), state.epoch))
    }

    /// Run `op` against the active physical connection, failing over and
    /// retrying on connection errors when `auto_reconnect` is enabled.
    pub fn with_active<T>(
        &self,
        mut op: impl FnMut(&mut MySqlConnection) -> Result<T>,
    ) -> Result<T> {
        let mut attempts = 0usize;
        loop {
            let (conn, epoch) = self.checkout()?;
            let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            match op(&mut guard) {
                Err(e)
                    if e.is_connection_error()
                        && self.config.auto_reconnect
                        && attempts < self.config.hosts.len() =>
                {
                    drop(guard);
                    tracing::warn!(error = %e, "operation failed on active connection");
                    self.fail_over(epoch)?;
                    attempts += 1;
                }
                result => return result,
            }
        }
    }

    /// Swap the active connection after a failure observed at
    /// `observed_epoch`.
    ///
    /// Holds the facade mutex for the entire reconnect walk. If another
    /// thread already swapped (the epoch moved), this is a no-op.
    pub(crate) fn fail_over(&self, observed_epoch: u64) -> Result<()> {
        let swapped = {
            let mut state = self.lock_state();
            if state.all_down {
                return Err(all_hosts_down());
            }
            if state.epoch != observed_epoch {
                // Another caller already installed a replacement
                return Ok(());
            }

            if let Some(failed) = state.active.take() {
                state.blacklist.insert(
                    failed.host_index,
                    Instant::now() + self.config.blacklist_timeout,
                );
                tracing::warn!(
                    host_index = failed.host_index,
                    "active connection lost, attempting failover"
                );
            }

            self.try_hosts_locked(&mut state)?;
            state.active.as_ref().map(|a| a.host_index)
        };

        // Statement ids from the previous connection are dead
        self.mark_statements_for_reprepare();
        tracing::debug!(host_index = swapped, "failover complete");
        Ok(())
    }

    /// Explicit, policy-driven swap request (same transition as the
    /// error-triggered path).
    pub fn trigger_failover(&self) -> Result<()> {
        let epoch = self.lock_state().epoch;
        self.fail_over(epoch)
    }

    /// Leave the `AllDown` state: clear the blacklist and connect afresh.
    pub fn reconnect(&self) -> Result<()> {
        {
            let mut state = self.lock_state();
            state.all_down = false;
            state.blacklist.clear();
            state.active = None;
            self.try_hosts_locked(&mut state)?;
        }
        self.mark_statements_for_reprepare();
        Ok(())
    }

    /// Walk candidate hosts in configured order: non-blacklisted hosts
    /// first, then blacklisted ones as a last resort before `AllDown`.
    fn try_hosts_locked(&self, state: &mut FailoverState) -> Result<()> {
        let now = Instant::now();
        state.blacklist.retain(|_, until| *until > now);

        let host_count = self.config.hosts.len();
        let mut candidates: Vec<usize> = (0..host_count)
            .filter(|i| !state.blacklist.contains_key(i))
            .collect();
        candidates.extend((0..host_count).filter(|i| state.blacklist.contains_key(i)));

        let mut last_error = None;
        for host_index in candidates {
            match (self.connector)(&self.config, host_index) {
                Ok(conn) => {
                    let connection_id = conn.connection_id();
                    state.active = Some(Active {
                        conn: Arc::new(Mutex::new(conn)),
                        host_index,
                        connection_id,
                    });
                    state.epoch += 1;
                    state.all_down = false;
                    state.blacklist.remove(&host_index);
                    tracing::debug!(host_index, connection_id, "physical connection active");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(host_index, error = %e, "host connection failed");
                    state
                        .blacklist
                        .insert(host_index, now + self.config.blacklist_timeout);
                    last_error = Some(e);
                }
            }
        }

        state.all_down = true;
        tracing::warn!("every configured host is unreachable");
        Err(Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::AllHostsDown,
            message: "all configured hosts are unreachable".to_string(),
            source: last_error.map(|e| Box::new(e) as _),
        }))
    }

    fn mark_statements_for_reprepare(&self) {
        let mut statements = self
            .statements
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        statements.retain(|weak| match weak.upgrade() {
            Some(shared) => {
                shared.needs_reprepare.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        });
    }

    pub(crate) fn register_statement(&self, shared: &Arc<StatementShared>) {
        self.statements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::downgrade(shared));
    }

    /// Prepare a statement against this logical connection.
    pub fn prepare(self: &Arc<Self>, sql: &str) -> Result<PreparedStatement> {
        PreparedStatement::new(Arc::clone(self), sql)
    }

    /// Execute statement text directly over the text protocol.
    pub fn query(&self, sql: &str) -> Result<ExecResult> {
        self.with_active(|conn| conn.query(sql.as_bytes()))
    }

    /// Execute a statement and return the affected-row count.
    pub fn execute(&self, sql: &str) -> Result<u64> {
        self.query(sql).map(|result| result.affected_rows)
    }

    /// Ping the active physical connection.
    pub fn ping(&self) -> Result<()> {
        self.with_active(MySqlConnection::ping)
    }

    /// The current swap epoch.
    pub(crate) fn epoch(&self) -> u64 {
        self.lock_state().epoch
    }

    /// Whether the facade is in the terminal `AllDown` state.
    pub fn is_all_down(&self) -> bool {
        self.lock_state().all_down
    }

    /// Index into the configured host list of the active connection.
    pub fn active_host_index(&self) -> Option<usize> {
        self.lock_state().active.as_ref().map(|a| a.host_index)
    }

    /// Server connection id of the active connection (the KILL target).
    pub fn active_connection_id(&self) -> Option<u32> {
        self.lock_state()
            .active
            .as_ref()
            .map(|a| a.connection_id)
    }

    /// Issue `KILL QUERY` for `connection_id` on a dedicated side
    /// connection to the active host. Best effort: failures are logged,
    /// not surfaced, since the statement observes its cancelled flag
    /// regardless.
    pub(crate) fn kill_query(&self, connection_id: u32) {
        let Some(host_index) = self.active_host_index() else {
            return;
        };
        match (self.connector)(&self.config, host_index) {
            Ok(mut conn) => {
                let kill = format!("KILL QUERY {connection_id}");
                if let Err(e) = conn.query(kill.as_bytes()) {
                    tracing::warn!(connection_id, error = %e, "KILL QUERY failed");
                } else {
                    tracing::debug!(connection_id, "query cancelled via KILL QUERY");
                }
            }
            Err(e) => {
                tracing::warn!(connection_id, error = %e, "cancel connection failed");
            }
        }
    }

    pub(crate) fn timer(&self) -> &CancelTimer {
        &self.timer
    }

    pub(crate) fn driver_config(&self) -> &MySqlConfig {
        &self.config
    }

    /// Close the facade: the active physical connection is closed and
    /// every subsequent delegated call fails until `reconnect`.
    pub fn close(&self) {
        let mut state = self.lock_state();
        if let Some(active) = state.active.take() {
            active
                .conn
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .close();
        }
        state.all_down = true;
    }
}

impl std::fmt::Debug for FailoverConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("FailoverConnection")
            .field("hosts", &self.config.hosts.len())
            .field("active_host", &state.active.as_ref().map(|a| a.host_index))
            .field("epoch", &state.epoch)
            .field("all_down", &state.all_down)
            .finish_non_exhaustive()
    }
}

fn all_hosts_down() -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::AllHostsDown,
        message: "all configured hosts are unreachable; explicit reconnect required".to_string(),
        source: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::{connect_script, ok_payload, packet};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn two_host_config() -> MySqlConfig {
        MySqlConfig::new()
            .host("primary")
            .add_host("secondary", 3306)
            .user("root")
            .blacklist_timeout(Duration::from_secs(60))
    }

    /// Host 0 connects but dies on first use; host 1 serves one OK query.
    fn flaky_primary_connector() -> Connector {
        Box::new(|config, host_index| {
            let mut script = connect_script();
            if host_index == 1 {
                script.extend_from_slice(&packet(1, &ok_payload(1, 0, 0x0002)));
                script.extend_from_slice(&packet(1, &ok_payload(1, 0, 0x0002)));
            }
            MySqlConnection::connect_script(config, host_index, script)
        })
    }

    #[test]
    fn test_initial_connect_prefers_first_host() {
        let facade =
            FailoverConnection::connect_with(two_host_config(), flaky_primary_connector())
                .unwrap();
        assert_eq!(facade.active_host_index(), Some(0));
        assert_eq!(facade.active_connection_id(), Some(42));
        assert!(!facade.is_all_down());
    }

    #[test]
    fn test_failover_redirects_to_alternate() {
        let facade =
            FailoverConnection::connect_with(two_host_config(), flaky_primary_connector())
                .unwrap();
        let epoch_before = facade.epoch();

        // Host 0's script is exhausted, so the query hits a dead socket;
        // the facade must transparently swap to host 1 and succeed there
        let result = facade.query("UPDATE t SET a = 1").unwrap();
        assert_eq!(result.affected_rows, 1);
        assert_eq!(facade.active_host_index(), Some(1));
        assert!(facade.epoch() > epoch_before);
    }

    #[test]
    fn test_failover_disabled_propagates_error() {
        let config = two_host_config().auto_reconnect(false);
        let facade =
            FailoverConnection::connect_with(config, flaky_primary_connector()).unwrap();
        let err = facade.query("SELECT 1").unwrap_err();
        assert!(err.is_connection_error());
        // No swap happened
        assert_eq!(facade.active_host_index(), Some(0));
    }

    #[test]
    fn test_all_hosts_down_is_terminal_until_reconnect() {
        // One host: the initial connect succeeds but the connection dies,
        // the failover reconnect is refused, and later connects succeed
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let connector: Connector = Box::new(move |config, host_index| {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            if call == 1 {
                return Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Refused,
                    message: "connection refused".to_string(),
                    source: None,
                }));
            }
            let mut script = connect_script();
            if call >= 2 {
                script.extend_from_slice(&packet(1, &ok_payload(0, 0, 0x0002)));
            }
            MySqlConnection::connect_script(config, host_index, script)
        });

        let config = MySqlConfig::new().user("root");
        let facade = FailoverConnection::connect_with(config, connector).unwrap();

        // The active connection dies and both reconnect attempts fail
        let err = facade.query("SELECT 1").unwrap_err();
        match &err {
            Error::Connection(e) => assert_eq!(e.kind, ConnectionErrorKind::AllHostsDown),
            other => panic!("expected AllHostsDown, got {other}"),
        }
        assert!(facade.is_all_down());

        // Every delegated call now fails identically, with no I/O
        let err = facade.ping().unwrap_err();
        match &err {
            Error::Connection(e) => assert_eq!(e.kind, ConnectionErrorKind::AllHostsDown),
            other => panic!("expected AllHostsDown, got {other}"),
        }

        // Explicit reconnect restores service
        facade.reconnect().unwrap();
        assert!(!facade.is_all_down());
        facade.query("SELECT 1").unwrap();
    }

    #[test]
    fn test_trigger_failover_swaps_on_request() {
        let connector: Connector = Box::new(|config, host_index| {
            MySqlConnection::connect_script(config, host_index, connect_script())
        });
        let facade =
            FailoverConnection::connect_with(two_host_config(), connector).unwrap();
        assert_eq!(facade.active_host_index(), Some(0));

        facade.trigger_failover().unwrap();
        assert_eq!(facade.active_host_index(), Some(1));
    }

    #[test]
    fn test_close_makes_facade_unusable() {
        let connector: Connector = Box::new(|config, host_index| {
            MySqlConnection::connect_script(config, host_index, connect_script())
        });
        let facade =
            FailoverConnection::connect_with(two_host_config(), connector).unwrap();
        facade.close();
        assert!(facade.query("SELECT 1").is_err());
    }

    #[test]
    fn test_connect_requires_hosts() {
        let mut config = MySqlConfig::new();
        config.hosts.clear();
        assert!(FailoverConnection::connect(config).is_err());
    }
}
