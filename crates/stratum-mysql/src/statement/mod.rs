//! Prepared statements.
//!
//! One statement type covers both execution paths:
//!
//! - **Client-side (emulated)**: parameters are escaped at bind time and
//!   inlined between the parse's static segments into a single text-protocol
//!   query.
//! - **Server-side (binary)**: the statement is prepared on the server and
//!   executed over COM_STMT_EXECUTE with typed binary parameters; streamed
//!   parameters travel ahead of the execute in COM_STMT_SEND_LONG_DATA
//!   chunks.
//!
//! Batches queue deep-copied parameter snapshots. At execute-batch time an
//! eligible INSERT folds into one multi-value statement, other client-side
//! batches may fold into one multi-statement query, and everything else
//! runs per-statement with `continue_batch_on_error` semantics.
//!
//! Every network operation goes through the owning failover facade, which
//! picks the active physical connection; after a swap the server-side
//! statement id is stale and the statement transparently re-prepares.

pub mod bind;
pub mod escape;
pub mod parser;
pub mod rewrite;

pub use bind::{BatchedParameterSet, BindValue, ParameterBindingStore};
pub use escape::EscapeMode;
pub use parser::{ParseOptions, ParsedStatement};

use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use stratum_core::error::{BatchError, QueryError, QueryErrorKind, StatementError, StatementErrorKind};
use stratum_core::{EXECUTE_FAILED, Error, Result, Row, SUCCESS_NO_INFO, Value};

use crate::connection::{ExecResult, MySqlConnection};
use crate::failover::FailoverConnection;
use crate::protocol::prepared::{BinaryParam, field_type_for_value};
use crate::statement::escape::{format_value_literal, hex_literal};
use crate::timeout::CancelGuard;
use crate::types::FieldType;

/// Flags shared between a statement, the facade's statement registry, and
/// in-flight cancel tasks.
#[derive(Debug, Default)]
pub struct StatementShared {
    /// Set by the facade after a swap: the server-side statement id is
    /// connection-scoped and must be re-prepared before next use
    pub(crate) needs_reprepare: AtomicBool,
    /// Set by an external cancel request
    pub(crate) cancelled: AtomicBool,
    /// Set by the timeout cancel task
    pub(crate) cancelled_by_timeout: AtomicBool,
}

/// Server-side statement identity, valid for one facade epoch.
struct ServerState {
    statement_id: u32,
    /// Facade epoch the statement was prepared at
    epoch: u64,
}

enum StatementKind {
    Client,
    Server(ServerState),
}

/// A prepared statement bound to a logical (failover) connection.
pub struct PreparedStatement {
    conn: Arc<FailoverConnection>,
    parsed: ParsedStatement,
    bindings: ParameterBindingStore,
    batch: Vec<BatchedParameterSet>,
    kind: StatementKind,
    shared: Arc<StatementShared>,
    timeout: Option<Duration>,
    escape_mode: EscapeMode,
    /// Session comment block prefixed to client-side statement text
    comment_prefix: Option<Vec<u8>>,
    closed: bool,
}

impl PreparedStatement {
    /// Parse (and, for the server-side path, prepare) a statement.
    pub(crate) fn new(conn: Arc<FailoverConnection>, sql: &str) -> Result<Self> {
        let config = conn.driver_config();
        // The session may have NO_BACKSLASH_ESCAPES enabled server-side
        // even when the configuration does not ask for it
        let no_backslash_escapes = config.no_backslash_escapes
            || conn
                .with_active(|active| Ok(active.no_backslash_escapes()))
                .unwrap_or(false);
        let escape_mode = EscapeMode {
            no_backslash_escapes,
            ansi_quotes: config.ansi_quotes,
        };
        let options = ParseOptions {
            no_backslash_escapes,
            ansi_quotes: config.ansi_quotes,
            build_rewrite_info: config.rewrite_batched_statements,
        };
        let parsed = ParsedStatement::parse(sql, options)?;

        // LOAD DATA drives the local-file sub-protocol and cannot be
        // server-prepared
        let kind = if config.use_server_prepare && !parsed.is_load_data() {
            let (prepared, epoch) = server_prepare(&conn, sql)?;
            StatementKind::Server(ServerState {
                statement_id: prepared.statement_id,
                epoch,
            })
        } else {
            StatementKind::Client
        };

        let shared = Arc::new(StatementShared::default());
        conn.register_statement(&shared);

        let comment_prefix = config
            .statement_comment
            .as_ref()
            .map(|comment| format!("/* {comment} */ ").into_bytes());

        let parameter_count = parsed.parameter_count();
        Ok(Self {
            conn,
            parsed,
            bindings: ParameterBindingStore::new(parameter_count),
            batch: Vec::new(),
            kind,
            shared,
            timeout: None,
            escape_mode,
            comment_prefix,
            closed: false,
        })
    }

    /// The parse backing this statement.
    pub fn parsed(&self) -> &ParsedStatement {
        &self.parsed
    }

    /// Number of `?` placeholders.
    pub fn parameter_count(&self) -> usize {
        self.bindings.parameter_count()
    }

    /// Set the per-execution timeout. `None` disables it.
    pub fn set_query_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout.filter(|t| !t.is_zero());
    }

    // === Parameter binding ===

    /// Bind a value to the 1-based parameter `index`.
    pub fn set_value(&mut self, index: usize, value: Value) -> Result<()> {
        if value.is_null() {
            return self.set_null(index);
        }
        match &self.kind {
            StatementKind::Client => self
                .bindings
                .set_text(index, format_value_literal(&value, self.escape_mode)),
            StatementKind::Server(_) => {
                let field_type = field_type_for_value(&value);
                self.bindings.set_binary(index, value, field_type)
            }
        }
    }

    /// Bind SQL NULL.
    pub fn set_null(&mut self, index: usize) -> Result<()> {
        self.bindings.set_null(index, FieldType::Null)
    }

    /// Bind a streamed long-data source. `length` of -1 means unknown.
    pub fn set_stream(
        &mut self,
        index: usize,
        reader: Box<dyn Read + Send>,
        length: i64,
    ) -> Result<()> {
        self.bindings.set_stream(index, reader, length)
    }

    /// Reset every parameter to unset.
    pub fn clear_parameters(&mut self) {
        self.bindings.clear();
    }

    // === Execution ===

    /// Execute with the currently-bound parameters.
    pub fn execute(&mut self) -> Result<ExecResult> {
        self.ensure_open()?;
        self.bindings.check_all_set()?;

        let guard = self.arm_timeout();
        let result = self.execute_once();
        drop(guard);
        self.resolve_cancellation(result)
    }

    /// Execute and return the decoded rows.
    pub fn execute_query(&mut self) -> Result<Vec<Row>> {
        self.execute().map(|result| result.rows)
    }

    /// Execute and return the affected-row count.
    pub fn execute_update(&mut self) -> Result<u64> {
        self.execute().map(|result| result.affected_rows)
    }

    /// Request cancellation of the in-flight execution.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        if let Some(connection_id) = self.conn.active_connection_id() {
            self.conn.kill_query(connection_id);
        }
    }

    fn execute_once(&mut self) -> Result<ExecResult> {
        let mut set = self.bindings.snapshot()?;
        let result = self.execute_set(&mut set);
        self.bindings.note_execution();
        result
    }

    fn execute_set(&mut self, set: &mut BatchedParameterSet) -> Result<ExecResult> {
        if matches!(self.kind, StatementKind::Client) {
            self.client_execute_set(set)
        } else {
            self.server_execute_set(set)
        }
    }

    fn client_execute_set(&self, set: &mut BatchedParameterSet) -> Result<ExecResult> {
        let literals = render_text_values(set.values_mut(), self.escape_mode)?;
        let refs: Vec<&[u8]> = literals.iter().map(Vec::as_slice).collect();
        let sql = self.with_comment(self.parsed.assemble(&refs)?);
        self.conn.with_active(|conn| conn.query(&sql))
    }

    /// Prefix the configured session comment block, if any.
    fn with_comment(&self, sql: Vec<u8>) -> Vec<u8> {
        match &self.comment_prefix {
            Some(prefix) => {
                let mut out = Vec::with_capacity(prefix.len() + sql.len());
                out.extend_from_slice(prefix);
                out.extend_from_slice(&sql);
                out
            }
            None => sql,
        }
    }

    fn server_execute_set(&mut self, set: &mut BatchedParameterSet) -> Result<ExecResult> {
        let config = self.conn.driver_config();
        let chunk_size = config.blob_send_chunk_size;
        let auto_reconnect = config.auto_reconnect;
        let max_attempts = config.hosts.len();

        let mut attempts = 0usize;
        loop {
            let (conn_arc, epoch) = self.conn.checkout()?;
            let mut conn = conn_arc.lock().unwrap_or_else(|e| e.into_inner());

            // Statement ids are connection-scoped: re-prepare after a swap
            if let Err(e) = self.ensure_prepared(&mut conn, epoch) {
                if e.is_connection_error() && auto_reconnect && attempts < max_attempts {
                    drop(conn);
                    self.conn.fail_over(epoch)?;
                    attempts += 1;
                    continue;
                }
                return Err(e);
            }
            let StatementKind::Server(state) = &self.kind else {
                unreachable!("server execution on client statement")
            };
            let statement_id = state.statement_id;

            // A stream was rebound across executions: stale long data may
            // be buffered server-side, discard it first
            if self.bindings.take_long_parameter_switch() {
                conn.reset_statement(statement_id)?;
            }

            // Ship streamed parameters ahead of the execute
            for (i, slot) in set.values_mut().iter_mut().enumerate() {
                if let BindValue::Stream { reader, length } = slot {
                    conn.send_long_data(statement_id, i as u16, reader, *length, chunk_size)?;
                    *slot = BindValue::LongDataSent;
                }
            }

            let send_types = self.bindings.send_types_to_server();
            let result = {
                let params = binary_params(set)?;
                conn.execute_prepared(statement_id, &params, send_types)
            };

            match result {
                Ok(exec) => {
                    drop(conn);
                    self.bindings.mark_types_sent();
                    return Ok(exec);
                }
                Err(e) if e.is_connection_error() && auto_reconnect && attempts < max_attempts => {
                    drop(conn);
                    self.conn.fail_over(epoch)?;
                    attempts += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Re-prepare on the given connection when the statement was marked
    /// stale or was prepared at an older facade epoch.
    fn ensure_prepared(&mut self, conn: &mut MySqlConnection, epoch: u64) -> Result<()> {
        let StatementKind::Server(state) = &mut self.kind else {
            return Ok(());
        };
        if !self.shared.needs_reprepare.load(Ordering::SeqCst) && state.epoch == epoch {
            return Ok(());
        }

        let prepared = conn.prepare(self.parsed.sql().as_bytes())?;
        state.statement_id = prepared.statement_id;
        state.epoch = epoch;
        self.shared.needs_reprepare.store(false, Ordering::SeqCst);
        // The new server statement has no cached parameter types
        self.bindings.require_type_resend();
        tracing::debug!(
            statement_id = prepared.statement_id,
            "statement re-prepared after connection swap"
        );
        Ok(())
    }

    // === Batching ===

    /// Snapshot the bound parameters onto the batch queue.
    pub fn add_batch(&mut self) -> Result<()> {
        self.ensure_open()?;
        let snapshot = self.bindings.snapshot()?;
        self.batch.push(snapshot);
        Ok(())
    }

    /// Discard queued batch entries.
    pub fn clear_batch(&mut self) {
        self.batch.clear();
    }

    /// Number of queued batch entries.
    pub fn batch_len(&self) -> usize {
        self.batch.len()
    }

    /// Execute the queued batch.
    ///
    /// Returns one update count per entry. Eligible INSERTs fold into a
    /// single multi-value statement (entries report [`SUCCESS_NO_INFO`]);
    /// ineligible statements fall back silently to per-statement
    /// execution, where a failing entry reports [`EXECUTE_FAILED`] and
    /// `continue_batch_on_error` decides whether the rest still run.
    pub fn execute_batch(&mut self) -> Result<Vec<i64>> {
        self.ensure_open()?;
        if self.batch.is_empty() {
            return Ok(Vec::new());
        }
        let sets = std::mem::take(&mut self.batch);

        let guard = self.arm_timeout();
        let result = self.execute_batch_inner(sets);
        drop(guard);
        self.resolve_cancellation(result)
    }

    fn execute_batch_inner(&mut self, sets: Vec<BatchedParameterSet>) -> Result<Vec<i64>> {
        let config = self.conn.driver_config();
        let rewrite_enabled = config.rewrite_batched_statements;
        let continue_on_error = config.continue_batch_on_error;

        if rewrite_enabled && matches!(self.kind, StatementKind::Client) && sets.len() > 1 {
            if self.parsed.batch_bundle().is_some() {
                if let Some(folded) = self.try_fold_multi_value(&sets)? {
                    return self.execute_batch_rewritten(folded, sets.len());
                }
            } else {
                return self.execute_batch_multi_statement(sets);
            }
        }

        self.execute_batch_sequential(sets, continue_on_error)
    }

    /// Assemble the N-row multi-value statement, or `None` when the
    /// rewrite turns out unsafe (placeholder counts disagree), in which
    /// case the caller falls back to per-statement execution.
    fn try_fold_multi_value(&self, sets: &[BatchedParameterSet]) -> Result<Option<Vec<u8>>> {
        let rewritten = rewrite::build(&self.parsed, sets.len())?;
        if rewritten.parameter_count() != sets.len() * self.parsed.parameter_count() {
            return Ok(None);
        }

        let mut literals = Vec::with_capacity(rewritten.parameter_count());
        for set in sets {
            literals.extend(render_text_values_copied(set.values(), self.escape_mode)?);
        }
        let refs: Vec<&[u8]> = literals.iter().map(Vec::as_slice).collect();
        Ok(Some(rewritten.assemble(&refs)?))
    }

    fn execute_batch_rewritten(&mut self, sql: Vec<u8>, entries: usize) -> Result<Vec<i64>> {
        let sql = self.with_comment(sql);
        match self.conn.with_active(|conn| conn.query(&sql)) {
            Ok(_) => Ok(vec![SUCCESS_NO_INFO; entries]),
            Err(e) => Err(Error::Batch(BatchError {
                message: format!("multi-value batch failed: {e}"),
                update_counts: vec![EXECUTE_FAILED; entries],
                cause: Box::new(e),
            })),
        }
    }

    /// Fold a non-INSERT client batch into one `;`-joined multi-statement
    /// query and map each result onto its entry.
    fn execute_batch_multi_statement(
        &mut self,
        mut sets: Vec<BatchedParameterSet>,
    ) -> Result<Vec<i64>> {
        let mut statements = Vec::with_capacity(sets.len());
        for set in &mut sets {
            let literals = render_text_values(set.values_mut(), self.escape_mode)?;
            let refs: Vec<&[u8]> = literals.iter().map(Vec::as_slice).collect();
            statements.push(self.parsed.assemble(&refs)?);
        }
        let joined = self.with_comment(statements.join(&b";"[..]));

        let (conn_arc, _) = self.conn.checkout()?;
        let mut conn = conn_arc.lock().unwrap_or_else(|e| e.into_inner());
        let (results, failure) = conn.query_multi(&joined);
        drop(conn);

        let mut counts: Vec<i64> = results
            .iter()
            .map(|result| result.affected_rows as i64)
            .collect();

        if let Some(e) = failure {
            counts.push(EXECUTE_FAILED);
            return Err(Error::Batch(BatchError {
                message: format!("batch entry {} failed: {e}", counts.len()),
                update_counts: counts,
                cause: Box::new(e),
            }));
        }
        Ok(counts)
    }

    fn execute_batch_sequential(
        &mut self,
        sets: Vec<BatchedParameterSet>,
        continue_on_error: bool,
    ) -> Result<Vec<i64>> {
        let total = sets.len();
        let mut counts: Vec<i64> = Vec::with_capacity(total);
        let mut first_error: Option<Error> = None;

        for mut set in sets {
            match self.execute_set(&mut set) {
                Ok(result) => counts.push(result.affected_rows as i64),
                Err(e) => {
                    counts.push(EXECUTE_FAILED);
                    // Timeouts, cancellations, and deadlock rollbacks abort
                    // regardless of continue_batch_on_error
                    if !continue_on_error || e.aborts_batch() {
                        return Err(Error::Batch(BatchError {
                            message: format!("batch entry {} failed: {e}", counts.len()),
                            update_counts: counts,
                            cause: Box::new(e),
                        }));
                    }
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            let failed = counts.iter().filter(|&&c| c == EXECUTE_FAILED).count();
            return Err(Error::Batch(BatchError {
                message: format!("{failed} of {total} batch entries failed"),
                update_counts: counts,
                cause: Box::new(e),
            }));
        }
        Ok(counts)
    }

    // === Cancellation ===

    fn arm_timeout(&self) -> Option<CancelGuard> {
        if !self.conn.driver_config().enable_query_timeouts {
            return None;
        }
        let timeout = self.timeout?;
        let connection_id = self.conn.active_connection_id()?;

        let shared = Arc::clone(&self.shared);
        let conn = Arc::clone(&self.conn);
        Some(self.conn.timer().schedule(timeout, move || {
            shared.cancelled_by_timeout.store(true, Ordering::SeqCst);
            tracing::warn!(connection_id, "statement timeout expired, cancelling");
            conn.kill_query(connection_id);
        }))
    }

    /// Convert a completed execution according to the cancelled flags,
    /// resetting them so the statement stays reusable.
    fn resolve_cancellation<T>(&self, result: Result<T>) -> Result<T> {
        if self.shared.cancelled_by_timeout.swap(false, Ordering::SeqCst) {
            self.shared.cancelled.store(false, Ordering::SeqCst);
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Timeout,
                message: "statement timed out and was cancelled".to_string(),
                sqlstate: None,
                sql: Some(self.parsed.sql().to_string()),
                source: result.err().map(|e| Box::new(e) as _),
            }));
        }
        if self.shared.cancelled.swap(false, Ordering::SeqCst) {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Cancelled,
                message: "statement was cancelled".to_string(),
                sqlstate: None,
                sql: Some(self.parsed.sql().to_string()),
                source: result.err().map(|e| Box::new(e) as _),
            }));
        }
        result
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Statement(StatementError {
                kind: StatementErrorKind::Malformed,
                message: "statement is closed".to_string(),
            }));
        }
        Ok(())
    }

    /// Release the server-side statement (best effort).
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let StatementKind::Server(state) = &self.kind {
            // Only close ids that are still valid on the active connection
            if !self.shared.needs_reprepare.load(Ordering::SeqCst)
                && state.epoch == self.conn.epoch()
            {
                let statement_id = state.statement_id;
                let _ = self
                    .conn
                    .with_active(|conn| conn.close_statement(statement_id));
            }
        }
    }
}

impl Drop for PreparedStatement {
    fn drop(&mut self) {
        self.close();
    }
}

/// Prepare server-side through the facade, remembering the epoch of the
/// connection the statement id belongs to.
fn server_prepare(
    conn: &Arc<FailoverConnection>,
    sql: &str,
) -> Result<(crate::connection::ServerPrepareResult, u64)> {
    let auto_reconnect = conn.driver_config().auto_reconnect;
    let max_attempts = conn.driver_config().hosts.len();

    let mut attempts = 0usize;
    loop {
        let (conn_arc, epoch) = conn.checkout()?;
        let mut guard = conn_arc.lock().unwrap_or_else(|e| e.into_inner());
        match guard.prepare(sql.as_bytes()) {
            Ok(prepared) => return Ok((prepared, epoch)),
            Err(e) if e.is_connection_error() && auto_reconnect && attempts < max_attempts => {
                drop(guard);
                conn.fail_over(epoch)?;
                attempts += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Render snapshot slots into text-protocol literals, consuming stream
/// slots (they are read fully and inlined as hex literals).
fn render_text_values(values: &mut [BindValue], mode: EscapeMode) -> Result<Vec<Vec<u8>>> {
    values
        .iter_mut()
        .map(|slot| match slot {
            BindValue::Unset => Err(not_set()),
            BindValue::Null { .. } => Ok(b"NULL".to_vec()),
            BindValue::Text(bytes) => Ok(bytes.clone()),
            BindValue::Binary { value, .. } => Ok(format_value_literal(value, mode)),
            BindValue::Stream { reader, length } => {
                let mut data = Vec::new();
                let read_result = if *length >= 0 {
                    reader.by_ref().take(*length as u64).read_to_end(&mut data)
                } else {
                    reader.read_to_end(&mut data)
                };
                read_result.map_err(|e| {
                    Error::Query(QueryError {
                        kind: QueryErrorKind::DataTransfer,
                        message: format!("I/O error while reading parameter stream: {e}"),
                        sqlstate: None,
                        sql: None,
                        source: Some(Box::new(e)),
                    })
                })?;
                let literal = hex_literal(&data);
                *slot = BindValue::Text(literal.clone());
                Ok(literal)
            }
            BindValue::LongDataSent => Err(Error::Custom(
                "stream parameter was already consumed".to_string(),
            )),
        })
        .collect()
}

/// Render without mutating: used when folding a batch, where snapshots are
/// walked read-only. Stream slots cannot be copied and make the fold
/// ineligible, which the caller treats as a silent fallback.
fn render_text_values_copied(values: &[BindValue], mode: EscapeMode) -> Result<Vec<Vec<u8>>> {
    values
        .iter()
        .map(|slot| match slot {
            BindValue::Unset => Err(not_set()),
            BindValue::Null { .. } => Ok(b"NULL".to_vec()),
            BindValue::Text(bytes) => Ok(bytes.clone()),
            BindValue::Binary { value, .. } => Ok(format_value_literal(value, mode)),
            BindValue::Stream { .. } | BindValue::LongDataSent => Err(Error::Custom(
                "stream parameters cannot join a folded batch".to_string(),
            )),
        })
        .collect()
}

/// Map snapshot slots onto the COM_STMT_EXECUTE parameter view.
fn binary_params(set: &BatchedParameterSet) -> Result<Vec<BinaryParam<'_>>> {
    set.values()
        .iter()
        .map(|slot| match slot {
            BindValue::Unset => Err(not_set()),
            BindValue::Null { field_type } => Ok(BinaryParam::Null {
                field_type: *field_type,
            }),
            BindValue::Binary { value, field_type } => Ok(BinaryParam::Value {
                value,
                field_type: *field_type,
            }),
            BindValue::Stream { .. } | BindValue::LongDataSent => Ok(BinaryParam::LongData {
                field_type: FieldType::Blob,
            }),
            BindValue::Text(_) => Err(Error::Custom(
                "text-bound parameter in binary execution".to_string(),
            )),
        })
        .collect()
}

fn not_set() -> Error {
    Error::Statement(StatementError {
        kind: StatementErrorKind::ParameterNotSet,
        message: "parameter is not set".to_string(),
    })
}
