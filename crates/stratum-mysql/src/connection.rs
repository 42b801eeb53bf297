//! Physical MySQL connection.
//!
//! Implements the wire-level connection: TCP connect, handshake and
//! authentication, COM_QUERY with text result sets, and the server-side
//! prepared-statement sub-protocol (prepare / long data / execute / reset /
//! close) with binary result sets.
//!
//! I/O is synchronous and blocking; callers serialize access per
//! connection with a mutex. The failover facade owns instances of this
//! type and decides which one is active.

#![allow(clippy::cast_possible_truncation)]

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use stratum_core::error::{
    ConnectionError, ConnectionErrorKind, ProtocolError, QueryError, QueryErrorKind,
};
use stratum_core::{Error, Result, Row, Value};

use crate::auth;
use crate::config::MySqlConfig;
use crate::protocol::prepared::BinaryParam;
use crate::protocol::{
    Command, ErrPacket, MAX_PACKET_SIZE, PacketHeader, PacketReader, PacketType, PacketWriter,
    build_long_data_packet, build_stmt_close_packet, build_stmt_execute_packet,
    build_stmt_prepare_packet, build_stmt_reset_packet, capabilities, parse_stmt_prepare_ok,
    server_status,
};
use crate::types::{ColumnDef, FieldType, decode_text_value, read_binary_value};

/// Connection state in the MySQL protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// TCP connection established, awaiting handshake
    Connecting,
    /// Performing authentication handshake
    Authenticating,
    /// Ready for queries
    Ready,
    /// Currently executing a query
    InQuery,
    /// In a transaction
    InTransaction,
    /// Connection has been closed
    Closed,
}

/// Server capabilities received during the handshake.
#[derive(Debug, Clone)]
pub struct ServerCapabilities {
    /// Server capability flags
    pub capabilities: u32,
    /// Protocol version
    pub protocol_version: u8,
    /// Server version string
    pub server_version: String,
    /// Connection ID
    pub connection_id: u32,
    /// Authentication plugin name
    pub auth_plugin: String,
    /// Authentication data (scramble)
    pub auth_data: Vec<u8>,
    /// Server status flags
    pub status_flags: u16,
}

/// The outcome of one statement execution.
///
/// Carries decoded rows with their field metadata for result statements,
/// and the affected-row bookkeeping for update statements. This is the
/// boundary handed to result-set materialization.
#[derive(Debug, Default)]
pub struct ExecResult {
    /// Result column metadata, in column order
    pub columns: Vec<ColumnDef>,
    /// Decoded rows, in arrival order
    pub rows: Vec<Row>,
    /// Number of affected rows
    pub affected_rows: u64,
    /// Last insert ID
    pub last_insert_id: u64,
    /// Warning count
    pub warnings: u16,
    /// The server announced another result set follows
    pub more_results: bool,
}

/// Server response to COM_STMT_PREPARE with its metadata packets.
#[derive(Debug)]
pub struct ServerPrepareResult {
    /// Connection-scoped statement ID
    pub statement_id: u32,
    /// Parameter definitions
    pub params: Vec<ColumnDef>,
    /// Result column definitions
    pub columns: Vec<ColumnDef>,
}

/// The transport under a connection.
///
/// Production traffic uses TCP; tests drive the protocol over a scripted
/// in-memory stream.
enum Stream {
    Tcp(TcpStream),
    #[cfg(test)]
    Script(ScriptStream),
}

impl Stream {
    fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(stream) => stream.read_exact(buf),
            #[cfg(test)]
            Stream::Script(stream) => stream.read_exact(buf),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(stream) => stream.write_all(buf),
            #[cfg(test)]
            Stream::Script(stream) => stream.write_all(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(stream) => stream.flush(),
            #[cfg(test)]
            Stream::Script(_) => Ok(()),
        }
    }
}

/// Scripted transport: replays a fixed byte sequence on read and records
/// everything written.
#[cfg(test)]
pub(crate) struct ScriptStream {
    input: std::io::Cursor<Vec<u8>>,
    pub(crate) written: Vec<u8>,
}

#[cfg(test)]
impl ScriptStream {
    pub(crate) fn new(script: Vec<u8>) -> Self {
        Self {
            input: std::io::Cursor::new(script),
            written: Vec::new(),
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        std::io::Read::read_exact(&mut self.input, buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.written.extend_from_slice(buf);
        Ok(())
    }
}

/// One physical MySQL connection.
pub struct MySqlConnection {
    stream: Stream,
    state: ConnectionState,
    server_caps: Option<ServerCapabilities>,
    /// Negotiated capability intersection
    client_caps: u32,
    connection_id: u32,
    status_flags: u16,
    affected_rows: u64,
    last_insert_id: u64,
    warnings: u16,
    config: MySqlConfig,
    /// Which entry of `config.hosts` this connection serves
    host_index: usize,
    sequence_id: u8,
}

impl std::fmt::Debug for MySqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConnection")
            .field("state", &self.state)
            .field("connection_id", &self.connection_id)
            .field("host_index", &self.host_index)
            .finish_non_exhaustive()
    }
}

impl MySqlConnection {
    /// Establish a connection to `config.hosts[host_index]`.
    ///
    /// Performs the complete handshake: TCP connect, server handshake,
    /// handshake response with authentication, and the auth result
    /// exchange (including auth switch).
    pub fn connect(config: &MySqlConfig, host_index: usize) -> Result<Self> {
        let host = config.hosts.get(host_index).ok_or_else(|| {
            connection_error(format!("no host configured at index {host_index}"))
        })?;

        let addr = (host.host.as_str(), host.port)
            .to_socket_addrs()
            .map_err(|e| {
                Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Connect,
                    message: format!("failed to resolve {}: {}", host.address(), e),
                    source: Some(Box::new(e)),
                })
            })?
            .next()
            .ok_or_else(|| connection_error(format!("no address for {}", host.address())))?;

        let stream =
            TcpStream::connect_timeout(&addr, config.connect_timeout).map_err(|e| {
                let kind = if e.kind() == std::io::ErrorKind::ConnectionRefused {
                    ConnectionErrorKind::Refused
                } else {
                    ConnectionErrorKind::Connect
                };
                Error::Connection(ConnectionError {
                    kind,
                    message: format!("failed to connect to {}: {}", host.address(), e),
                    source: Some(Box::new(e)),
                })
            })?;

        stream.set_nodelay(true).ok();
        stream.set_read_timeout(Some(config.connect_timeout)).ok();
        stream.set_write_timeout(Some(config.connect_timeout)).ok();

        let mut conn = Self::from_stream(Stream::Tcp(stream), config.clone(), host_index);
        conn.handshake()?;
        Ok(conn)
    }

    /// Build a connection over a scripted stream and run the handshake.
    #[cfg(test)]
    pub(crate) fn connect_script(
        config: &MySqlConfig,
        host_index: usize,
        script: Vec<u8>,
    ) -> Result<Self> {
        let mut conn = Self::from_stream(
            Stream::Script(ScriptStream::new(script)),
            config.clone(),
            host_index,
        );
        conn.handshake()?;
        Ok(conn)
    }

    fn from_stream(stream: Stream, config: MySqlConfig, host_index: usize) -> Self {
        Self {
            stream,
            state: ConnectionState::Connecting,
            server_caps: None,
            client_caps: 0,
            connection_id: 0,
            status_flags: 0,
            affected_rows: 0,
            last_insert_id: 0,
            warnings: 0,
            config,
            host_index,
            sequence_id: 0,
        }
    }

    fn handshake(&mut self) -> Result<()> {
        let server_caps = self.read_handshake()?;
        self.connection_id = server_caps.connection_id;
        self.status_flags = server_caps.status_flags;
        self.client_caps = self.config.capability_flags() & server_caps.capabilities;
        self.server_caps = Some(server_caps);
        self.state = ConnectionState::Authenticating;

        self.send_handshake_response()?;
        self.handle_auth_result()?;

        self.state = ConnectionState::Ready;
        tracing::debug!(
            connection_id = self.connection_id,
            host_index = self.host_index,
            server = self.server_version().unwrap_or(""),
            "connection established"
        );
        Ok(())
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if the connection is ready for statements.
    pub fn is_ready(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Ready | ConnectionState::InTransaction
        )
    }

    /// Get the server-assigned connection ID (the `KILL QUERY` target).
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    /// Which configured host this connection serves.
    pub fn host_index(&self) -> usize {
        self.host_index
    }

    /// Get the server version.
    pub fn server_version(&self) -> Option<&str> {
        self.server_caps
            .as_ref()
            .map(|caps| caps.server_version.as_str())
    }

    /// Number of affected rows from the last statement.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    /// Last insert ID.
    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    /// Warning count from the last statement.
    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    /// Whether the session runs with `NO_BACKSLASH_ESCAPES`, from either
    /// configuration or the server status flags.
    pub fn no_backslash_escapes(&self) -> bool {
        self.config.no_backslash_escapes
            || self.status_flags & server_status::SERVER_STATUS_NO_BACKSLASH_ESCAPES != 0
    }

    // === Handshake ===

    fn read_handshake(&mut self) -> Result<ServerCapabilities> {
        let (payload, _) = self.read_packet()?;
        let mut reader = PacketReader::new(&payload);

        let protocol_version = reader
            .read_u8()
            .ok_or_else(|| protocol_error("missing protocol version"))?;
        if protocol_version == 0xFF {
            let err = PacketReader::new(&payload)
                .parse_err_packet()
                .ok_or_else(|| protocol_error("invalid pre-auth error packet"))?;
            return Err(auth_error(format!(
                "server rejected connection: {} ({})",
                err.error_message, err.error_code
            )));
        }
        if protocol_version != 10 {
            return Err(protocol_error(format!(
                "unsupported protocol version: {protocol_version}"
            )));
        }

        let server_version = reader
            .read_null_string()
            .ok_or_else(|| protocol_error("missing server version"))?;
        let connection_id = reader
            .read_u32_le()
            .ok_or_else(|| protocol_error("missing connection ID"))?;

        // Auth plugin data part 1 (8 bytes) + filler
        let auth_data_1 = reader
            .read_bytes(8)
            .ok_or_else(|| protocol_error("missing auth data"))?
            .to_vec();
        reader.skip(1);

        let caps_lower = reader
            .read_u16_le()
            .ok_or_else(|| protocol_error("missing capability flags"))?;

        // Charset byte (unused; we always request utf8mb4)
        let _ = reader.read_u8();
        let status_flags = reader.read_u16_le().unwrap_or(0);
        let caps_upper = reader.read_u16_le().unwrap_or(0);
        let server_capabilities = u32::from(caps_lower) | (u32::from(caps_upper) << 16);

        let auth_data_len = if server_capabilities & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            reader.read_u8().unwrap_or(0) as usize
        } else {
            0
        };

        // Reserved
        reader.skip(10);

        // Auth plugin data part 2 (if CLIENT_SECURE_CONNECTION)
        let mut auth_data = auth_data_1;
        if server_capabilities & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            let len2 = if auth_data_len > 8 {
                auth_data_len - 8
            } else {
                13
            };
            if let Some(data2) = reader.read_bytes(len2) {
                let data2 = if data2.last() == Some(&0) {
                    &data2[..data2.len() - 1]
                } else {
                    data2
                };
                auth_data.extend_from_slice(data2);
            }
        }

        let auth_plugin = if server_capabilities & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            reader.read_null_string().unwrap_or_default()
        } else {
            auth::plugins::MYSQL_NATIVE_PASSWORD.to_string()
        };

        Ok(ServerCapabilities {
            capabilities: server_capabilities,
            protocol_version,
            server_version,
            connection_id,
            auth_plugin,
            auth_data,
            status_flags,
        })
    }

    fn send_handshake_response(&mut self) -> Result<()> {
        let server_caps = self
            .server_caps
            .as_ref()
            .ok_or_else(|| protocol_error("no server handshake received"))?;

        let auth_response =
            self.compute_auth_response(&server_caps.auth_plugin, &server_caps.auth_data)?;
        let auth_plugin = server_caps.auth_plugin.clone();
        let client_caps = self.client_caps;

        let mut writer = PacketWriter::new();
        writer.write_u32_le(client_caps);
        writer.write_u32_le(self.config.max_packet_size);
        writer.write_u8(self.config.charset);
        writer.write_zeros(23);
        writer.write_null_string(&self.config.user);

        if client_caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            writer.write_lenenc_bytes(&auth_response);
        } else if client_caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            writer.write_u8(auth_response.len() as u8);
            writer.write_bytes(&auth_response);
        } else {
            writer.write_bytes(&auth_response);
            writer.write_u8(0);
        }

        if client_caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
            match &self.config.database {
                Some(db) => writer.write_null_string(db),
                None => writer.write_u8(0),
            }
        }

        if client_caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            writer.write_null_string(&auth_plugin);
        }

        if client_caps & capabilities::CLIENT_CONNECT_ATTRS != 0
            && !self.config.attributes.is_empty()
        {
            let mut attrs = PacketWriter::new();
            for (key, value) in &self.config.attributes {
                attrs.write_lenenc_string(key);
                attrs.write_lenenc_string(value);
            }
            writer.write_lenenc_bytes(attrs.as_bytes());
        }

        self.write_packet(writer.as_bytes())
    }

    fn compute_auth_response(&self, plugin: &str, auth_data: &[u8]) -> Result<Vec<u8>> {
        let password = self.config.password.as_deref().unwrap_or("");

        match plugin {
            auth::plugins::MYSQL_NATIVE_PASSWORD => {
                Ok(auth::mysql_native_password(password, auth_data))
            }
            auth::plugins::CACHING_SHA2_PASSWORD => {
                Ok(auth::caching_sha2_password(password, auth_data))
            }
            auth::plugins::MYSQL_CLEAR_PASSWORD => Ok(auth::clear_password(password)),
            other => Err(auth_error(format!(
                "unsupported authentication plugin: {other}"
            ))),
        }
    }

    fn handle_auth_result(&mut self) -> Result<()> {
        let (payload, _) = self.read_packet()?;
        if payload.is_empty() {
            return Err(protocol_error("empty authentication response"));
        }

        match PacketType::from_first_byte(payload[0], payload.len() as u32) {
            PacketType::Ok => {
                let mut reader = PacketReader::new(&payload);
                if let Some(ok) = reader.parse_ok_packet() {
                    self.status_flags = ok.status_flags;
                }
                Ok(())
            }
            PacketType::Error => {
                let mut reader = PacketReader::new(&payload);
                let err = reader
                    .parse_err_packet()
                    .ok_or_else(|| protocol_error("invalid error packet"))?;
                Err(auth_error(format!(
                    "authentication failed: {} ({})",
                    err.error_message, err.error_code
                )))
            }
            PacketType::Eof => self.handle_auth_switch(&payload[1..]),
            _ => self.handle_additional_auth(&payload),
        }
    }

    fn handle_auth_switch(&mut self, data: &[u8]) -> Result<()> {
        let mut reader = PacketReader::new(data);
        let plugin = reader
            .read_null_string()
            .ok_or_else(|| protocol_error("missing plugin name in auth switch"))?;
        let auth_data = reader.read_rest();

        let response = self.compute_auth_response(&plugin, auth_data)?;
        self.write_packet(&response)?;
        self.handle_auth_result()
    }

    fn handle_additional_auth(&mut self, data: &[u8]) -> Result<()> {
        match data.get(1).copied().or_else(|| data.first().copied()) {
            Some(auth::caching_sha2::FAST_AUTH_SUCCESS) => {
                // Fast auth succeeded, the final OK follows
                let (payload, _) = self.read_packet()?;
                let mut reader = PacketReader::new(&payload);
                if let Some(ok) = reader.parse_ok_packet() {
                    self.status_flags = ok.status_flags;
                }
                Ok(())
            }
            Some(auth::caching_sha2::PERFORM_FULL_AUTH) => Err(auth_error(
                "caching_sha2_password full authentication requires a secure channel",
            )),
            _ => {
                let mut reader = PacketReader::new(data);
                if let Some(ok) = reader.parse_ok_packet() {
                    self.status_flags = ok.status_flags;
                    Ok(())
                } else {
                    Err(protocol_error(format!(
                        "unexpected auth response: {:02X?}",
                        data.first()
                    )))
                }
            }
        }
    }

    // === Text protocol ===

    /// Execute raw statement bytes over the text protocol.
    pub fn query(&mut self, sql: &[u8]) -> Result<ExecResult> {
        self.start_statement()?;
        self.write_command(Command::Query, sql)?;
        let result = self.read_response(false);
        self.finish_statement(&result);
        result
    }

    /// Execute a multi-statement query, collecting one result per
    /// statement. Returns the results read so far plus the error that
    /// interrupted the sequence, if any.
    pub fn query_multi(&mut self, sql: &[u8]) -> (Vec<ExecResult>, Option<Error>) {
        let mut results = Vec::new();

        if let Err(e) = self
            .start_statement()
            .and_then(|()| self.write_command(Command::Query, sql))
        {
            return (results, Some(e));
        }

        loop {
            match self.read_response(false) {
                Ok(result) => {
                    let more = result.more_results;
                    results.push(result);
                    if !more {
                        break;
                    }
                }
                Err(e) => {
                    if self.state == ConnectionState::InQuery {
                        self.state = ConnectionState::Ready;
                    }
                    return (results, Some(e));
                }
            }
        }

        let ok: Result<ExecResult> = Ok(ExecResult::default());
        self.finish_statement(&ok);
        (results, None)
    }

    /// Ping the server.
    pub fn ping(&mut self) -> Result<()> {
        self.write_command(Command::Ping, &[])?;
        let (payload, _) = self.read_packet()?;
        if payload.first() == Some(&0x00) {
            Ok(())
        } else {
            Err(connection_error("ping failed"))
        }
    }

    /// Close the connection gracefully (best effort).
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        let _ = self.write_command(Command::Quit, &[]);
        self.state = ConnectionState::Closed;
    }

    // === Server-side prepared statements ===

    /// Prepare a statement server-side, reading parameter and column
    /// definitions.
    pub fn prepare(&mut self, sql: &[u8]) -> Result<ServerPrepareResult> {
        self.start_statement()?;
        self.sequence_id = 0;
        let packet = build_stmt_prepare_packet(sql, 0);
        self.send_framed(&packet)?;

        let (payload, _) = self.read_packet()?;
        if payload.first() == Some(&0xFF) {
            self.state = ConnectionState::Ready;
            let mut reader = PacketReader::new(&payload);
            let err = reader
                .parse_err_packet()
                .ok_or_else(|| protocol_error("invalid error packet"))?;
            return Err(query_error_from(&err));
        }

        let ok = parse_stmt_prepare_ok(&payload)
            .ok_or_else(|| protocol_error("malformed COM_STMT_PREPARE_OK"))?;

        let mut params = Vec::with_capacity(ok.num_params as usize);
        if ok.num_params > 0 {
            for _ in 0..ok.num_params {
                let (payload, _) = self.read_packet()?;
                params.push(self.parse_column_def(&payload)?);
            }
            self.read_eof_if_expected()?;
        }

        let mut columns = Vec::with_capacity(ok.num_columns as usize);
        if ok.num_columns > 0 {
            for _ in 0..ok.num_columns {
                let (payload, _) = self.read_packet()?;
                columns.push(self.parse_column_def(&payload)?);
            }
            self.read_eof_if_expected()?;
        }

        self.state = ConnectionState::Ready;
        Ok(ServerPrepareResult {
            statement_id: ok.statement_id,
            params,
            columns,
        })
    }

    /// Execute a server-side prepared statement with bound parameters.
    pub fn execute_prepared(
        &mut self,
        statement_id: u32,
        params: &[BinaryParam<'_>],
        send_types: bool,
    ) -> Result<ExecResult> {
        self.start_statement()?;
        self.sequence_id = 0;
        let packet = build_stmt_execute_packet(statement_id, params, send_types, 0);
        self.send_framed(&packet)?;
        let result = self.read_response(true);
        self.finish_statement(&result);
        result
    }

    /// Stream one long-data parameter in bounded chunks.
    ///
    /// An empty source still sends one zero-length packet so the server
    /// sees the parameter as bound. A read failure is a fatal
    /// data-transfer error: the server may hold partial chunks, so the
    /// statement must be reset before any retry.
    pub fn send_long_data(
        &mut self,
        statement_id: u32,
        param_index: u16,
        source: &mut dyn Read,
        declared_length: i64,
        chunk_size: usize,
    ) -> Result<()> {
        let mut remaining = if declared_length >= 0 && self.config.use_stream_lengths {
            Some(declared_length as usize)
        } else {
            None
        };
        let mut buf = vec![0u8; chunk_size.max(1)];
        let mut sent_any = false;

        loop {
            let want = remaining.map_or(buf.len(), |r| r.min(buf.len()));
            if want == 0 {
                break;
            }
            let n = source.read(&mut buf[..want]).map_err(|e| {
                Error::Query(QueryError {
                    kind: QueryErrorKind::DataTransfer,
                    message: format!("I/O error while streaming parameter data: {e}"),
                    sqlstate: None,
                    sql: None,
                    source: Some(Box::new(e)),
                })
            })?;
            if n == 0 {
                break;
            }
            let packet = build_long_data_packet(statement_id, param_index, &buf[..n], 0);
            self.send_framed(&packet)?;
            sent_any = true;
            if let Some(r) = &mut remaining {
                *r -= n;
            }
        }

        if !sent_any {
            let packet = build_long_data_packet(statement_id, param_index, &[], 0);
            self.send_framed(&packet)?;
        }
        Ok(())
    }

    /// Reset a prepared statement, discarding buffered long data.
    pub fn reset_statement(&mut self, statement_id: u32) -> Result<()> {
        self.sequence_id = 0;
        let packet = build_stmt_reset_packet(statement_id, 0);
        self.send_framed(&packet)?;

        let (payload, _) = self.read_packet()?;
        if payload.first() == Some(&0xFF) {
            let mut reader = PacketReader::new(&payload);
            let err = reader
                .parse_err_packet()
                .ok_or_else(|| protocol_error("invalid error packet"))?;
            return Err(query_error_from(&err));
        }
        Ok(())
    }

    /// Close a prepared statement. The server sends no response.
    pub fn close_statement(&mut self, statement_id: u32) -> Result<()> {
        self.sequence_id = 0;
        let packet = build_stmt_close_packet(statement_id, 0);
        self.send_framed(&packet)
    }

    // === Response decoding ===

    fn start_statement(&mut self) -> Result<()> {
        if !self.is_ready() {
            return Err(connection_error(format!(
                "connection not ready for statements (state {:?})",
                self.state
            )));
        }
        self.state = ConnectionState::InQuery;
        self.sequence_id = 0;
        Ok(())
    }

    fn finish_statement(&mut self, result: &Result<ExecResult>) {
        // A failed read already moved the state to Disconnected
        if self.state == ConnectionState::InQuery {
            self.state = if result.is_ok()
                && self.status_flags & server_status::SERVER_STATUS_IN_TRANS != 0
            {
                ConnectionState::InTransaction
            } else {
                ConnectionState::Ready
            };
        }
    }

    fn read_response(&mut self, binary: bool) -> Result<ExecResult> {
        let (payload, _) = self.read_packet()?;
        if payload.is_empty() {
            return Err(protocol_error("empty response packet"));
        }

        match PacketType::from_first_byte(payload[0], payload.len() as u32) {
            PacketType::Ok => {
                let mut reader = PacketReader::new(&payload);
                let ok = reader
                    .parse_ok_packet()
                    .ok_or_else(|| protocol_error("malformed OK packet"))?;
                self.affected_rows = ok.affected_rows;
                self.last_insert_id = ok.last_insert_id;
                self.status_flags = ok.status_flags;
                self.warnings = ok.warnings;
                Ok(ExecResult {
                    columns: Vec::new(),
                    rows: Vec::new(),
                    affected_rows: ok.affected_rows,
                    last_insert_id: ok.last_insert_id,
                    warnings: ok.warnings,
                    more_results: ok.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0,
                })
            }
            PacketType::Error => {
                let mut reader = PacketReader::new(&payload);
                let err = reader
                    .parse_err_packet()
                    .ok_or_else(|| protocol_error("invalid error packet"))?;
                Err(query_error_from(&err))
            }
            PacketType::LocalInfile => Err(Error::Query(QueryError {
                kind: QueryErrorKind::Database,
                message: "LOCAL INFILE transfer is not supported".to_string(),
                sqlstate: None,
                sql: None,
                source: None,
            })),
            _ => self.read_result_set(&payload, binary),
        }
    }

    fn read_result_set(&mut self, first_packet: &[u8], binary: bool) -> Result<ExecResult> {
        let mut reader = PacketReader::new(first_packet);
        let column_count = reader
            .read_lenenc_int()
            .ok_or_else(|| protocol_error("invalid column count"))? as usize;

        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let (payload, _) = self.read_packet()?;
            columns.push(self.parse_column_def(&payload)?);
        }
        self.read_eof_if_expected()?;

        let column_info = std::sync::Arc::new(stratum_core::ColumnInfo::new(
            columns.iter().map(|c| c.name.clone()).collect(),
        ));

        let mut rows = Vec::new();
        let mut more_results = false;
        loop {
            let (payload, _) = self.read_packet()?;
            if payload.is_empty() {
                break;
            }

            match PacketType::from_first_byte(payload[0], payload.len() as u32) {
                PacketType::Eof => {
                    let mut reader = PacketReader::new(&payload);
                    if let Some(eof) = reader.parse_eof_packet() {
                        self.status_flags = eof.status_flags;
                        self.warnings = eof.warnings;
                        more_results =
                            eof.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0;
                    }
                    break;
                }
                PacketType::Error => {
                    let mut reader = PacketReader::new(&payload);
                    let err = reader
                        .parse_err_packet()
                        .ok_or_else(|| protocol_error("invalid error packet"))?;
                    self.state = ConnectionState::Ready;
                    return Err(query_error_from(&err));
                }
                _ => {
                    let row = if binary {
                        self.parse_binary_row(&payload, &columns, &column_info)?
                    } else {
                        self.parse_text_row(&payload, &columns, &column_info)
                    };
                    rows.push(row);
                }
            }
        }

        Ok(ExecResult {
            columns,
            rows,
            affected_rows: 0,
            last_insert_id: 0,
            warnings: self.warnings,
            more_results,
        })
    }

    /// Consume the EOF packet that separates metadata from rows when the
    /// session did not negotiate `CLIENT_DEPRECATE_EOF`.
    fn read_eof_if_expected(&mut self) -> Result<()> {
        if self.client_caps & capabilities::CLIENT_DEPRECATE_EOF == 0 {
            let (payload, _) = self.read_packet()?;
            if payload.first() != Some(&0xFE) {
                return Err(protocol_error("expected EOF packet"));
            }
        }
        Ok(())
    }

    fn parse_column_def(&self, data: &[u8]) -> Result<ColumnDef> {
        let mut reader = PacketReader::new(data);

        // catalog is always "def"
        reader
            .read_lenenc_string()
            .ok_or_else(|| protocol_error("missing catalog"))?;
        let schema = reader
            .read_lenenc_string()
            .ok_or_else(|| protocol_error("missing schema"))?;
        let table = reader
            .read_lenenc_string()
            .ok_or_else(|| protocol_error("missing table"))?;
        // original table
        reader
            .read_lenenc_string()
            .ok_or_else(|| protocol_error("missing org_table"))?;
        let name = reader
            .read_lenenc_string()
            .ok_or_else(|| protocol_error("missing name"))?;
        let org_name = reader
            .read_lenenc_string()
            .ok_or_else(|| protocol_error("missing org_name"))?;

        // Length of the fixed-size fields
        let _ = reader.read_lenenc_int();

        let charset = reader
            .read_u16_le()
            .ok_or_else(|| protocol_error("missing charset"))?;
        let column_length = reader
            .read_u32_le()
            .ok_or_else(|| protocol_error("missing column length"))?;
        let column_type = FieldType::from_u8(
            reader
                .read_u8()
                .ok_or_else(|| protocol_error("missing column type"))?,
        );
        let flags = reader
            .read_u16_le()
            .ok_or_else(|| protocol_error("missing flags"))?;
        let decimals = reader
            .read_u8()
            .ok_or_else(|| protocol_error("missing decimals"))?;

        Ok(ColumnDef {
            schema,
            table,
            name,
            org_name,
            charset,
            column_length,
            column_type,
            flags,
            decimals,
        })
    }

    fn parse_text_row(
        &self,
        data: &[u8],
        columns: &[ColumnDef],
        column_info: &std::sync::Arc<stratum_core::ColumnInfo>,
    ) -> Row {
        let mut reader = PacketReader::new(data);
        let mut values = Vec::with_capacity(columns.len());

        for col in columns {
            // 0xFB marks NULL in text rows
            if reader.peek() == Some(0xFB) {
                reader.skip(1);
                values.push(Value::Null);
            } else if let Some(data) = reader.read_lenenc_bytes() {
                values.push(decode_text_value(col.column_type, data, col.is_unsigned()));
            } else {
                values.push(Value::Null);
            }
        }

        Row::with_columns(std::sync::Arc::clone(column_info), values)
    }

    fn parse_binary_row(
        &self,
        data: &[u8],
        columns: &[ColumnDef],
        column_info: &std::sync::Arc<stratum_core::ColumnInfo>,
    ) -> Result<Row> {
        let mut reader = PacketReader::new(data);
        // Header byte 0x00
        reader.skip(1);

        // NULL bitmap with a 2-bit offset
        let bitmap_len = (columns.len() + 7 + 2) / 8;
        let bitmap = reader
            .read_bytes(bitmap_len)
            .ok_or_else(|| protocol_error("truncated binary row bitmap"))?
            .to_vec();

        let mut values = Vec::with_capacity(columns.len());
        for (i, col) in columns.iter().enumerate() {
            let bit = i + 2;
            if bitmap[bit / 8] & (1 << (bit % 8)) != 0 {
                values.push(Value::Null);
                continue;
            }
            let value = read_binary_value(&mut reader, col.column_type, col.is_unsigned())
                .ok_or_else(|| protocol_error("truncated binary row value"))?;
            values.push(value);
        }

        Ok(Row::with_columns(std::sync::Arc::clone(column_info), values))
    }

    // === Packet I/O ===

    fn read_packet(&mut self) -> Result<(Vec<u8>, u8)> {
        let mut header_buf = [0u8; 4];
        self.read_exact(&mut header_buf, "packet header")?;

        let header = PacketHeader::from_bytes(&header_buf);
        let payload_len = header.payload_length as usize;
        self.sequence_id = header.sequence_id.wrapping_add(1);

        let mut payload = vec![0u8; payload_len];
        if payload_len > 0 {
            self.read_exact(&mut payload, "packet payload")?;
        }

        // Reassemble split payloads
        if payload_len == MAX_PACKET_SIZE {
            loop {
                let mut header_buf = [0u8; 4];
                self.read_exact(&mut header_buf, "continuation header")?;
                let cont = PacketHeader::from_bytes(&header_buf);
                let cont_len = cont.payload_length as usize;
                self.sequence_id = cont.sequence_id.wrapping_add(1);

                if cont_len > 0 {
                    let mut chunk = vec![0u8; cont_len];
                    self.read_exact(&mut chunk, "continuation payload")?;
                    payload.extend_from_slice(&chunk);
                }
                if cont_len < MAX_PACKET_SIZE {
                    break;
                }
            }
        }

        Ok((payload, header.sequence_id))
    }

    fn read_exact(&mut self, buf: &mut [u8], what: &str) -> Result<()> {
        self.stream.read_exact(buf).map_err(|e| {
            self.state = ConnectionState::Disconnected;
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: format!("failed to read {what}: {e}"),
                source: Some(Box::new(e)),
            })
        })
    }

    fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let packet =
            crate::protocol::writer::build_packet_from_payload(payload, self.sequence_id);
        self.sequence_id = self.sequence_id.wrapping_add(1);
        self.send_framed(&packet)
    }

    fn write_command(&mut self, command: Command, payload: &[u8]) -> Result<()> {
        self.sequence_id = 0;
        let mut writer = PacketWriter::with_capacity(1 + payload.len());
        writer.write_u8(command as u8);
        writer.write_bytes(payload);
        self.write_packet(writer.as_bytes())
    }

    fn send_framed(&mut self, packet: &[u8]) -> Result<()> {
        self.stream
            .write_all(packet)
            .and_then(|()| self.stream.flush())
            .map_err(|e| {
                self.state = ConnectionState::Disconnected;
                Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Disconnected,
                    message: format!("failed to write packet: {e}"),
                    source: Some(Box::new(e)),
                })
            })
    }

    /// Bytes written so far (scripted streams only).
    #[cfg(test)]
    pub(crate) fn written(&self) -> &[u8] {
        match &self.stream {
            Stream::Script(stream) => &stream.written,
            Stream::Tcp(_) => &[],
        }
    }
}

impl Drop for MySqlConnection {
    fn drop(&mut self) {
        self.close();
    }
}

// Error helpers

fn protocol_error(msg: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: msg.into(),
        source: None,
    })
}

fn auth_error(msg: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Authentication,
        message: msg.into(),
        source: None,
    })
}

fn connection_error(msg: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Connect,
        message: msg.into(),
        source: None,
    })
}

/// Map a server error packet onto the query-error taxonomy.
fn query_error_from(err: &ErrPacket) -> Error {
    let kind = if err.is_duplicate_key() || err.is_foreign_key_violation() {
        QueryErrorKind::Constraint
    } else if err.is_deadlock() {
        QueryErrorKind::Deadlock
    } else if err.is_query_interrupted() {
        QueryErrorKind::Cancelled
    } else if err.is_lock_wait_timeout() {
        QueryErrorKind::Timeout
    } else if err.error_code == 1064 || err.error_code == 1065 {
        QueryErrorKind::Syntax
    } else if err.error_code == 1146 || err.error_code == 1054 {
        QueryErrorKind::NotFound
    } else if err.error_code == 1044 || err.error_code == 1045 || err.error_code == 1142 {
        QueryErrorKind::Permission
    } else if err.error_code == 1406 {
        QueryErrorKind::DataTruncation
    } else {
        QueryErrorKind::Database
    };

    Error::Query(QueryError {
        kind,
        message: err.error_message.clone(),
        sqlstate: if err.sql_state.is_empty() {
            None
        } else {
            Some(err.sql_state.clone())
        },
        sql: None,
        source: None,
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::types::ymd_to_days;

    fn test_config() -> MySqlConfig {
        MySqlConfig::new().user("root")
    }

    fn connected(extra_script: &[u8]) -> MySqlConnection {
        let mut script = connect_script();
        script.extend_from_slice(extra_script);
        MySqlConnection::connect_script(&test_config(), 0, script).unwrap()
    }

    #[test]
    fn test_handshake_establishes_connection() {
        let conn = connected(&[]);
        assert_eq!(conn.state(), ConnectionState::Ready);
        assert_eq!(conn.connection_id(), 42);
        assert_eq!(conn.server_version(), Some("8.0.0-stratum-test"));
        assert!(!conn.no_backslash_escapes());
    }

    #[test]
    fn test_handshake_reads_no_backslash_status() {
        let mut script = handshake_packet(7, 0x0202);
        script.extend_from_slice(&packet(2, &ok_payload(0, 0, 0x0202)));
        let conn = MySqlConnection::connect_script(&test_config(), 0, script).unwrap();
        assert!(conn.no_backslash_escapes());
    }

    #[test]
    fn test_auth_failure_surfaces_as_authentication_error() {
        let mut script = handshake_packet(7, 0x0002);
        script.extend_from_slice(&packet(2, &err_payload(1045, "28000", "Access denied")));
        let err = MySqlConnection::connect_script(&test_config(), 0, script).unwrap_err();
        match err {
            Error::Connection(e) => assert_eq!(e.kind, ConnectionErrorKind::Authentication),
            other => panic!("expected connection error, got {other}"),
        }
    }

    #[test]
    fn test_query_ok_updates_bookkeeping() {
        let mut conn = connected(&packet(1, &ok_payload(3, 7, 0x0002)));
        let result = conn.query(b"UPDATE t SET a = 1").unwrap();
        assert_eq!(result.affected_rows, 3);
        assert_eq!(result.last_insert_id, 7);
        assert_eq!(conn.affected_rows(), 3);
        assert_eq!(conn.last_insert_id(), 7);
        assert_eq!(conn.state(), ConnectionState::Ready);

        // The COM_QUERY packet went out with the statement text
        let written = conn.written();
        assert_eq!(written[written.len() - 19], Command::Query as u8);
        assert!(written.ends_with(b"UPDATE t SET a = 1"));
    }

    #[test]
    fn test_query_error_maps_kind() {
        let mut conn = connected(&packet(1, &err_payload(1064, "42000", "bad syntax")));
        let err = conn.query(b"SELEKT 1").unwrap_err();
        match err {
            Error::Query(q) => {
                assert_eq!(q.kind, QueryErrorKind::Syntax);
                assert_eq!(q.sqlstate.as_deref(), Some("42000"));
            }
            other => panic!("expected query error, got {other}"),
        }
    }

    #[test]
    fn test_query_text_result_set() {
        let mut extra = Vec::new();
        // column count = 1
        extra.extend_from_slice(&packet(1, &[0x01]));
        extra.extend_from_slice(&packet(2, &column_def_payload("id", 0x03)));
        extra.extend_from_slice(&packet(3, &eof_payload(0x0002)));
        // one row: "42"
        extra.extend_from_slice(&packet(4, &[0x02, b'4', b'2']));
        extra.extend_from_slice(&packet(5, &eof_payload(0x0002)));

        let mut conn = connected(&extra);
        let result = conn.query(b"SELECT id FROM t").unwrap();
        assert_eq!(result.columns.len(), 1);
        assert_eq!(result.columns[0].name, "id");
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].get_as::<i32>(0), Some(42));
        assert_eq!(result.rows[0].get_as_by_name::<i32>("id"), Some(42));
    }

    #[test]
    fn test_query_null_in_text_row() {
        let mut extra = Vec::new();
        extra.extend_from_slice(&packet(1, &[0x01]));
        extra.extend_from_slice(&packet(2, &column_def_payload("v", 0xFD)));
        extra.extend_from_slice(&packet(3, &eof_payload(0)));
        extra.extend_from_slice(&packet(4, &[0xFB]));
        extra.extend_from_slice(&packet(5, &eof_payload(0)));

        let mut conn = connected(&extra);
        let result = conn.query(b"SELECT v FROM t").unwrap();
        assert_eq!(result.rows[0].get(0), Some(&Value::Null));
    }

    #[test]
    fn test_query_multi_collects_results() {
        let mut extra = Vec::new();
        extra.extend_from_slice(&packet(1, &ok_payload(1, 0, 0x0008 | 0x0002)));
        extra.extend_from_slice(&packet(2, &ok_payload(2, 0, 0x0002)));

        let mut conn = connected(&extra);
        let (results, err) = conn.query_multi(b"UPDATE a; UPDATE b");
        assert!(err.is_none());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].affected_rows, 1);
        assert!(results[0].more_results);
        assert_eq!(results[1].affected_rows, 2);
    }

    #[test]
    fn test_query_multi_stops_on_error() {
        let mut extra = Vec::new();
        extra.extend_from_slice(&packet(1, &ok_payload(1, 0, 0x0008 | 0x0002)));
        extra.extend_from_slice(&packet(2, &err_payload(1062, "23000", "dup")));

        let mut conn = connected(&extra);
        let (results, err) = conn.query_multi(b"INSERT a; INSERT b");
        assert_eq!(results.len(), 1);
        assert!(matches!(err, Some(Error::Query(_))));
    }

    #[test]
    fn test_prepare_reads_metadata() {
        let mut extra = Vec::new();
        extra.extend_from_slice(&packet(1, &prepare_ok_payload(5, 1, 2)));
        // two param defs + EOF
        extra.extend_from_slice(&packet(2, &column_def_payload("?", 0xFD)));
        extra.extend_from_slice(&packet(3, &column_def_payload("?", 0xFD)));
        extra.extend_from_slice(&packet(4, &eof_payload(0)));
        // one column def + EOF
        extra.extend_from_slice(&packet(5, &column_def_payload("id", 0x03)));
        extra.extend_from_slice(&packet(6, &eof_payload(0)));

        let mut conn = connected(&extra);
        let prepared = conn
            .prepare(b"SELECT id FROM t WHERE a = ? AND b = ?")
            .unwrap();
        assert_eq!(prepared.statement_id, 5);
        assert_eq!(prepared.params.len(), 2);
        assert_eq!(prepared.columns.len(), 1);
    }

    #[test]
    fn test_prepare_error() {
        let extra = packet(1, &err_payload(1146, "42S02", "no such table"));
        let mut conn = connected(&extra);
        let err = conn.prepare(b"SELECT * FROM missing").unwrap_err();
        match err {
            Error::Query(q) => assert_eq!(q.kind, QueryErrorKind::NotFound),
            other => panic!("expected query error, got {other}"),
        }
        assert_eq!(conn.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_execute_prepared_binary_row() {
        let mut extra = Vec::new();
        // execute response: column count 1, DATE column, EOF, binary row, EOF
        extra.extend_from_slice(&packet(1, &[0x01]));
        extra.extend_from_slice(&packet(2, &column_def_payload("d", 0x0A)));
        extra.extend_from_slice(&packet(3, &eof_payload(0)));
        // binary row: header 0x00, bitmap 0x00, date len 4, 2024-01-31
        extra.extend_from_slice(&packet(4, &[0x00, 0x00, 4, 0xE8, 0x07, 1, 31]));
        extra.extend_from_slice(&packet(5, &eof_payload(0)));

        let mut conn = connected(&extra);
        let result = conn.execute_prepared(5, &[], true).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(
            result.rows[0].get(0),
            Some(&Value::Date(ymd_to_days(2024, 1, 31)))
        );
    }

    #[test]
    fn test_execute_prepared_null_bitmap_offset() {
        let mut extra = Vec::new();
        extra.extend_from_slice(&packet(1, &[0x01]));
        extra.extend_from_slice(&packet(2, &column_def_payload("v", 0x03)));
        extra.extend_from_slice(&packet(3, &eof_payload(0)));
        // bitmap bit 2 set => column 0 is NULL
        extra.extend_from_slice(&packet(4, &[0x00, 0x04]));
        extra.extend_from_slice(&packet(5, &eof_payload(0)));

        let mut conn = connected(&extra);
        let result = conn.execute_prepared(5, &[], true).unwrap();
        assert_eq!(result.rows[0].get(0), Some(&Value::Null));
    }

    #[test]
    fn test_send_long_data_chunks() {
        let mut conn = connected(&[]);
        let mut source = std::io::Cursor::new(vec![0xAB; 10]);
        conn.send_long_data(3, 1, &mut source, 10, 4).unwrap();

        // Chunks of 4, 4, 2 — three COM_STMT_SEND_LONG_DATA packets
        let written = conn.written().to_vec();
        let mut offset = 0;
        let mut count = 0;
        let mut pos = 0;
        // Skip the handshake response (first client packet)
        let first_len = u32::from(written[0])
            | (u32::from(written[1]) << 8)
            | (u32::from(written[2]) << 16);
        pos += 4 + first_len as usize;
        while pos < written.len() {
            let len = u32::from(written[pos])
                | (u32::from(written[pos + 1]) << 8)
                | (u32::from(written[pos + 2]) << 16);
            assert_eq!(written[pos + 4], Command::StmtSendLongData as u8);
            count += 1;
            offset = len as usize;
            pos += 4 + len as usize;
        }
        assert_eq!(count, 3);
        // Last chunk: command + stmt id + param idx + 2 data bytes
        assert_eq!(offset, 1 + 4 + 2 + 2);
    }

    #[test]
    fn test_send_long_data_empty_stream_sends_one_packet() {
        let mut conn = connected(&[]);
        let mut source = std::io::empty();
        conn.send_long_data(3, 0, &mut source, -1, 8).unwrap();

        let written = conn.written();
        // The zero-length long-data packet is the last thing written
        assert_eq!(&written[written.len() - 11..written.len() - 7], &[7, 0, 0, 0]);
        assert_eq!(written[written.len() - 7], Command::StmtSendLongData as u8);
    }

    #[test]
    fn test_send_long_data_read_failure_is_data_transfer() {
        struct FailingReader;
        impl Read for FailingReader {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("disk error"))
            }
        }

        let mut conn = connected(&[]);
        let err = conn
            .send_long_data(3, 0, &mut FailingReader, -1, 8)
            .unwrap_err();
        match err {
            Error::Query(q) => assert_eq!(q.kind, QueryErrorKind::DataTransfer),
            other => panic!("expected query error, got {other}"),
        }
    }

    #[test]
    fn test_disconnect_mid_query_is_connection_error() {
        // Script ends after connect; the query response read hits EOF
        let mut conn = connected(&[]);
        let err = conn.query(b"SELECT 1").unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_reset_statement_ok() {
        let mut conn = connected(&packet(1, &ok_payload(0, 0, 0x0002)));
        assert!(conn.reset_statement(9).is_ok());
    }

    #[test]
    fn test_ping() {
        let mut conn = connected(&packet(1, &ok_payload(0, 0, 0x0002)));
        assert!(conn.ping().is_ok());
    }
}
