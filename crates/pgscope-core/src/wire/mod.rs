//! A minimal PostgreSQL wire-protocol (v3) client: enough to open a
//! connection, authenticate, and run simple-query text SQL. No extended
//! protocol, no COPY, no LISTEN/NOTIFY delivery to the caller — matching the
//! scope a metrics collector actually needs.

mod auth;
mod error;
mod message;
mod scram;
mod tls;

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

pub use error::WireError;
pub use message::FieldDescription;

/// How the client should negotiate transport security, mirroring
/// PostgreSQL's `sslmode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    Disable,
    /// Encrypt if the server supports it, but don't verify the certificate.
    Require,
    /// Encrypt and verify the certificate chain and hostname.
    VerifyFull,
}

/// Connection parameters for a single PostgreSQL server.
#[derive(Debug, Clone)]
pub struct ConnectParams<'a> {
    pub host: &'a str,
    pub port: u16,
    pub user: &'a str,
    pub password: &'a str,
    pub database: &'a str,
    pub tls: TlsMode,
    pub connect_timeout: Duration,
}

pub(crate) enum Stream {
    Plain(TcpStream),
    Tls(Box<native_tls::TlsStream<TcpStream>>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
        }
    }
    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush(),
            Stream::Tls(s) => s.flush(),
        }
    }
}

impl Stream {
    fn set_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        let tcp = match self {
            Stream::Plain(s) => s,
            Stream::Tls(s) => s.get_ref(),
        };
        tcp.set_read_timeout(timeout)?;
        tcp.set_write_timeout(timeout)
    }
}

/// A live connection to one PostgreSQL server. Reconnected from scratch by
/// the caller on any transport error — there is no internal retry.
pub struct Connection {
    stream: Stream,
    pub server_version_num: u32,
    pub in_recovery: bool,
}

/// A single returned row. Values are the raw text-format bytes PostgreSQL
/// sent (`None` for SQL NULL); callers interpret them per-column per the
/// catalog's column descriptors.
pub struct Row {
    pub columns: Vec<Option<Vec<u8>>>,
}

impl Row {
    pub fn text(&self, index: usize) -> Option<&str> {
        self.columns.get(index)?.as_deref().map(|b| std::str::from_utf8(b).unwrap_or_default())
    }
}

/// The result of a simple-query: the field descriptors PostgreSQL sent in
/// `RowDescription`, followed by zero or more data rows.
pub struct QueryResult {
    pub fields: Vec<FieldDescription>,
    pub rows: Vec<Row>,
}

impl Connection {
    /// Opens a TCP connection, negotiates TLS per `params.tls`, completes the
    /// startup/authentication exchange, and probes server version + role.
    pub fn connect(params: &ConnectParams<'_>) -> Result<Self, WireError> {
        let addr = (params.host, params.port)
            .to_socket_addrs()
            .map_err(WireError::Transport)?
            .next()
            .ok_or_else(|| WireError::Transport(std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved")))?;
        let sock = TcpStream::connect_timeout(&addr, params.connect_timeout).map_err(WireError::Transport)?;
        sock.set_nodelay(true).map_err(WireError::Transport)?;

        let mut stream = match params.tls {
            TlsMode::Disable => Stream::Plain(sock),
            TlsMode::Require => match tls::negotiate(sock, params.host, true)? {
                tls::Negotiated::Plain(s) => Stream::Plain(s),
                tls::Negotiated::Tls(s) => Stream::Tls(Box::new(s)),
            },
            TlsMode::VerifyFull => match tls::negotiate(sock, params.host, false)? {
                tls::Negotiated::Plain(s) => {
                    return Err(WireError::Tls("server refused TLS under verify-full".into()));
                }
                tls::Negotiated::Tls(s) => Stream::Tls(Box::new(s)),
            },
        };

        let startup_params = [
            ("user", params.user),
            ("database", params.database),
            ("application_name", "pgscope"),
            ("client_encoding", "UTF8"),
        ];
        message::write_startup(&mut stream, &startup_params)?;
        auth::authenticate(&mut stream, params.user, params.password)?;

        let mut server_version_param: Option<String> = None;
        loop {
            let msg = message::read_backend(&mut stream)?;
            match msg.tag {
                b'Z' => break, // ReadyForQuery
                b'S' => {
                    if let Some((key, value)) = parse_parameter_status(&msg.body) {
                        if key == "server_version" {
                            server_version_param = Some(value);
                        }
                    }
                }
                b'K' => {} // BackendKeyData — no cancel support needed for scrape connections
                b'N' => tracing::debug!("postgres notice during startup"),
                b'E' => return Err(query_error(&msg.body)),
                other => return Err(WireError::Protocol(format!("unexpected message {:?} before ready-for-query", other as char))),
            }
        }

        let mut conn = Connection { stream, server_version_num: 0, in_recovery: false };
        conn.server_version_num = conn.probe_version(server_version_param)?;
        conn.in_recovery = conn.probe_recovery()?;
        Ok(conn)
    }

    fn probe_version(&mut self, parameter_status: Option<String>) -> Result<u32, WireError> {
        if let Some(raw) = parameter_status {
            if let Some(v) = parse_server_version_num(&raw) {
                return Ok(v);
            }
        }
        let result = self.simple_query_with_timeout("SHOW server_version_num", Duration::from_secs(5))?;
        let row = result.rows.first().ok_or_else(|| WireError::Protocol("SHOW server_version_num returned no rows".into()))?;
        let raw = row.text(0).ok_or_else(|| WireError::Protocol("server_version_num was NULL".into()))?;
        raw.parse::<u32>().map_err(|e| WireError::Protocol(format!("invalid server_version_num {raw:?}: {e}")))
    }

    fn probe_recovery(&mut self) -> Result<bool, WireError> {
        let result = self.simple_query_with_timeout("SELECT pg_is_in_recovery()", Duration::from_secs(5))?;
        let row = result.rows.first().ok_or_else(|| WireError::Protocol("pg_is_in_recovery() returned no rows".into()))?;
        Ok(row.text(0) == Some("t"))
    }

    /// Runs one simple-query statement, bounded by `blocking_timeout`. On
    /// timeout the underlying connection must be discarded by the caller —
    /// there is no way to cancel an in-flight query over the same socket.
    pub fn simple_query(&mut self, sql: &str, blocking_timeout: Duration) -> Result<QueryResult, WireError> {
        self.simple_query_with_timeout(sql, blocking_timeout)
    }

    fn simple_query_with_timeout(&mut self, sql: &str, timeout: Duration) -> Result<QueryResult, WireError> {
        self.stream.set_timeout(Some(timeout))?;
        let result = self.run_query(sql);
        let _ = self.stream.set_timeout(None);
        result
    }

    fn run_query(&mut self, sql: &str) -> Result<QueryResult, WireError> {
        message::write_query(&mut self.stream, sql)?;

        let mut fields = Vec::new();
        let mut rows = Vec::new();
        loop {
            let msg = message::read_backend(&mut self.stream)?;
            match msg.tag {
                b'T' => fields = message::parse_row_description(&msg.body)?,
                b'D' => rows.push(Row { columns: message::parse_data_row(&msg.body)? }),
                b'C' => {} // CommandComplete
                b'N' => tracing::debug!(sql, "postgres notice"),
                b'A' => {} // NotificationResponse — LISTEN/NOTIFY delivery is out of scope
                b'S' => {} // ParameterStatus changed mid-session; nothing to track for a scrape
                b'E' => return Err(query_error(&msg.body)),
                b'Z' => return Ok(QueryResult { fields, rows }),
                other => return Err(WireError::Protocol(format!("unexpected message {:?} during simple query", other as char))),
            }
        }
    }

    /// Best-effort `Terminate` and socket close. Errors are swallowed — the
    /// connection is going away either way.
    pub fn close(mut self) {
        let _ = message::write_tagged(&mut self.stream, b'X', &[]);
    }
}

fn query_error(body: &[u8]) -> WireError {
    let fields = message::parse_fields(body);
    WireError::QuerySqlstate {
        sqlstate: fields.get(&b'C').cloned().unwrap_or_else(|| "XX000".to_string()),
        message: fields.get(&b'M').cloned().unwrap_or_else(|| "(no message)".to_string()),
    }
}

fn parse_parameter_status(body: &[u8]) -> Option<(String, String)> {
    let mut parts = body.split(|&b| b == 0).filter(|s| !s.is_empty());
    let key = String::from_utf8_lossy(parts.next()?).into_owned();
    let value = String::from_utf8_lossy(parts.next()?).into_owned();
    Some((key, value))
}

/// Parses a `server_version_num`-shaped integer out of a `server_version`
/// parameter-status string such as `"16.1"` or `"13.4 (Debian 13.4-1)"`. This
/// is a fallback for the rare server that omits `server_version_num` from its
/// startup parameters; `SHOW server_version_num` is authoritative.
fn parse_server_version_num(raw: &str) -> Option<u32> {
    let head = raw.split_whitespace().next()?;
    let mut parts = head.split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next().unwrap_or("0").parse().ok()?;
    if major >= 10 {
        Some(major * 10000 + minor)
    } else {
        let patch: u32 = parts.next().unwrap_or("0").parse().ok()?;
        Some(major * 10000 + minor * 100 + patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modern_two_part_version() {
        assert_eq!(parse_server_version_num("16.1"), Some(160001));
        assert_eq!(parse_server_version_num("13.4 (Debian 13.4-1)"), Some(130004));
    }

    #[test]
    fn parses_legacy_three_part_version() {
        assert_eq!(parse_server_version_num("9.6.1"), Some(90601));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_server_version_num("unknown"), None);
    }
}
