use std::fmt;
use std::io;

/// Errors surfaced by the wire client. Kept as a small hand-written enum
/// (matching the catalog/cache error style) rather than `thiserror` — the
/// variant set here is stable and the orchestrator matches on it directly.
#[derive(Debug)]
pub enum WireError {
    /// Transport-level failure: socket refused, reset, or timed out.
    Transport(io::Error),
    /// TLS negotiation failed, or the server refused `SSLRequest` while
    /// TLS was required by configuration.
    Tls(String),
    /// The server requested an authentication method we don't implement.
    AuthUnsupported(String),
    /// Authentication was attempted and rejected by the server.
    AuthFailed { sqlstate: String, message: String },
    /// The server returned an `ErrorResponse` for a query.
    QuerySqlstate { sqlstate: String, message: String },
    /// A message arrived out of sequence, or a body failed to decode.
    Protocol(String),
    /// The query did not complete before `blocking_timeout`; the connection
    /// backing it has been closed.
    Timeout,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Transport(e) => write!(f, "connection error: {e}"),
            WireError::Tls(msg) => write!(f, "TLS negotiation failed: {msg}"),
            WireError::AuthUnsupported(method) => {
                write!(f, "AUTH_UNSUPPORTED: server requested unsupported method {method}")
            }
            WireError::AuthFailed { sqlstate, message } => {
                write!(f, "authentication failed [{sqlstate}]: {message}")
            }
            WireError::QuerySqlstate { sqlstate, message } => {
                write!(f, "query failed [{sqlstate}]: {message}")
            }
            WireError::Protocol(msg) => write!(f, "protocol error: {msg}"),
            WireError::Timeout => write!(f, "query exceeded blocking_timeout"),
        }
    }
}

impl std::error::Error for WireError {}

impl From<io::Error> for WireError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut {
            WireError::Timeout
        } else {
            WireError::Transport(e)
        }
    }
}

impl From<native_tls::Error> for WireError {
    fn from(e: native_tls::Error) -> Self {
        WireError::Tls(e.to_string())
    }
}

impl From<native_tls::HandshakeError<std::net::TcpStream>> for WireError {
    fn from(e: native_tls::HandshakeError<std::net::TcpStream>) -> Self {
        WireError::Tls(e.to_string())
    }
}
