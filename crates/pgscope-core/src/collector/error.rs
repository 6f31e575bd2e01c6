use std::fmt;

use crate::wire::WireError;

/// Errors a single (server, metric) collection can raise. The orchestrator
/// catches these per-metric — none of them abort the rest of the scrape.
#[derive(Debug)]
pub enum CollectError {
    /// The server's version/role hasn't been probed yet (or the last probe
    /// failed) — should not normally be reachable since the orchestrator
    /// probes before collecting, but guards against a stale handle.
    ServerStateUnknown,
    /// `QUERY_SQLSTATE` / `CONN_TRANSPORT` / `CONN_AUTH` from the wire client.
    Wire(WireError),
    /// `RENDER_SHAPE`: a histogram's bucket/count arrays disagreed in length,
    /// or bucket bounds were not strictly increasing.
    RenderShape(String),
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectError::ServerStateUnknown => write!(f, "server version/role not yet known"),
            CollectError::Wire(e) => write!(f, "{e}"),
            CollectError::RenderShape(msg) => write!(f, "RENDER_SHAPE: {msg}"),
        }
    }
}

impl std::error::Error for CollectError {}

impl From<WireError> for CollectError {
    fn from(e: WireError) -> Self {
        CollectError::Wire(e)
    }
}
