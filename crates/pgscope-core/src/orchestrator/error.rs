use thiserror::Error;

use crate::collector::CollectError;

/// The orchestrator's own error surface: one variant per §7 error kind that
/// can originate above the collector. `CollectError` already covers
/// `CONN_TRANSPORT` / `CONN_AUTH` / `QUERY_SQLSTATE` / `RENDER_SHAPE`; this
/// adds the orchestrator-level `QUERY_TIMEOUT`, raised whenever collection
/// fails with `CollectError::Wire(WireError::Timeout)` (see `scrape_error`
/// in `orchestrator::mod`).
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("{server}/{metric}: {source}")]
    Collect { server: String, metric: String, #[source] source: CollectError },
    #[error("{server}/{metric}: QUERY_TIMEOUT: exceeded blocking_timeout")]
    Timeout { server: String, metric: String },
}

impl ScrapeError {
    pub fn server(&self) -> &str {
        match self {
            ScrapeError::Collect { server, .. } | ScrapeError::Timeout { server, .. } => server,
        }
    }

    pub fn metric(&self) -> &str {
        match self {
            ScrapeError::Collect { metric, .. } | ScrapeError::Timeout { metric, .. } => metric,
        }
    }
}
