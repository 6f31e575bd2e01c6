//! Drives one scrape: fans a thread out per configured server (each server's
//! metrics run sequentially, in catalog order, on that server's single owned
//! connection), joins results against an overall deadline, and merges
//! per-server families into one rendered set — §4.4 of the design.

mod error;

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use error::ScrapeError;

use crate::catalog::Catalog;
use crate::collector::{self, CollectError};
use crate::meta::{self, LoggingCounters};
use crate::render::Family;
use crate::server::Server;
use crate::wire::WireError;

/// Everything one scrape produced: the rendered families (catalog order,
/// each a ready-to-emit `# HELP`/`# TYPE` group) and the non-fatal errors
/// encountered along the way, for logging — none of them abort the scrape.
pub struct ScrapeOutcome {
    pub families: Vec<Family>,
    pub errors: Vec<ScrapeError>,
}

struct ServerResult {
    /// `None` for a whole-server probe failure, which touches no metric's
    /// family — only `errors`.
    metric_index: Option<usize>,
    family: Option<Family>,
    error: Option<ScrapeError>,
}

/// Runs every applicable metric against every server in `servers`, bounded
/// by `deadline`. Already-completed (server, metric) pairs are included in
/// the result; pairs still running when the deadline passes are simply
/// absent — their owning thread keeps running in the background and its
/// result, if any, is discarded (the connection it holds will be dropped and
/// reopened on that server's next scrape).
pub fn scrape(servers: &[Arc<Server>], catalog: &Catalog, deadline: Duration, logging: &LoggingCounters) -> ScrapeOutcome {
    let metrics = catalog.metrics();
    let (tx, rx) = mpsc::channel::<ServerResult>();

    std::thread::scope(|scope| {
        for server in servers {
            let tx = tx.clone();
            let server = Arc::clone(server);
            scope.spawn(move || run_server(&server, metrics, deadline, &tx));
        }
        drop(tx);

        let deadline_at = Instant::now() + deadline;
        let mut families: Vec<Option<Family>> = vec![None; metrics.len()];
        let mut errors = Vec::new();

        loop {
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match rx.recv_timeout(remaining) {
                Ok(result) => merge(&mut families, &mut errors, result, logging),
                Err(mpsc::RecvTimeoutError::Timeout) => break,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        // Drain anything already queued without blocking further — cheap and
        // avoids discarding a result that raced the deadline by microseconds.
        while let Ok(result) = rx.try_recv() {
            merge(&mut families, &mut errors, result, logging);
        }

        ScrapeOutcome { families: families.into_iter().flatten().collect(), errors }
    })
}

fn merge(families: &mut [Option<Family>], errors: &mut Vec<ScrapeError>, result: ServerResult, logging: &LoggingCounters) {
    if let Some(err) = result.error {
        log_scrape_error(logging, &err);
        errors.push(err);
    }
    if let (Some(index), Some(family)) = (result.metric_index, result.family) {
        match &mut families[index] {
            Some(existing) => existing.samples.extend(family.samples),
            slot @ None => *slot = Some(family),
        }
    }
}

/// §7's per-kind log policy: `CONN_AUTH` and `RENDER_SHAPE` are `error`;
/// `CONN_TRANSPORT`, `QUERY_SQLSTATE`, and `QUERY_TIMEOUT` are `warn`.
fn log_scrape_error(logging: &LoggingCounters, err: &ScrapeError) {
    match err {
        ScrapeError::Timeout { .. } => logging.record_warn(),
        ScrapeError::Collect { source, .. } => match source {
            CollectError::RenderShape(_) => logging.record_error(),
            CollectError::ServerStateUnknown => logging.record_warn(),
            CollectError::Wire(WireError::AuthFailed { .. } | WireError::AuthUnsupported(_)) => logging.record_error(),
            CollectError::Wire(_) => logging.record_warn(),
        },
    }
}

/// Wraps a collection failure for one (server, metric) pair, surfacing
/// `QUERY_TIMEOUT` as its own `ScrapeError::Timeout` rather than the generic
/// `Collect` variant so it is distinguishable by callers and in logs.
fn scrape_error(server: &str, metric: &str, source: CollectError) -> ScrapeError {
    if matches!(source, CollectError::Wire(WireError::Timeout)) {
        ScrapeError::Timeout { server: server.to_string(), metric: metric.to_string() }
    } else {
        ScrapeError::Collect { server: server.to_string(), metric: metric.to_string(), source }
    }
}

fn run_server(server: &Server, metrics: &[crate::catalog::Metric], deadline: Duration, tx: &mpsc::Sender<ServerResult>) {
    if let Err(e) = ensure_probed(server, deadline) {
        let _ = tx.send(ServerResult {
            metric_index: None,
            family: None,
            error: Some(scrape_error(&server.config.name, "(probe)", CollectError::Wire(e))),
        });
        return;
    }

    for (metric_index, metric) in metrics.iter().enumerate() {
        let result = collector::collect(server, metric, deadline);
        let (family, error) = match result {
            Ok(family) => (family, None),
            Err(e) => (None, Some(scrape_error(&server.config.name, &metric.tag, e))),
        };
        // A disconnected receiver means the deadline already passed and the
        // orchestrator stopped listening; nothing to do but let the loop
        // finish so this server's connection state is consistent for next time.
        let _ = tx.send(ServerResult { metric_index: Some(metric_index), family, error });
    }
}

/// Opens (or reuses) this server's connection and confirms its version/role
/// are known, so every subsequent `collector::collect` call in this scrape
/// can rely on `ServerState` being populated.
fn ensure_probed(server: &Server, timeout: Duration) -> Result<(), WireError> {
    server.with_connection(|conn| conn.simple_query("SELECT 1", timeout).map(|_| ()))
}

/// Meta-metrics families (`pgscope_state`, `pgscope_logging_*`), appended to
/// a scrape's output by the HTTP surface after calling `scrape`.
pub fn meta_families(servers: &[Arc<Server>], logging: &LoggingCounters) -> Vec<Family> {
    meta::families(servers, logging)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn catalog_with_pg_up() -> Catalog {
        Catalog::parse(
            r#"
            [[metrics]]
            tag = "pg_up"
            collector = "health"

            [[metrics.queries]]
            query = "select 1 as up"
            version = 10
            [[metrics.queries.columns]]
            name = "up"
            type = "gauge"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn scrape_against_zero_servers_returns_empty_families() {
        let catalog = catalog_with_pg_up();
        let logging = LoggingCounters::default();
        let outcome = scrape(&[], &catalog, Duration::from_secs(1), &logging);
        assert!(outcome.families.is_empty());
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn scrape_against_unreachable_server_reports_one_probe_error() {
        use crate::server::ServerConfig;
        use crate::wire::TlsMode;

        let catalog = catalog_with_pg_up();
        let logging = LoggingCounters::default();
        let cfg = ServerConfig {
            name: "a".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1, // nothing listens here
            user: "u".to_string(),
            password: "p".to_string(),
            database: "postgres".to_string(),
            tls: TlsMode::Disable,
            connect_timeout: Duration::from_millis(50),
        };
        let server = Arc::new(Server::new(cfg));
        let outcome = scrape(&[server], &catalog, Duration::from_secs(2), &logging);
        assert!(outcome.families.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn wire_timeout_becomes_a_dedicated_scrape_timeout_error() {
        let err = scrape_error("a", "pg_up", CollectError::Wire(crate::wire::WireError::Timeout));
        assert!(matches!(err, ScrapeError::Timeout { .. }));
    }

    #[test]
    fn other_collect_errors_stay_as_collect() {
        let err = scrape_error("a", "pg_up", CollectError::Wire(crate::wire::WireError::QuerySqlstate { sqlstate: "42601".to_string(), message: "syntax error".to_string() }));
        assert!(matches!(err, ScrapeError::Collect { .. }));
    }

    #[test]
    fn log_levels_follow_error_kind_policy() {
        let logging = LoggingCounters::default();
        log_scrape_error(&logging, &ScrapeError::Collect {
            server: "a".to_string(),
            metric: "m".to_string(),
            source: CollectError::Wire(crate::wire::WireError::AuthFailed { sqlstate: "28P01".to_string(), message: "bad password".to_string() }),
        });
        log_scrape_error(&logging, &ScrapeError::Collect { server: "a".to_string(), metric: "m".to_string(), source: CollectError::RenderShape("shape".to_string()) });
        log_scrape_error(&logging, &ScrapeError::Collect {
            server: "a".to_string(),
            metric: "m".to_string(),
            source: CollectError::Wire(crate::wire::WireError::QuerySqlstate { sqlstate: "42601".to_string(), message: "bad query".to_string() }),
        });
        log_scrape_error(&logging, &ScrapeError::Timeout { server: "a".to_string(), metric: "m".to_string() });

        let families = meta::families(&[], &logging);
        let error_count = families.iter().find(|f| f.name == "pgscope_logging_error").unwrap().samples[0].value;
        let warn_count = families.iter().find(|f| f.name == "pgscope_logging_warn").unwrap().samples[0].value;
        assert_eq!(error_count, 2.0);
        assert_eq!(warn_count, 2.0);
    }
}
