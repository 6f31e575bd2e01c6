//! Synthetic self-observability counters, rendered alongside the regular
//! catalog-driven samples on every scrape: `pgscope_state{server=…}` (last
//! probe outcome) and `pgscope_logging_{info,warn,error,fatal}` (process-wide
//! log-event counters).
//!
//! `info`/`warn`/`error` are driven by a `tracing_subscriber::Layer` the
//! binary crate installs alongside its `fmt` layer (see `pgscope-web`'s
//! `logging::CountingLayer`), so every `tracing::info!`/`warn!`/`error!` call
//! anywhere in the process counts here without an explicit `record_*` call
//! at the log site. `tracing` has no level above `ERROR`, so `fatal` is not
//! reachable from that layer at all; it is driven explicitly from the one
//! call site that is actually process-fatal (a `CONFIG_INVALID` failure on
//! initial load, `pgscope-web::main`) — which exits before the counter could
//! ever be scraped, so this counter is expected to read `0` in practice.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::render::{Family, MetricType, Sample};
use crate::server::Server;

/// Process-wide counters of log events at each level, read by the meta-
/// metrics renderer. Atomic, never reset — they count events since process
/// start.
#[derive(Default)]
pub struct LoggingCounters {
    info: AtomicU64,
    warn: AtomicU64,
    error: AtomicU64,
    fatal: AtomicU64,
}

impl LoggingCounters {
    pub fn record_info(&self) {
        self.info.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_warn(&self) {
        self.warn.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fatal(&self) {
        self.fatal.fetch_add(1, Ordering::Relaxed);
    }

    fn sample_families(&self) -> [Family; 4] {
        let mk = |suffix: &str, value: u64| {
            let mut f = Family::new(format!("pgscope_logging_{suffix}"), format!("Number of {suffix} log messages."), MetricType::Counter);
            f.samples.push(Sample::new(f.name.clone(), Vec::new(), value as f64));
            f
        };
        [
            mk("info", self.info.load(Ordering::Relaxed)),
            mk("warn", self.warn.load(Ordering::Relaxed)),
            mk("error", self.error.load(Ordering::Relaxed)),
            mk("fatal", self.fatal.load(Ordering::Relaxed)),
        ]
    }
}

/// Builds the `pgscope_state{server=…}` family: one gauge sample per server,
/// `1` if its last probe succeeded, `0` otherwise.
pub fn state_family(servers: &[std::sync::Arc<Server>]) -> Family {
    let mut family = Family::new("pgscope_state", "Whether the last probe of this server succeeded.", MetricType::Gauge);
    for server in servers {
        let value = if server.state.is_healthy() { 1.0 } else { 0.0 };
        family.samples.push(Sample::new("pgscope_state", vec![("server".to_string(), server.config.name.clone())], value));
    }
    family
}

/// All meta-metric families for one scrape: server health plus the logging
/// counters.
pub fn families(servers: &[std::sync::Arc<Server>], logging: &LoggingCounters) -> Vec<Family> {
    let mut out = vec![state_family(servers)];
    out.extend(logging.sample_families());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_counters_accumulate_independently() {
        let counters = LoggingCounters::default();
        counters.record_warn();
        counters.record_warn();
        counters.record_error();
        let families = counters.sample_families();
        let warn = families.iter().find(|f| f.name == "pgscope_logging_warn").unwrap();
        let error = families.iter().find(|f| f.name == "pgscope_logging_error").unwrap();
        assert_eq!(warn.samples[0].value, 2.0);
        assert_eq!(error.samples[0].value, 1.0);
    }

    #[test]
    fn state_family_reflects_health() {
        use crate::server::ServerConfig;
        use crate::wire::TlsMode;
        use std::sync::Arc;
        use std::time::Duration;

        let cfg = ServerConfig {
            name: "a".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            user: "u".to_string(),
            password: "p".to_string(),
            database: "postgres".to_string(),
            tls: TlsMode::Disable,
            connect_timeout: Duration::from_secs(1),
        };
        let server = Arc::new(Server::new(cfg));
        let family = state_family(&[server]);
        assert_eq!(family.samples[0].value, 0.0);
    }
}
