//! Shared application state: the RCU-swapped `Configuration`/server/cache
//! snapshot, the process-wide logging counters, and jemalloc housekeeping.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;

use pgscope_core::cache::Cache;
use pgscope_core::config::{ConfigError, Configuration};
use pgscope_core::meta::LoggingCounters;
use pgscope_core::server::Server;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Releases unused memory back to the operating system via jemalloc's arena
/// purge. Called after a reload rebuilds the server list and caches, which
/// can leave a burst of freed allocations behind.
#[cfg(not(target_env = "msvc"))]
pub fn release_memory_to_os() {
    unsafe {
        tikv_jemalloc_sys::mallctl(c"arena.4096.purge".as_ptr().cast(), std::ptr::null_mut(), std::ptr::null_mut(), std::ptr::null_mut(), 0);
    }
}

#[cfg(target_env = "msvc")]
pub fn release_memory_to_os() {}

/// Everything that changes together on a reload: the validated
/// configuration, the server handles built from it, the caches (sized from
/// it), and the epoch folded into every cache fingerprint so stale entries
/// from a prior configuration are never served after a swap.
pub struct AppSnapshot {
    pub config: Configuration,
    pub servers: Vec<Arc<Server>>,
    pub metrics_cache: Cache,
    pub bridge_cache: Cache,
    pub bridge_json_cache: Option<Cache>,
    pub epoch: u64,
}

impl AppSnapshot {
    fn build(config: Configuration, epoch: u64) -> AppSnapshot {
        let servers = config.servers.iter().cloned().map(|c| Arc::new(Server::new(c))).collect();
        let bridge_json_cache = (config.bridge_json_cache_max_size > 0).then(|| Cache::new(config.bridge_json_cache_max_size));
        let metrics_cache = Cache::new(config.metrics_cache.max_size);
        let bridge_cache = Cache::new(config.bridge_cache.max_size);
        AppSnapshot { config, servers, metrics_cache, bridge_cache, bridge_json_cache, epoch }
    }
}

pub struct AppState {
    pub snapshot: ArcSwap<AppSnapshot>,
    pub logging: Arc<LoggingCounters>,
    pub config_path: PathBuf,
    pub master_key_file: Option<PathBuf>,
    pub started_at: Instant,
}

impl AppState {
    /// `logging` is shared with the `tracing::Layer` installed in `main` so
    /// every log event anywhere in the process (not just inside this state)
    /// is reflected in the `pgscope_logging_*` meta-metrics.
    pub fn load(config_path: PathBuf, master_key_file: Option<PathBuf>, logging: Arc<LoggingCounters>) -> Result<AppState, ConfigError> {
        let config = Configuration::load(&config_path, master_key_file.as_deref())?;
        let snapshot = AppSnapshot::build(config, 0);
        Ok(AppState { snapshot: ArcSwap::from_pointee(snapshot), logging, config_path, master_key_file, started_at: Instant::now() })
    }

    /// Reloads the configuration file, validates no restart-required field
    /// changed, and atomically swaps in a fresh snapshot (new servers, new
    /// caches, bumped epoch). On `RestartRequired` the running snapshot is
    /// left untouched.
    pub fn reload(&self) -> Result<u64, ConfigError> {
        let current = self.snapshot.load();
        let candidate = current.config.reload(&self.config_path, self.master_key_file.as_deref())?;
        let epoch = current.epoch + 1;
        self.snapshot.store(Arc::new(AppSnapshot::build(candidate, epoch)));
        release_memory_to_os();
        Ok(epoch)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
