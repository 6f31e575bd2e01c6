//! pgscope-core — the declarative metrics engine behind the pgscope Prometheus exporter.
//!
//! Provides:
//! - `wire` — a minimal PostgreSQL wire-protocol client (TLS, SCRAM-SHA-256/MD5 auth, simple query)
//! - `catalog` — the version-aware query catalog (load, validate, select)
//! - `collector` — per-(server, metric) collection and sample extraction
//! - `server` — per-server connection lease and version/role probing
//! - `orchestrator` — scrape fan-out, deadlines, meta-metrics
//! - `cache` — fingerprint→bytes store with TTL, max-size eviction, single-flight
//! - `render` — Prometheus text exposition rendering
//! - `bridge` — external endpoint fetch, merge, and JSON re-exposition
//! - `config` — the validated `Configuration` object and its loader
//! - `meta` — synthetic self-observability counters

pub mod bridge;
pub mod cache;
pub mod catalog;
pub mod collector;
pub mod config;
pub mod meta;
pub mod orchestrator;
pub mod render;
pub mod server;
pub mod wire;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
