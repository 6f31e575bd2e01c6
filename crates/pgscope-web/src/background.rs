//! Background tick loop: proactively refreshes the bridge cache so an
//! on-demand `/metrics/bridge[.json]` request usually finds a warm entry
//! instead of paying the external-endpoint round trip inline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use pgscope_core::bridge;

use crate::state::AppState;

pub async fn bridge_refresh_loop(state: Arc<AppState>) {
    loop {
        let snapshot = state.snapshot.load_full();
        let max_age = snapshot.config.bridge_cache.max_age;
        if snapshot.config.bridge_endpoints.is_empty() {
            tokio::time::sleep(max_age.max(Duration::from_secs(1))).await;
            continue;
        }

        let snap = snapshot.clone();
        let t0 = Instant::now();
        let merged = tokio::task::spawn_blocking(move || {
            let timeout = snap.config.blocking_timeout;
            let results = bridge::fetch_all(&snap.config.bridge_endpoints, timeout);
            bridge::merge(results)
        })
        .await;

        match merged {
            Ok(outcome) => {
                if !outcome.errors.is_empty() {
                    warn!(failed = outcome.errors.len(), "bridge refresh: some endpoints failed");
                }
                let fingerprint = format!("bridge:gzip=false:epoch={}", snapshot.epoch);
                snapshot.bridge_cache.publish(&fingerprint, outcome.merged_text.clone().into_bytes(), max_age);
                if let Some(json_cache) = snapshot.bridge_json_cache.as_ref() {
                    let json_fingerprint = format!("bridge_json:epoch={}", snapshot.epoch);
                    if let Ok(bytes) = serde_json::to_vec(&bridge::to_json(&outcome.merged_text)) {
                        json_cache.publish(&json_fingerprint, bytes, max_age);
                    }
                }
                debug!(duration_ms = t0.elapsed().as_millis() as u64, "bridge cache refreshed");
            }
            Err(e) => warn!(error = %e, "bridge refresh panicked"),
        }

        tokio::time::sleep(max_age).await;
    }
}
