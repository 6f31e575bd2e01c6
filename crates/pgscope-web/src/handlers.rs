//! The metrics-facing HTTP handlers: `/`, `/metrics`, `/metrics/bridge[.json]`.
//! Each follows the same shape — fingerprint the request, consult the
//! relevant cache, and on a miss run the (blocking) collection off the
//! async runtime via `spawn_blocking`.

use std::io::Write;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};

use pgscope_core::bridge;
use pgscope_core::cache::Lookup;
use pgscope_core::orchestrator;
use pgscope_core::render;

use crate::state::AppState;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

fn wants_gzip(headers: &HeaderMap) -> bool {
    headers.get(header::ACCEPT_ENCODING).and_then(|v| v.to_str().ok()).is_some_and(|v| v.contains("gzip"))
}

fn gzip_compress(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let _ = encoder.write_all(bytes);
    encoder.finish().unwrap_or_default()
}

fn respond(bytes: Vec<u8>, gzip: bool, content_type: &'static str) -> Response {
    let mut builder = Response::builder().status(StatusCode::OK).header(header::CONTENT_TYPE, content_type);
    if gzip {
        builder = builder.header(header::CONTENT_ENCODING, "gzip");
    }
    builder.body(axum::body::Body::from(bytes)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// The exporter's own scrape: every configured server against every
/// applicable catalog metric, plus the meta-metrics.
pub async fn metrics(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let snapshot = state.snapshot.load_full();
    let gzip = wants_gzip(&headers) && snapshot.config.compression;
    let fingerprint = format!("metrics:gzip={}:tls={}:epoch={}", gzip, snapshot.config.metrics_tls.is_some(), snapshot.epoch);

    match snapshot.metrics_cache.get_or_claim(&fingerprint) {
        Lookup::Hit(bytes) => respond(bytes, gzip, PROMETHEUS_CONTENT_TYPE),
        Lookup::Miss => {
            let logging = state.logging.clone();
            let snap = snapshot.clone();
            let result = tokio::task::spawn_blocking(move || {
                let deadline = snap.config.blocking_timeout;
                let outcome = orchestrator::scrape(&snap.servers, &snap.config.catalog, deadline, &logging);
                let mut families = outcome.families;
                families.extend(orchestrator::meta_families(&snap.servers, &logging));
                render::render(&families)
            })
            .await;

            match result {
                Ok(text) => {
                    let bytes = if gzip { gzip_compress(text.as_bytes()) } else { text.into_bytes() };
                    snapshot.metrics_cache.publish(&fingerprint, bytes.clone(), snapshot.config.metrics_cache.max_age);
                    respond(bytes, gzip, PROMETHEUS_CONTENT_TYPE)
                }
                Err(_) => {
                    snapshot.metrics_cache.fail(&fingerprint);
                    StatusCode::SERVICE_UNAVAILABLE.into_response()
                }
            }
        }
    }
}

/// Fetches the merged text from every configured external endpoint and
/// returns it verbatim, cached independently from the primary scrape.
async fn bridge_merged_text(state: &Arc<AppState>, gzip: bool) -> Result<Vec<u8>, ()> {
    let snapshot = state.snapshot.load_full();
    let fingerprint = format!("bridge:gzip={}:epoch={}", gzip, snapshot.epoch);

    if let Lookup::Hit(bytes) = snapshot.bridge_cache.get_or_claim(&fingerprint) {
        return Ok(bytes);
    }

    let snap = snapshot.clone();
    let result = tokio::task::spawn_blocking(move || {
        let timeout = snap.config.blocking_timeout;
        let results = bridge::fetch_all(&snap.config.bridge_endpoints, timeout);
        bridge::merge(results).merged_text
    })
    .await;

    match result {
        Ok(text) => {
            let bytes = if gzip { gzip_compress(text.as_bytes()) } else { text.into_bytes() };
            snapshot.bridge_cache.publish(&fingerprint, bytes.clone(), snapshot.config.bridge_cache.max_age);
            Ok(bytes)
        }
        Err(_) => {
            snapshot.bridge_cache.fail(&fingerprint);
            Err(())
        }
    }
}

pub async fn bridge_text(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let gzip = wants_gzip(&headers) && state.snapshot.load().config.compression;
    match bridge_merged_text(&state, gzip).await {
        Ok(bytes) => respond(bytes, gzip, PROMETHEUS_CONTENT_TYPE),
        Err(()) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

/// Enabled only when `bridge_json_cache_max_size` is non-zero — absent
/// otherwise so the route itself reports 404 rather than an empty body.
pub async fn bridge_json(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.snapshot.load_full();
    let Some(json_cache) = snapshot.bridge_json_cache.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let fingerprint = format!("bridge_json:epoch={}", snapshot.epoch);

    if let Lookup::Hit(bytes) = json_cache.get_or_claim(&fingerprint) {
        return respond(bytes, false, "application/json");
    }

    let merged_text = match bridge_merged_text(&state, false).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(()) => {
            json_cache.fail(&fingerprint);
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };
    let json = bridge::to_json(&merged_text);
    let bytes = match serde_json::to_vec(&json) {
        Ok(b) => b,
        Err(_) => {
            json_cache.fail(&fingerprint);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    json_cache.publish(&fingerprint, bytes.clone(), snapshot.bridge_cache.max_age);
    respond(bytes, false, "application/json")
}
