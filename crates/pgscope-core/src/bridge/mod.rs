//! Fetches a set of external Prometheus scrape endpoints, concatenates their
//! exposition bodies verbatim, and optionally parses the merge into the JSON
//! view served at `/metrics/bridge.json` — §4.7.

mod error;

use std::sync::mpsc;
use std::time::Duration;

pub use error::{BridgeConfigError, BridgeFetchError};

use crate::render;

/// Normalizes a configured endpoint string to a bare `host:port`: trims
/// surrounding whitespace, strips an `http://`/`https://` scheme, and strips
/// one trailing `/metrics` or `/`. Two endpoints that normalize to the same
/// string are duplicates and rejected at configuration load.
pub fn normalize_endpoint(raw: &str) -> String {
    let mut s = raw.trim();
    for scheme in ["https://", "http://"] {
        if let Some(rest) = s.strip_prefix(scheme) {
            s = rest;
            break;
        }
    }
    if let Some(rest) = s.strip_suffix('/') {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("/metrics") {
        s = rest;
    }
    s.to_string()
}

pub struct EndpointResult {
    pub endpoint: String,
    pub body: Option<String>,
    pub error: Option<BridgeFetchError>,
}

/// Fetches `GET /metrics` from every endpoint in `endpoints`, concurrently,
/// bounded by `timeout` per request. A failed endpoint contributes nothing;
/// its failure is in the returned error list but never aborts the others.
pub fn fetch_all(endpoints: &[String], timeout: Duration) -> Vec<EndpointResult> {
    let client = match reqwest::blocking::Client::builder().timeout(timeout).build() {
        Ok(c) => c,
        Err(e) => {
            return endpoints
                .iter()
                .map(|ep| EndpointResult { endpoint: ep.clone(), body: None, error: Some(BridgeFetchError { endpoint: ep.clone(), message: e.to_string() }) })
                .collect();
        }
    };

    let (tx, rx) = mpsc::channel();
    std::thread::scope(|scope| {
        for endpoint in endpoints {
            let tx = tx.clone();
            let client = client.clone();
            scope.spawn(move || {
                let result = fetch_one(&client, endpoint);
                let _ = tx.send(result);
            });
        }
        drop(tx);
        rx.iter().collect()
    })
}

fn fetch_one(client: &reqwest::blocking::Client, endpoint: &str) -> EndpointResult {
    let url = format!("http://{endpoint}/metrics");
    match client.get(&url).send().and_then(|resp| resp.error_for_status()).and_then(|resp| resp.text()) {
        Ok(body) => EndpointResult { endpoint: endpoint.to_string(), body: Some(body), error: None },
        Err(e) => EndpointResult { endpoint: endpoint.to_string(), body: None, error: Some(BridgeFetchError { endpoint: endpoint.to_string(), message: e.to_string() }) },
    }
}

/// The outcome of one bridge fetch cycle: the merged text payload (bodies of
/// every successful endpoint concatenated verbatim) and the per-endpoint
/// failures (logged and counted, never surfaced in the merged response).
pub struct BridgeOutcome {
    pub merged_text: String,
    pub errors: Vec<BridgeFetchError>,
}

pub fn merge(results: Vec<EndpointResult>) -> BridgeOutcome {
    let mut merged_text = String::new();
    let mut errors = Vec::new();
    for result in results {
        match result.body {
            Some(body) => {
                merged_text.push_str(&body);
                if !body.ends_with('\n') {
                    merged_text.push('\n');
                }
            }
            None => {
                if let Some(e) = result.error {
                    errors.push(e);
                }
            }
        }
    }
    BridgeOutcome { merged_text, errors }
}

/// Parses the merged text exposition into the JSON view cached under
/// `bridge_json.max_size`.
pub fn to_json(merged_text: &str) -> serde_json::Value {
    render::to_json(&render::parse(merged_text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_scheme_and_trailing_metrics() {
        assert_eq!(normalize_endpoint("http://h1/metrics"), "h1");
        assert_eq!(normalize_endpoint("h2:9090/metrics/"), "h2:9090");
        assert_eq!(normalize_endpoint("  h1:9090  "), "h1:9090");
    }

    #[test]
    fn distinguishes_endpoints_by_port() {
        assert_ne!(normalize_endpoint("http://h1/metrics"), normalize_endpoint("h1:9090"));
    }

    #[test]
    fn merge_concatenates_successful_bodies_and_collects_errors() {
        let results = vec![
            EndpointResult { endpoint: "a".to_string(), body: Some("pg_up 1\n".to_string()), error: None },
            EndpointResult { endpoint: "b".to_string(), body: None, error: Some(BridgeFetchError { endpoint: "b".to_string(), message: "connection refused".to_string() }) },
        ];
        let outcome = merge(results);
        assert_eq!(outcome.merged_text, "pg_up 1\n");
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn empty_endpoint_list_yields_empty_merged_text() {
        let outcome = merge(fetch_all(&[], Duration::from_millis(10)));
        assert!(outcome.merged_text.is_empty());
        assert!(outcome.errors.is_empty());
    }
}
