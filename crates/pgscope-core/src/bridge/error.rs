use std::fmt;

/// `BRIDGE_FETCH`: a single endpoint's failure. Never aborts the merged
/// response — the bridge logs and counts it, then serves what it has.
#[derive(Debug)]
pub struct BridgeFetchError {
    pub endpoint: String,
    pub message: String,
}

impl fmt::Display for BridgeFetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BRIDGE_FETCH {}: {}", self.endpoint, self.message)
    }
}

impl std::error::Error for BridgeFetchError {}

/// Configuration-time error: a duplicate endpoint after normalization.
#[derive(Debug)]
pub struct BridgeConfigError {
    pub message: String,
}

impl fmt::Display for BridgeConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CONFIG_INVALID: {}", self.message)
    }
}

impl std::error::Error for BridgeConfigError {}
