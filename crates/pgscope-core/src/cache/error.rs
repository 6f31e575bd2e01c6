use std::fmt;

/// `CACHE_OVERFLOW`: the caller always still receives its bytes; this exists
/// for logging, not for flow control.
#[derive(Debug)]
pub struct CacheError {
    pub message: String,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CACHE_OVERFLOW: {}", self.message)
    }
}

impl std::error::Error for CacheError {}
