use std::fmt;

#[derive(Debug)]
pub enum CatalogError {
    Io(std::io::Error),
    Parse(String),
    Validation(String),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Io(e) => write!(f, "failed to read catalog: {e}"),
            CatalogError::Parse(msg) => write!(f, "CONFIG_INVALID: malformed catalog: {msg}"),
            CatalogError::Validation(msg) => write!(f, "CONFIG_INVALID: {msg}"),
        }
    }
}

impl std::error::Error for CatalogError {}

impl From<std::io::Error> for CatalogError {
    fn from(e: std::io::Error) -> Self {
        CatalogError::Io(e)
    }
}
