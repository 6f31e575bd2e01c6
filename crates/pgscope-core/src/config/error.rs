use std::fmt;

/// `CONFIG_INVALID`: fatal on initial load; a reload instead reports this to
/// the caller and leaves the running configuration untouched.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    Validation(String),
    Secret(String),
    Catalog(crate::catalog::CatalogError),
    /// Reload only: the candidate configuration differs from the running one
    /// in a field that cannot be applied without a process restart.
    RestartRequired(Vec<&'static str>),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read configuration: {e}"),
            ConfigError::Parse(msg) => write!(f, "CONFIG_INVALID: malformed configuration: {msg}"),
            ConfigError::Validation(msg) => write!(f, "CONFIG_INVALID: {msg}"),
            ConfigError::Secret(msg) => write!(f, "CONFIG_INVALID: credential store: {msg}"),
            ConfigError::Catalog(e) => write!(f, "CONFIG_INVALID: catalog: {e}"),
            ConfigError::RestartRequired(fields) => {
                write!(f, "restart required: changed field(s) {}", fields.join(", "))
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<crate::catalog::CatalogError> for ConfigError {
    fn from(e: crate::catalog::CatalogError) -> Self {
        ConfigError::Catalog(e)
    }
}
