//! The on-disk shape of `pgscope.toml`, deserialized with
//! `#[serde(deny_unknown_fields)]` throughout so an unrecognized key is
//! fatal at load — matching the catalog document's own policy.

use serde::Deserialize;

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_metrics_port() -> u16 {
    5002
}

fn default_bridge_port() -> u16 {
    5003
}

fn default_management_port() -> u16 {
    5001
}

fn default_blocking_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_cache_max_size() -> u64 {
    64 * 1024 * 1024
}

fn default_cache_max_age_secs() -> u64 {
    5
}

fn default_database() -> String {
    "postgres".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfiguration {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_bridge_port")]
    pub bridge_port: u16,
    #[serde(default = "default_management_port")]
    pub management_port: u16,
    #[serde(default)]
    pub management_unix_socket: Option<String>,
    #[serde(default = "default_blocking_timeout_secs")]
    pub blocking_timeout_secs: u64,
    #[serde(default)]
    pub compression: bool,
    #[serde(default)]
    pub metrics_cache: RawCache,
    #[serde(default)]
    pub bridge_cache: RawCache,
    #[serde(default)]
    pub bridge_json_cache_max_size: u64,
    #[serde(default)]
    pub bridge_endpoints: Vec<String>,
    #[serde(default)]
    pub metrics_tls: Option<RawTls>,
    #[serde(default)]
    pub bridge_tls: Option<RawTls>,
    #[serde(default)]
    pub management_tls: Option<RawTls>,
    pub catalog: String,
    #[serde(rename = "server", default)]
    pub servers: Vec<RawServer>,
    #[serde(rename = "admin", default)]
    pub admins: Vec<RawAdmin>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCache {
    #[serde(default = "default_cache_max_size")]
    pub max_size: u64,
    #[serde(default = "default_cache_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for RawCache {
    fn default() -> Self {
        RawCache { max_size: default_cache_max_size(), max_age_secs: default_cache_max_age_secs() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTls {
    pub cert_file: String,
    pub key_file: String,
    #[serde(default)]
    pub ca_file: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RawSslMode {
    Disable,
    Require,
    VerifyFull,
}

impl Default for RawSslMode {
    fn default() -> Self {
        RawSslMode::Disable
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawServer {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Opaque, encrypted password material — see `config::secret`.
    pub password: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub tls: RawSslMode,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawAdmin {
    pub username: String,
    /// Opaque, encrypted password material — see `config::secret`.
    pub password: String,
}
