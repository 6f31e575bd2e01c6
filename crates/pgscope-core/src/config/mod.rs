//! Parses and validates `pgscope.toml` into the `Configuration` object the
//! rest of the core consumes. Parsing syntax ergonomics are explicitly out
//! of scope for this crate (see the top-level spec) — what lives here is
//! the minimum needed to turn bytes on disk into a validated, fully-decrypted
//! object: TOML via `serde` + `serde_path_to_error` for dotted-path error
//! messages, `#[serde(deny_unknown_fields)]` everywhere, and AES-256-GCM
//! credential decryption gated on a master key.

mod error;
mod model;
mod secret;

use std::path::{Path, PathBuf};
use std::time::Duration;

pub use error::ConfigError;
pub use secret::MasterKey;

use crate::catalog::Catalog;
use crate::server::{ServerConfig, RESERVED_SERVER_NAMES};
use crate::wire::TlsMode;
use zeroize::Zeroizing;

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub ca_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub max_size: usize,
    pub max_age: Duration,
}

pub struct AdminCredential {
    pub username: String,
    pub password: Zeroizing<String>,
}

pub struct Configuration {
    pub host: String,
    pub metrics_port: u16,
    pub bridge_port: u16,
    pub management_port: u16,
    pub management_unix_socket: Option<PathBuf>,
    pub blocking_timeout: Duration,
    pub compression: bool,
    pub metrics_cache: CacheConfig,
    pub bridge_cache: CacheConfig,
    pub bridge_json_cache_max_size: usize,
    pub bridge_endpoints: Vec<String>,
    pub metrics_tls: Option<TlsConfig>,
    pub bridge_tls: Option<TlsConfig>,
    pub management_tls: Option<TlsConfig>,
    pub catalog_path: PathBuf,
    pub catalog: Catalog,
    pub servers: Vec<ServerConfig>,
    pub admins: Vec<AdminCredential>,
}

/// Fields that cannot be applied to an already-running process. A reload
/// that changes any of these is rejected wholesale (see `Configuration::diff`).
const RESTART_REQUIRED_FIELDS: &[&str] =
    &["host", "metrics_port", "bridge_port", "management_port", "management_unix_socket", "metrics_tls", "bridge_tls", "management_tls"];

impl Configuration {
    /// Parses, validates, and fully decrypts `path`. Fatal on any error —
    /// the caller has no running configuration to fall back to.
    pub fn load(path: &Path, master_key_file: Option<&Path>) -> Result<Configuration, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let raw = parse_raw(&text)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let key = MasterKey::load(master_key_file)?;
        build(raw, base_dir, &key)
    }

    /// Builds a full candidate configuration and, if none of
    /// `RESTART_REQUIRED_FIELDS` differ from `self`, returns it for the
    /// caller to swap in. Otherwise returns `ConfigError::RestartRequired`
    /// naming the changed fields and `self` is left untouched.
    pub fn reload(&self, path: &Path, master_key_file: Option<&Path>) -> Result<Configuration, ConfigError> {
        let candidate = Configuration::load(path, master_key_file)?;
        let changed = self.restart_required_diff(&candidate);
        if !changed.is_empty() {
            return Err(ConfigError::RestartRequired(changed));
        }
        Ok(candidate)
    }

    fn restart_required_diff(&self, other: &Configuration) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.host != other.host {
            changed.push("host");
        }
        if self.metrics_port != other.metrics_port {
            changed.push("metrics_port");
        }
        if self.bridge_port != other.bridge_port {
            changed.push("bridge_port");
        }
        if self.management_port != other.management_port {
            changed.push("management_port");
        }
        if self.management_unix_socket != other.management_unix_socket {
            changed.push("management_unix_socket");
        }
        if tls_changed(&self.metrics_tls, &other.metrics_tls) {
            changed.push("metrics_tls");
        }
        if tls_changed(&self.bridge_tls, &other.bridge_tls) {
            changed.push("bridge_tls");
        }
        if tls_changed(&self.management_tls, &other.management_tls) {
            changed.push("management_tls");
        }
        changed.retain(|f| RESTART_REQUIRED_FIELDS.contains(f));
        changed
    }
}

fn tls_changed(a: &Option<TlsConfig>, b: &Option<TlsConfig>) -> bool {
    match (a, b) {
        (None, None) => false,
        (Some(a), Some(b)) => a.cert_file != b.cert_file || a.key_file != b.key_file || a.ca_file != b.ca_file,
        _ => true,
    }
}

fn parse_raw(text: &str) -> Result<model::RawConfiguration, ConfigError> {
    let de = toml::Deserializer::new(text);
    serde_path_to_error::deserialize(de).map_err(|e| ConfigError::Parse(e.to_string()))
}

fn build(raw: model::RawConfiguration, base_dir: &Path, key: &MasterKey) -> Result<Configuration, ConfigError> {
    let catalog_path = resolve(base_dir, &raw.catalog);
    let catalog = Catalog::load(&catalog_path)?;

    let mut seen_names = std::collections::HashSet::new();
    let mut servers = Vec::with_capacity(raw.servers.len());
    for s in raw.servers {
        if RESERVED_SERVER_NAMES.contains(&s.name.as_str()) {
            return Err(ConfigError::Validation(format!("server name {:?} is reserved", s.name)));
        }
        if !seen_names.insert(s.name.clone()) {
            return Err(ConfigError::Validation(format!("duplicate server name {:?}", s.name)));
        }
        let password = key.decrypt(&s.password)?;
        servers.push(ServerConfig {
            name: s.name,
            host: s.host,
            port: s.port,
            user: s.user,
            password: password.to_string(),
            database: s.database,
            tls: map_tls_mode(s.tls),
            connect_timeout: Duration::from_secs(s.connect_timeout_secs),
        });
    }

    let mut admins = Vec::with_capacity(raw.admins.len());
    for a in raw.admins {
        let password = key.decrypt(&a.password)?;
        admins.push(AdminCredential { username: a.username, password });
    }

    let mut seen_endpoints = std::collections::HashSet::new();
    let mut bridge_endpoints = Vec::with_capacity(raw.bridge_endpoints.len());
    for raw_endpoint in &raw.bridge_endpoints {
        let normalized = crate::bridge::normalize_endpoint(raw_endpoint);
        if !seen_endpoints.insert(normalized.clone()) {
            return Err(ConfigError::Validation(format!("duplicate bridge endpoint {raw_endpoint:?} (normalizes to {normalized:?})")));
        }
        bridge_endpoints.push(normalized);
    }

    Ok(Configuration {
        host: raw.host,
        metrics_port: raw.metrics_port,
        bridge_port: raw.bridge_port,
        management_port: raw.management_port,
        management_unix_socket: raw.management_unix_socket.map(PathBuf::from),
        blocking_timeout: Duration::from_secs(raw.blocking_timeout_secs),
        compression: raw.compression,
        metrics_cache: map_cache(&raw.metrics_cache),
        bridge_cache: map_cache(&raw.bridge_cache),
        bridge_json_cache_max_size: raw.bridge_json_cache_max_size as usize,
        bridge_endpoints,
        metrics_tls: raw.metrics_tls.map(|t| map_tls(base_dir, t)),
        bridge_tls: raw.bridge_tls.map(|t| map_tls(base_dir, t)),
        management_tls: raw.management_tls.map(|t| map_tls(base_dir, t)),
        catalog_path,
        catalog,
        servers,
        admins,
    })
}

fn map_cache(raw: &model::RawCache) -> CacheConfig {
    CacheConfig { max_size: raw.max_size as usize, max_age: Duration::from_secs(raw.max_age_secs) }
}

fn map_tls(base_dir: &Path, raw: model::RawTls) -> TlsConfig {
    TlsConfig { cert_file: resolve(base_dir, &raw.cert_file), key_file: resolve(base_dir, &raw.key_file), ca_file: raw.ca_file.map(|f| resolve(base_dir, &f)) }
}

fn map_tls_mode(raw: model::RawSslMode) -> TlsMode {
    match raw {
        model::RawSslMode::Disable => TlsMode::Disable,
        model::RawSslMode::Require => TlsMode::Require,
        model::RawSslMode::VerifyFull => TlsMode::VerifyFull,
    }
}

fn resolve(base_dir: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn key() -> MasterKey {
        MasterKey::for_test([3u8; 32])
    }

    fn write_temp(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    /// Writes the same 32 raw bytes `key()` uses so `Configuration::load`
    /// (which only accepts a key via env var or file, never the in-process
    /// `MasterKey` directly) decrypts what `key().encrypt(..)` produced.
    fn write_keyfile(dir: &Path) -> PathBuf {
        let path = dir.join("master.key");
        std::fs::write(&path, [3u8; 32]).unwrap();
        path
    }

    #[test]
    fn rejects_reserved_server_name() {
        let tmp = tempfile::tempdir().unwrap();
        write_temp(tmp.path(), "catalog.toml", "metrics = []\n");
        let key_path = write_keyfile(tmp.path());
        let k = key();
        let encrypted = k.encrypt("pw").unwrap();
        let toml = format!(
            "catalog = \"catalog.toml\"\n[[server]]\nname = \"all\"\nhost = \"h\"\nport = 5432\nuser = \"u\"\npassword = \"{encrypted}\"\n"
        );
        let cfg_path = write_temp(tmp.path(), "pgscope.toml", &toml);
        let err = Configuration::load(&cfg_path, Some(&key_path)).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_duplicate_server_names() {
        let tmp = tempfile::tempdir().unwrap();
        write_temp(tmp.path(), "catalog.toml", "metrics = []\n");
        let key_path = write_keyfile(tmp.path());
        let k = key();
        let encrypted = k.encrypt("pw").unwrap();
        let toml = format!(
            "catalog = \"catalog.toml\"\n\
             [[server]]\nname = \"a\"\nhost = \"h\"\nport = 5432\nuser = \"u\"\npassword = \"{encrypted}\"\n\
             [[server]]\nname = \"a\"\nhost = \"h2\"\nport = 5432\nuser = \"u\"\npassword = \"{encrypted}\"\n"
        );
        let cfg_path = write_temp(tmp.path(), "pgscope.toml", &toml);
        let err = Configuration::load(&cfg_path, Some(&key_path)).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn decrypts_server_password() {
        let tmp = tempfile::tempdir().unwrap();
        write_temp(tmp.path(), "catalog.toml", "metrics = []\n");
        let key_path = write_keyfile(tmp.path());
        let k = key();
        let encrypted = k.encrypt("s3cret").unwrap();
        let toml = format!(
            "catalog = \"catalog.toml\"\n[[server]]\nname = \"a\"\nhost = \"h\"\nport = 5432\nuser = \"u\"\npassword = \"{encrypted}\"\n"
        );
        let cfg_path = write_temp(tmp.path(), "pgscope.toml", &toml);
        let cfg = Configuration::load(&cfg_path, Some(&key_path)).unwrap();
        assert_eq!(cfg.servers[0].password, "s3cret");
    }

    #[test]
    fn rejects_unknown_top_level_key() {
        let tmp = tempfile::tempdir().unwrap();
        write_temp(tmp.path(), "catalog.toml", "metrics = []\n");
        let toml = "catalog = \"catalog.toml\"\nbogus_key = 1\n";
        let cfg_path = write_temp(tmp.path(), "pgscope.toml", toml);
        let err = Configuration::load(&cfg_path, None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn reload_with_changed_listen_port_requires_restart() {
        let tmp = tempfile::tempdir().unwrap();
        write_temp(tmp.path(), "catalog.toml", "metrics = []\n");
        let key_path = write_keyfile(tmp.path());
        let k = key();
        let encrypted = k.encrypt("pw").unwrap();
        let toml1 = format!(
            "catalog = \"catalog.toml\"\nmetrics_port = 5002\n[[server]]\nname = \"a\"\nhost = \"h\"\nport = 5432\nuser = \"u\"\npassword = \"{encrypted}\"\n"
        );
        let cfg_path = write_temp(tmp.path(), "pgscope.toml", &toml1);
        let running = Configuration::load(&cfg_path, Some(&key_path)).unwrap();

        let toml2 = format!(
            "catalog = \"catalog.toml\"\nmetrics_port = 5999\n[[server]]\nname = \"a\"\nhost = \"h\"\nport = 5432\nuser = \"u\"\npassword = \"{encrypted}\"\n"
        );
        write_temp(tmp.path(), "pgscope.toml", &toml2);
        let err = running.reload(&cfg_path, Some(&key_path)).unwrap_err();
        assert!(matches!(err, ConfigError::RestartRequired(ref fields) if fields.contains(&"metrics_port")));
    }
}
