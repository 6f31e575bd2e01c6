//! Per-server connection lease and runtime state (`ServerState`): detected
//! version, replication role, last-seen timestamp, and the single owned
//! connection a server-task holds for the duration of its scrape.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::catalog::ServerRole;
use crate::wire::{Connection, ConnectParams, TlsMode, WireError};

/// Names a server config may not use — both are reserved by the exporter
/// itself (the synthetic `server` label and the meta-metrics identity).
pub const RESERVED_SERVER_NAMES: [&str; 2] = ["pgscope", "all"];

const UNDETERMINED: u32 = 0;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub tls: TlsMode,
    pub connect_timeout: Duration,
}

/// Runtime state mutated only by the collector and probe logic, readable
/// without holding the connection lease.
#[derive(Debug, Default)]
pub struct ServerState {
    /// Major version (e.g. `16`), `0` until the first successful probe.
    version: AtomicU32,
    /// `server_version_num` in full (e.g. `160001`), for catalog selection.
    version_num: AtomicU32,
    /// 0 = unknown, 1 = primary, 2 = replica.
    role: AtomicU32,
    last_seen_unix: AtomicU64,
    /// 1 if the last probe succeeded — backs the `pgscope_state` meta-metric.
    healthy: AtomicU32,
    /// Set once `CONN_AUTH` is hit; stays set across scrapes so the server
    /// stops being retried until the next `reload` replaces this `ServerState`.
    auth_failed: AtomicBool,
    auth_failure_detail: Mutex<Option<(String, String)>>,
}

impl ServerState {
    pub fn version_num(&self) -> Option<u32> {
        match self.version_num.load(Ordering::Acquire) {
            UNDETERMINED => None,
            v => Some(v),
        }
    }

    pub fn major_version(&self) -> Option<u32> {
        match self.version.load(Ordering::Acquire) {
            UNDETERMINED => None,
            v => Some(v),
        }
    }

    pub fn role(&self) -> Option<ServerRole> {
        match self.role.load(Ordering::Acquire) {
            1 => Some(ServerRole::Primary),
            2 => Some(ServerRole::Replica),
            _ => None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire) == 1
    }

    pub fn last_seen(&self) -> Option<SystemTime> {
        match self.last_seen_unix.load(Ordering::Acquire) {
            0 => None,
            secs => Some(UNIX_EPOCH + Duration::from_secs(secs)),
        }
    }

    fn record_probe(&self, version_num: u32, role: ServerRole, at: SystemTime) {
        self.version_num.store(version_num, Ordering::Release);
        self.version.store(version_num / 10000, Ordering::Release);
        self.role.store(if role == ServerRole::Primary { 1 } else { 2 }, Ordering::Release);
        self.healthy.store(1, Ordering::Release);
        if let Ok(elapsed) = at.duration_since(UNIX_EPOCH) {
            self.last_seen_unix.store(elapsed.as_secs(), Ordering::Release);
        }
    }

    fn record_failure(&self) {
        self.healthy.store(0, Ordering::Release);
    }

    /// `CONN_AUTH`: sticky until the next reload builds a fresh `ServerState`.
    fn record_auth_failure(&self, sqlstate: &str, message: &str) {
        self.healthy.store(0, Ordering::Release);
        self.auth_failed.store(true, Ordering::Release);
        *self.auth_failure_detail.lock().unwrap_or_else(|p| p.into_inner()) = Some((sqlstate.to_string(), message.to_string()));
    }

    pub fn is_auth_failed(&self) -> bool {
        self.auth_failed.load(Ordering::Acquire)
    }

    fn auth_failure(&self) -> Option<(String, String)> {
        self.auth_failure_detail.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// One configured PostgreSQL server: its static config, mutable probe state,
/// and the single connection a running server-task exclusively owns.
pub struct Server {
    pub config: ServerConfig,
    pub state: ServerState,
    conn: Mutex<Option<Connection>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Server { config, state: ServerState::default(), conn: Mutex::new(None) }
    }

    /// Runs `f` with exclusive access to this server's connection, opening
    /// one if none is held or the held one errored last time. On transport
    /// failure the stale connection (if any) is dropped so the next lease
    /// reconnects from scratch. On `CONN_AUTH` the server is marked
    /// unhealthy *and* sticky-failed: every subsequent call short-circuits
    /// without attempting a new connection until `reload` replaces this
    /// `Server`'s `ServerState` entirely.
    pub fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T, WireError>) -> Result<T, WireError> {
        if self.state.is_auth_failed() {
            let (sqlstate, message) = self.state.auth_failure().unwrap_or_else(|| ("28000".to_string(), "authentication previously failed".to_string()));
            return Err(WireError::AuthFailed { sqlstate, message });
        }

        let mut guard = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        if guard.is_none() {
            match self.connect() {
                Ok(conn) => *guard = Some(conn),
                Err(e) => {
                    self.record_connection_failure(&e);
                    return Err(e);
                }
            }
        }
        let conn = guard.as_mut().expect("just ensured Some");
        match f(conn) {
            Ok(v) => {
                self.state.record_probe(conn.server_version_num, current_role(conn), SystemTime::now());
                Ok(v)
            }
            Err(e) => {
                *guard = None;
                self.record_connection_failure(&e);
                Err(e)
            }
        }
    }

    fn record_connection_failure(&self, e: &WireError) {
        match e {
            WireError::AuthFailed { sqlstate, message } => self.state.record_auth_failure(sqlstate, message),
            _ => self.state.record_failure(),
        }
    }

    fn connect(&self) -> Result<Connection, WireError> {
        let params = ConnectParams {
            host: &self.config.host,
            port: self.config.port,
            user: &self.config.user,
            password: &self.config.password,
            database: &self.config.database,
            tls: self.config.tls,
            connect_timeout: self.config.connect_timeout,
        };
        let conn = Connection::connect(&params)?;
        self.state.record_probe(conn.server_version_num, current_role(&conn), SystemTime::now());
        Ok(conn)
    }
}

fn current_role(conn: &Connection) -> ServerRole {
    if conn.in_recovery {
        ServerRole::Replica
    } else {
        ServerRole::Primary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_starts_undetermined() {
        let state = ServerState::default();
        assert_eq!(state.major_version(), None);
        assert_eq!(state.role(), None);
        assert!(!state.is_healthy());
    }

    #[test]
    fn record_probe_derives_major_from_version_num() {
        let state = ServerState::default();
        state.record_probe(160001, ServerRole::Primary, SystemTime::now());
        assert_eq!(state.major_version(), Some(16));
        assert_eq!(state.version_num(), Some(160001));
        assert_eq!(state.role(), Some(ServerRole::Primary));
        assert!(state.is_healthy());
    }

    #[test]
    fn reserved_names_are_declared() {
        assert!(RESERVED_SERVER_NAMES.contains(&"pgscope"));
        assert!(RESERVED_SERVER_NAMES.contains(&"all"));
    }

    #[test]
    fn auth_failure_is_sticky_and_unhealthy() {
        let state = ServerState::default();
        state.record_probe(160001, ServerRole::Primary, SystemTime::now());
        assert!(state.is_healthy());
        state.record_auth_failure("28P01", "password authentication failed");
        assert!(!state.is_healthy());
        assert!(state.is_auth_failed());
        assert_eq!(state.auth_failure(), Some(("28P01".to_string(), "password authentication failed".to_string())));
    }

    #[test]
    fn with_connection_short_circuits_after_auth_failure() {
        use crate::wire::TlsMode;

        let cfg = ServerConfig {
            name: "a".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1,
            user: "u".to_string(),
            password: "p".to_string(),
            database: "postgres".to_string(),
            tls: TlsMode::Disable,
            connect_timeout: Duration::from_millis(50),
        };
        let server = Server::new(cfg);
        server.state.record_auth_failure("28P01", "password authentication failed");
        let err = server.with_connection(|conn| conn.simple_query("SELECT 1", Duration::from_millis(50)).map(|_| ())).unwrap_err();
        assert!(matches!(err, WireError::AuthFailed { .. }));
    }
}
