use serde::Deserialize;

/// Where a metric's query applies: against primary servers only, replicas
/// only, or both. Defaults to `Both` when the catalog document omits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Replica,
    Both,
}

impl Default for Role {
    fn default() -> Self {
        Role::Both
    }
}

impl Role {
    /// Whether a variant declared with `self` applies to a server currently
    /// in role `observed`.
    pub fn matches(self, observed: ServerRole) -> bool {
        match (self, observed) {
            (Role::Both, _) => true,
            (Role::Primary, ServerRole::Primary) => true,
            (Role::Replica, ServerRole::Replica) => true,
            _ => false,
        }
    }
}

/// The role PostgreSQL itself reports via `pg_is_in_recovery()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    Primary,
    Replica,
}

/// Ordering applied to a metric family's samples before rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortPolicy {
    Name,
    Data,
}

impl Default for SortPolicy {
    fn default() -> Self {
        SortPolicy::Name
    }
}

/// Whether a metric is collected once against the server's default database,
/// or once per non-template database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseScope {
    Single,
    All,
}

impl Default for DatabaseScope {
    fn default() -> Self {
        DatabaseScope::Single
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Label,
    Gauge,
    Counter,
    Histogram,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnSpec {
    /// Absent in the document ⇒ the column inherits the metric's tag as its
    /// name (only meaningful for a metric with exactly one value column).
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: ColumnType,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuerySpec {
    pub query: String,
    #[serde(default = "default_min_version")]
    pub version: u32,
    pub columns: Vec<ColumnSpec>,
}

fn default_min_version() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricSpec {
    pub tag: String,
    pub collector: String,
    #[serde(default)]
    pub sort: SortPolicy,
    #[serde(default)]
    pub server: Role,
    #[serde(default)]
    pub database: DatabaseScope,
    pub queries: Vec<QuerySpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogDocument {
    #[serde(rename = "metrics")]
    pub metrics: Vec<MetricSpec>,
}
