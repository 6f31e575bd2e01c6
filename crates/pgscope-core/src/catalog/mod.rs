//! The version-aware query catalog: load a TOML document of metric
//! definitions, validate it, and select the single applicable query variant
//! for a given (metric, server version, server role).

mod error;
mod model;

use std::collections::BTreeMap;
use std::path::Path;

pub use error::CatalogError;
pub use model::{ColumnSpec, ColumnType, DatabaseScope, Role, ServerRole, SortPolicy};

/// One SQL variant within a metric, keyed by its minimum applicable server
/// version so the catalog can binary-search (`BTreeMap::range`) for the
/// highest variant at or below a target version.
#[derive(Debug, Clone)]
pub struct Variant {
    pub min_version: u32,
    pub sql: String,
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Clone)]
pub struct Metric {
    pub tag: String,
    pub collector: String,
    pub sort: SortPolicy,
    pub server: Role,
    pub database: DatabaseScope,
    variants: BTreeMap<u32, Variant>,
}

impl Metric {
    /// Returns the highest-`min_version` variant at or below `version`, or
    /// `None` if the server's role doesn't match or no variant applies.
    pub fn select(&self, version: u32, role: ServerRole) -> Option<&Variant> {
        if !self.server.matches(role) {
            return None;
        }
        self.variants.range(..=version).next_back().map(|(_, v)| v)
    }
}

/// An immutable, validated collection of metric definitions. Replaced wholesale
/// on reload — never mutated in place while in use (see the server-wide RCU
/// swap discipline).
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    metrics: Vec<Metric>,
}

impl Catalog {
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn load(path: &Path) -> Result<Catalog, CatalogError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Catalog, CatalogError> {
        let de = toml::Deserializer::new(text);
        let doc: model::CatalogDocument =
            serde_path_to_error::deserialize(de).map_err(|e| CatalogError::Parse(e.to_string()))?;
        Catalog::from_document(doc)
    }

    fn from_document(doc: model::CatalogDocument) -> Result<Catalog, CatalogError> {
        let mut metrics = Vec::with_capacity(doc.metrics.len());
        for spec in doc.metrics {
            metrics.push(build_metric(spec)?);
        }
        Ok(Catalog { metrics })
    }
}

fn build_metric(spec: model::MetricSpec) -> Result<Metric, CatalogError> {
    if spec.queries.is_empty() {
        return Err(CatalogError::Validation(format!("metric {:?} has no query variants", spec.tag)));
    }

    let mut variants = BTreeMap::new();
    for q in &spec.queries {
        validate_columns(&spec.tag, &q.columns)?;
        if variants.insert(q.version, Variant { min_version: q.version, sql: q.query.clone(), columns: q.columns.clone() }).is_some() {
            return Err(CatalogError::Validation(format!(
                "metric {:?} declares two variants with the same minimum version {}",
                spec.tag, q.version
            )));
        }
    }

    Ok(Metric {
        tag: spec.tag,
        collector: spec.collector,
        sort: spec.sort,
        server: spec.server,
        database: spec.database,
        variants,
    })
}

fn validate_columns(tag: &str, columns: &[ColumnSpec]) -> Result<(), CatalogError> {
    let mut seen_histogram = false;
    for col in columns {
        if seen_histogram {
            return Err(CatalogError::Validation(format!(
                "metric {tag:?}: no columns may follow a histogram column group"
            )));
        }
        match col.kind {
            ColumnType::Label => {
                let name = col.name.as_deref().unwrap_or("");
                if name.is_empty() {
                    return Err(CatalogError::Validation(format!("metric {tag:?}: label column must have a non-empty name")));
                }
                if name == "server" {
                    return Err(CatalogError::Validation(format!("metric {tag:?}: \"server\" is a reserved label name")));
                }
            }
            ColumnType::Histogram => seen_histogram = true,
            ColumnType::Gauge | ColumnType::Counter => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(body: &str) -> Catalog {
        Catalog::parse(body).expect("catalog should parse")
    }

    #[test]
    fn selects_highest_variant_at_or_below_version() {
        let cat = doc(
            r#"
            [[metrics]]
            tag = "pg_stat_database"
            collector = "database"

            [[metrics.queries]]
            query = "select 1"
            version = 10
            [[metrics.queries.columns]]
            name = "value"
            type = "gauge"

            [[metrics.queries]]
            query = "select 2"
            version = 12
            [[metrics.queries.columns]]
            name = "value"
            type = "gauge"
            "#,
        );
        let metric = &cat.metrics()[0];
        assert_eq!(metric.select(11, ServerRole::Primary).unwrap().min_version, 10);
        assert_eq!(metric.select(12, ServerRole::Primary).unwrap().min_version, 12);
        assert_eq!(metric.select(13, ServerRole::Primary).unwrap().min_version, 12);
    }

    #[test]
    fn below_every_variant_minimum_yields_none() {
        let cat = doc(
            r#"
            [[metrics]]
            tag = "pg_wal_last_received"
            collector = "replication"
            server = "replica"

            [[metrics.queries]]
            query = "select 1"
            version = 11
            [[metrics.queries.columns]]
            name = "value"
            type = "counter"
            "#,
        );
        let metric = &cat.metrics()[0];
        assert!(metric.select(10, ServerRole::Replica).is_none());
        assert!(metric.select(11, ServerRole::Primary).is_none());
        assert!(metric.select(11, ServerRole::Replica).is_some());
    }

    #[test]
    fn rejects_duplicate_minimum_versions() {
        let err = Catalog::parse(
            r#"
            [[metrics]]
            tag = "dup"
            collector = "x"

            [[metrics.queries]]
            query = "select 1"
            version = 10
            [[metrics.queries.columns]]
            name = "value"
            type = "gauge"

            [[metrics.queries]]
            query = "select 2"
            version = 10
            [[metrics.queries.columns]]
            name = "value"
            type = "gauge"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[test]
    fn rejects_reserved_server_label() {
        let err = Catalog::parse(
            r#"
            [[metrics]]
            tag = "bad"
            collector = "x"

            [[metrics.queries]]
            query = "select 1"
            version = 10
            [[metrics.queries.columns]]
            name = "server"
            type = "label"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[test]
    fn rejects_columns_after_histogram_group() {
        let err = Catalog::parse(
            r#"
            [[metrics]]
            tag = "bad_hist"
            collector = "x"

            [[metrics.queries]]
            query = "select 1"
            version = 10
            [[metrics.queries.columns]]
            name = "value"
            type = "histogram"
            [[metrics.queries.columns]]
            name = "trailing"
            type = "label"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }
}
