//! Executes one (server, metric) pair: selects the applicable query variant,
//! runs it, and converts the returned tuples into rendered samples.
//!
//! **Histogram column grouping.** The catalog declares exactly one column
//! with `type = "histogram"`; it marks the start of a four-column group whose
//! remaining three fields are *not* separately declared. In tuple order the
//! group is: the histogram-typed column (bucket upper bounds, as a
//! PostgreSQL array), then `sum`, then `count`, then the bucket counts array.
//! This is the "infer from the first histogram column" form the test suite
//! is required to accept.

mod error;

use std::time::Duration;

pub use error::CollectError;

use crate::catalog::{ColumnType, DatabaseScope, Metric, SortPolicy, Variant};
use crate::render::{Family, MetricType, Sample};
use crate::server::Server;
use crate::wire::{QueryResult, Row};

/// Runs `metric` against `server`. Returns `Ok(None)` when no query variant
/// applies (absent, not an error). Returns `Ok(Some(family))` with possibly
/// zero samples on a clean empty result set.
pub fn collect(server: &Server, metric: &Metric, blocking_timeout: Duration) -> Result<Option<Family>, CollectError> {
    let version = server.state.major_version().ok_or(CollectError::ServerStateUnknown)?;
    let role = server.state.role().ok_or(CollectError::ServerStateUnknown)?;

    let Some(variant) = metric.select(version, role) else {
        return Ok(None);
    };

    let mut family = Family::new(metric.tag.clone(), help_text(metric), family_type(variant));
    let server_name = server.config.name.as_str();

    match metric.database {
        DatabaseScope::Single => {
            let result = server.with_connection(|conn| conn.simple_query(&variant.sql, blocking_timeout))?;
            extract_rows(&mut family, variant, &result, server_name, None)?;
        }
        DatabaseScope::All => {
            let databases = list_databases(server, blocking_timeout)?;
            for db in databases {
                let result = server.with_connection(|conn| conn.simple_query(&variant.sql, blocking_timeout))?;
                extract_rows(&mut family, variant, &result, server_name, Some(&db))?;
            }
        }
    }

    apply_sort(&mut family, metric.sort);
    Ok(Some(family))
}

fn help_text(metric: &Metric) -> String {
    format!("Collected by the {} collector.", metric.collector)
}

fn family_type(variant: &Variant) -> MetricType {
    if variant.columns.iter().any(|c| c.kind == ColumnType::Histogram) {
        MetricType::Histogram
    } else if variant.columns.iter().any(|c| c.kind == ColumnType::Counter) {
        MetricType::Counter
    } else {
        MetricType::Gauge
    }
}

fn list_databases(server: &Server, blocking_timeout: Duration) -> Result<Vec<String>, CollectError> {
    let sql = "SELECT datname FROM pg_database WHERE datistemplate = false AND datallowconn = true ORDER BY datname";
    let result = server.with_connection(|conn| conn.simple_query(sql, blocking_timeout))?;
    Ok(result.rows.iter().filter_map(|r| r.text(0).map(str::to_string)).collect())
}

fn extract_rows(family: &mut Family, variant: &Variant, result: &QueryResult, server_name: &str, database: Option<&str>) -> Result<(), CollectError> {
    let tag = family.name.clone();
    let value_column_count = count_value_columns(variant);
    for row in &result.rows {
        extract_row(family, &tag, variant, row, server_name, database, value_column_count)?;
    }
    Ok(())
}

fn count_value_columns(variant: &Variant) -> usize {
    variant.columns.iter().filter(|c| c.kind != ColumnType::Label).count()
}

#[allow(clippy::too_many_arguments)]
fn extract_row(
    family: &mut Family,
    tag: &str,
    variant: &Variant,
    row: &Row,
    server_name: &str,
    database: Option<&str>,
    value_column_count: usize,
) -> Result<(), CollectError> {
    let mut labels: Vec<(String, String)> = Vec::new();
    let mut idx = 0usize;

    for col in &variant.columns {
        let raw = row.columns.get(idx).cloned().flatten();
        match col.kind {
            ColumnType::Label => {
                let name = col.name.clone().unwrap_or_default();
                let value = raw.map(|b| String::from_utf8_lossy(&b).into_owned()).unwrap_or_default();
                labels.push((name, value));
                idx += 1;
            }
            ColumnType::Gauge | ColumnType::Counter => {
                let base_name = sample_name(tag, col.name.as_deref(), value_column_count);
                let value = parse_numeric(raw.as_deref());
                let sample_labels = labels_with_server_and_db(&labels, server_name, database);
                family.samples.push(Sample::new(base_name, sample_labels, value));
                idx += 1;
            }
            ColumnType::Histogram => {
                let base_name = sample_name(tag, col.name.as_deref(), value_column_count);
                let bounds_raw = raw;
                let sum_raw = row.columns.get(idx + 1).cloned().flatten();
                let count_raw = row.columns.get(idx + 2).cloned().flatten();
                let counts_raw = row.columns.get(idx + 3).cloned().flatten();
                push_histogram(family, tag, &base_name, &labels, server_name, database, bounds_raw, sum_raw, count_raw, counts_raw)?;
                idx += 4;
            }
        }
    }
    Ok(())
}

fn labels_with_server_and_db(labels: &[(String, String)], server_name: &str, database: Option<&str>) -> Vec<(String, String)> {
    let mut out = labels.to_vec();
    out.push(("server".to_string(), server_name.to_string()));
    if let Some(db) = database {
        out.push(("database".to_string(), db.to_string()));
    }
    out
}

fn sample_name(tag: &str, column_name: Option<&str>, value_column_count: usize) -> String {
    if value_column_count <= 1 {
        tag.to_string()
    } else {
        format!("{tag}_{}", column_name.unwrap_or(tag))
    }
}

#[allow(clippy::too_many_arguments)]
fn push_histogram(
    family: &mut Family,
    tag: &str,
    base_name: &str,
    labels: &[(String, String)],
    server_name: &str,
    database: Option<&str>,
    bounds_raw: Option<Vec<u8>>,
    sum_raw: Option<Vec<u8>>,
    count_raw: Option<Vec<u8>>,
    counts_raw: Option<Vec<u8>>,
) -> Result<(), CollectError> {
    let bounds = bounds_raw.map(|b| parse_pg_array(&text(&b))).unwrap_or_default();
    let counts = counts_raw.map(|b| parse_pg_array(&text(&b))).unwrap_or_default();

    if bounds.len() != counts.len() {
        return Err(CollectError::RenderShape(format!(
            "metric {tag:?}: histogram bucket-counts length {} does not match bucket-bounds length {}",
            counts.len(),
            bounds.len()
        )));
    }

    let mut prev_bound = f64::NEG_INFINITY;
    for (bound_str, count_str) in bounds.iter().zip(counts.iter()) {
        let bound: f64 = bound_str.parse().unwrap_or(f64::NAN);
        if bound <= prev_bound {
            return Err(CollectError::RenderShape(format!("metric {tag:?}: histogram bucket upper bounds must be strictly increasing")));
        }
        prev_bound = bound;
        let count: f64 = count_str.parse().unwrap_or(f64::NAN);
        let mut bucket_labels = labels_with_server_and_db(labels, server_name, database);
        bucket_labels.push(("le".to_string(), format_bound(bound)));
        family.samples.push(Sample::new(format!("{base_name}_bucket"), bucket_labels, count));
    }

    let total_count = parse_numeric(count_raw.as_deref());
    let mut inf_labels = labels_with_server_and_db(labels, server_name, database);
    inf_labels.push(("le".to_string(), "+Inf".to_string()));
    family.samples.push(Sample::new(format!("{base_name}_bucket"), inf_labels, total_count));

    let sum_value = parse_numeric(sum_raw.as_deref());
    family.samples.push(Sample::new(format!("{base_name}_sum"), labels_with_server_and_db(labels, server_name, database), sum_value));
    family.samples.push(Sample::new(format!("{base_name}_count"), labels_with_server_and_db(labels, server_name, database), total_count));

    Ok(())
}

fn format_bound(v: f64) -> String {
    if v.is_infinite() && v > 0.0 {
        "+Inf".to_string()
    } else {
        format!("{v}")
    }
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Splits a PostgreSQL text-format array (`{1,2,3}`) into its element
/// strings. Does not handle nested arrays or quoted elements containing
/// commas — catalog-declared histogram bound/count arrays are flat numerics.
fn parse_pg_array(s: &str) -> Vec<String> {
    let inner = s.trim().trim_start_matches('{').trim_end_matches('}');
    if inner.is_empty() {
        return Vec::new();
    }
    inner.split(',').map(|p| p.trim().trim_matches('"').to_string()).collect()
}

/// Raw bytes → numeric sample value. `NULL` becomes `NaN`; booleans become
/// `0.0`/`1.0`; everything else parses as `i64` then falls back to `f64`.
fn parse_numeric(raw: Option<&[u8]>) -> f64 {
    let Some(raw) = raw else { return f64::NAN };
    let s = String::from_utf8_lossy(raw);
    match s.as_ref() {
        "t" => return 1.0,
        "f" => return 0.0,
        _ => {}
    }
    if let Ok(i) = s.parse::<i64>() {
        return i as f64;
    }
    s.parse::<f64>().unwrap_or(f64::NAN)
}

fn apply_sort(family: &mut Family, policy: SortPolicy) {
    if policy == SortPolicy::Name {
        family.samples.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.labels.cmp(&b.labels)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnSpec;

    fn row(values: &[Option<&str>]) -> Row {
        Row { columns: values.iter().map(|v| v.map(|s| s.as_bytes().to_vec())).collect() }
    }

    #[test]
    fn numeric_parsing_handles_null_bool_and_numbers() {
        assert!(parse_numeric(None).is_nan());
        assert_eq!(parse_numeric(Some(b"t")), 1.0);
        assert_eq!(parse_numeric(Some(b"f")), 0.0);
        assert_eq!(parse_numeric(Some(b"42")), 42.0);
        assert_eq!(parse_numeric(Some(b"3.5")), 3.5);
    }

    #[test]
    fn pg_array_parses_flat_numeric_arrays() {
        assert_eq!(parse_pg_array("{0.1,0.5,1,5}"), vec!["0.1", "0.5", "1", "5"]);
        assert_eq!(parse_pg_array("{}"), Vec::<String>::new());
    }

    #[test]
    fn sample_name_inherits_tag_for_single_value_column() {
        assert_eq!(sample_name("pg_up", None, 1), "pg_up");
        assert_eq!(sample_name("pg_stat_database", Some("xact_commit"), 2), "pg_stat_database_xact_commit");
    }

    #[test]
    fn histogram_shape_mismatch_is_a_render_shape_error() {
        let variant = Variant {
            min_version: 10,
            sql: "select 1".to_string(),
            columns: vec![ColumnSpec { name: Some("v".to_string()), kind: ColumnType::Histogram, description: None }],
        };
        let mut family = Family::new("pg_latency", "", MetricType::Histogram);
        let r = row(&[Some("{0.1,0.5,1}"), Some("10"), Some("3"), Some("{1,2}")]);
        let result = extract_row(&mut family, "pg_latency", &variant, &r, "a", None, 1);
        assert!(matches!(result, Err(CollectError::RenderShape(_))));
    }

    #[test]
    fn gauge_sample_carries_server_label() {
        let variant = Variant {
            min_version: 10,
            sql: "select 1".to_string(),
            columns: vec![ColumnSpec { name: Some("v".to_string()), kind: ColumnType::Gauge, description: None }],
        };
        let mut family = Family::new("pg_up", "", MetricType::Gauge);
        let r = row(&[Some("1")]);
        extract_row(&mut family, "pg_up", &variant, &r, "a", None, 1).unwrap();
        assert_eq!(family.samples.len(), 1);
        assert_eq!(family.samples[0].labels, vec![("server".to_string(), "a".to_string())]);
        assert_eq!(family.samples[0].value, 1.0);
    }
}
