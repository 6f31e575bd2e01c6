//! Prometheus text exposition rendering, and a parser for the same format
//! (used both to verify the round-trip law and to make sense of bridged
//! external endpoints).

mod model;

pub use model::{Family, MetricType, Sample};

/// Renders a set of families to the Prometheus text exposition format.
/// `HELP`/`TYPE` are emitted once per family, immediately before its samples,
/// in the order the families are given — callers are responsible for
/// grouping all of one metric's samples (across servers) into a single
/// `Family` before calling this.
pub fn render(families: &[Family]) -> String {
    let mut out = String::new();
    for family in families {
        out.push_str("# HELP ");
        out.push_str(&family.name);
        out.push(' ');
        out.push_str(&escape_help(&family.help));
        out.push('\n');
        out.push_str("# TYPE ");
        out.push_str(&family.name);
        out.push(' ');
        out.push_str(family.metric_type.as_str());
        out.push('\n');
        for sample in &family.samples {
            out.push_str(&sample.name);
            if !sample.labels.is_empty() {
                out.push('{');
                for (i, (k, v)) in sample.labels.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(k);
                    out.push_str("=\"");
                    out.push_str(&escape_label_value(v));
                    out.push('"');
                }
                out.push('}');
            }
            out.push(' ');
            out.push_str(&format_value(sample.value));
            out.push('\n');
        }
    }
    out
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "+Inf".to_string() } else { "-Inf".to_string() }
    } else {
        format!("{v}")
    }
}

fn escape_label_value(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    for c in v.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

fn escape_help(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    for c in v.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

/// A minimal parser for the text exposition format: enough to support the
/// renderer's round-trip law and to read bridged external endpoints.
/// Unrecognized lines (blank, or anything not `#`-prefixed or a sample) are
/// skipped rather than rejected, matching real-world exporter tolerance.
pub fn parse(text: &str) -> Vec<Family> {
    let mut families: Vec<Family> = Vec::new();
    let mut index: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut pending_help: Option<(String, String)> = None;
    let mut pending_type: Option<(String, MetricType)> = None;

    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("# HELP ") {
            if let Some((name, help)) = rest.split_once(' ') {
                pending_help = Some((name.to_string(), help.to_string()));
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("# TYPE ") {
            if let Some((name, kind)) = rest.split_once(' ') {
                let metric_type = match kind {
                    "counter" => MetricType::Counter,
                    "histogram" => MetricType::Histogram,
                    _ => MetricType::Gauge,
                };
                pending_type = Some((name.to_string(), metric_type));
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let Some((name, labels, value)) = parse_sample_line(line) else { continue };
        let family_name = base_family_name(&name);

        let idx = *index.entry(family_name.clone()).or_insert_with(|| {
            let help = pending_help.take().map(|(_, h)| h).unwrap_or_default();
            let metric_type = pending_type.take().map(|(_, t)| t).unwrap_or(MetricType::Gauge);
            families.push(Family::new(family_name.clone(), help, metric_type));
            families.len() - 1
        });
        families[idx].samples.push(Sample::new(name, labels, value));
    }
    families
}

fn base_family_name(sample_name: &str) -> String {
    for suffix in ["_bucket", "_sum", "_count"] {
        if let Some(stripped) = sample_name.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    sample_name.to_string()
}

fn parse_sample_line(line: &str) -> Option<(String, Vec<(String, String)>, f64)> {
    let (name_and_labels, value_str) = line.rsplit_once(' ')?;
    let value = parse_value(value_str)?;
    if let Some(brace) = name_and_labels.find('{') {
        let name = name_and_labels[..brace].to_string();
        let label_body = name_and_labels[brace + 1..name_and_labels.rfind('}')?].to_string();
        let labels = parse_labels(&label_body);
        Some((name, labels, value))
    } else {
        Some((name_and_labels.to_string(), Vec::new(), value))
    }
}

fn parse_labels(body: &str) -> Vec<(String, String)> {
    let mut labels = Vec::new();
    let bytes = body.as_bytes();
    let mut start = 0;
    while start < body.len() {
        let eq = match body[start..].find('=') {
            Some(p) => start + p,
            None => break,
        };
        let key = body[start..eq].trim_start_matches(',').to_string();
        let mut i = eq + 2; // skip `="`
        let mut value = String::new();
        while i < bytes.len() && bytes[i] != b'"' {
            if bytes[i] == b'\\' && i + 1 < bytes.len() {
                i += 1;
                match bytes[i] {
                    b'n' => value.push('\n'),
                    b'"' => value.push('"'),
                    b'\\' => value.push('\\'),
                    other => value.push(other as char),
                }
            } else {
                value.push(bytes[i] as char);
            }
            i += 1;
        }
        labels.push((key, value));
        start = i + 1;
    }
    labels
}

fn parse_value(s: &str) -> Option<f64> {
    match s {
        "NaN" => Some(f64::NAN),
        "+Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        other => other.parse().ok(),
    }
}

/// Renders a family set as the JSON representation used by `/metrics/bridge.json`.
pub fn to_json(families: &[Family]) -> serde_json::Value {
    let families_json: Vec<serde_json::Value> = families
        .iter()
        .map(|f| {
            let samples: Vec<serde_json::Value> = f
                .samples
                .iter()
                .map(|s| {
                    let labels: serde_json::Map<String, serde_json::Value> =
                        s.labels.iter().map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone()))).collect();
                    serde_json::json!({
                        "name": s.name,
                        "labels": labels,
                        "value": json_number(s.value),
                    })
                })
                .collect();
            serde_json::json!({
                "name": f.name,
                "help": f.help,
                "type": f.metric_type.as_str(),
                "samples": samples,
            })
        })
        .collect();
    serde_json::Value::Array(families_json)
}

fn json_number(v: f64) -> serde_json::Value {
    if v.is_finite() {
        serde_json::Number::from_f64(v).map(serde_json::Value::Number).unwrap_or(serde_json::Value::String(format_value(v)))
    } else {
        serde_json::Value::String(format_value(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_help_type_once_and_escapes_labels() {
        let mut family = Family::new("pg_up", "Whether the server is reachable", MetricType::Gauge);
        family.samples.push(Sample::new("pg_up", vec![("server".to_string(), "a\"b\\c".to_string())], 1.0));
        let text = render(&[family]);
        assert_eq!(
            text,
            "# HELP pg_up Whether the server is reachable\n# TYPE pg_up gauge\npg_up{server=\"a\\\"b\\\\c\"} 1\n"
        );
    }

    #[test]
    fn renders_special_float_values_literally() {
        let mut family = Family::new("pg_x", "x", MetricType::Gauge);
        family.samples.push(Sample::new("pg_x", vec![], f64::NAN));
        family.samples.push(Sample::new("pg_x", vec![], f64::INFINITY));
        family.samples.push(Sample::new("pg_x", vec![], f64::NEG_INFINITY));
        let text = render(&[family]);
        assert!(text.contains("pg_x NaN\n"));
        assert!(text.contains("pg_x +Inf\n"));
        assert!(text.contains("pg_x -Inf\n"));
    }

    #[test]
    fn parse_round_trips_simple_family() {
        let mut family = Family::new("pg_up", "desc", MetricType::Gauge);
        family.samples.push(Sample::new("pg_up", vec![("server".to_string(), "a".to_string())], 1.0));
        let text = render(&[family]);
        let parsed = parse(&text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "pg_up");
        assert_eq!(parsed[0].samples.len(), 1);
        assert_eq!(parsed[0].samples[0].value, 1.0);
        assert_eq!(parsed[0].samples[0].labels, vec![("server".to_string(), "a".to_string())]);
    }

    #[test]
    fn parse_groups_histogram_components_into_one_family() {
        let text = "# HELP pg_latency latency\n# TYPE pg_latency histogram\npg_latency_bucket{le=\"1\"} 2\npg_latency_bucket{le=\"+Inf\"} 3\npg_latency_sum 10\npg_latency_count 3\n";
        let parsed = parse(text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "pg_latency");
        assert_eq!(parsed[0].samples.len(), 4);
    }
}
