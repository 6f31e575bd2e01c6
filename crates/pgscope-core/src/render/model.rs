/// Prometheus sample types, matching the exposition format's `TYPE` line
/// vocabulary (the subset the catalog can declare — no summary, no untyped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Gauge,
    Counter,
    Histogram,
}

impl MetricType {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Gauge => "gauge",
            MetricType::Counter => "counter",
            MetricType::Histogram => "histogram",
        }
    }
}

/// One rendered line's worth of data: a fully-qualified metric name (already
/// suffixed with `_bucket`/`_sum`/`_count` for histogram components), its
/// label set in emission order, and its value.
#[derive(Debug, Clone)]
pub struct Sample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

impl Sample {
    pub fn new(name: impl Into<String>, labels: Vec<(String, String)>, value: f64) -> Self {
        Sample { name: name.into(), labels, value }
    }
}

/// All samples sharing one base metric name, plus the `HELP`/`TYPE` metadata
/// emitted exactly once for the family regardless of how many servers
/// contributed samples to it.
#[derive(Debug, Clone)]
pub struct Family {
    pub name: String,
    pub help: String,
    pub metric_type: MetricType,
    pub samples: Vec<Sample>,
}

impl Family {
    pub fn new(name: impl Into<String>, help: impl Into<String>, metric_type: MetricType) -> Self {
        Family { name: name.into(), help: help.into(), metric_type, samples: Vec::new() }
    }
}
