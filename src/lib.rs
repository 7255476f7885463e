#![forbid(unsafe_code)]
//! Push Prometheus exposition text to a remote write endpoint.
//!
//! The Prometheus exposition format is taken from here:
//! <https://prometheus.io/docs/instrumenting/exposition_formats/>
//!
//! The remote write protocol is described here:
//! <https://prometheus.io/docs/concepts/remote_write_spec/>
//!
//! The work happens in two stages:
//! * [`parse_reader`] turns exposition text into [`MetricFamilies`], which
//!   [`format_families`] flattens into a [`remote_write::WriteRequest`].
//! * [`Client`] compresses the write request and pushes it, retrying on a fixed
//!   [`BackoffSchedule`].
use derive_more::Constructor;
pub use client::{
    parse_headers,
    BackoffSchedule,
    Client,
    ClientConfig,
    CustomHeader,
    TlsOptions,
    DEFAULT_TIMEOUT,
};
pub use error::{
    ConfigError,
    PushError,
};
pub use format::{
    format_families,
    parse_and_format,
    FormatOptions,
    DEFAULT_JOB_LABEL,
};
pub use parser::{
    parse_families,
    parse_reader,
    MetricError,
    ScrapeParseError,
};
use std::{
    collections::HashMap,
    fmt::Display,
};

mod client;
mod error;
mod family;
mod format;
mod parser;
pub mod remote_write;

/// The possible types of Prometheus metric families.
///
/// `unknown` is accepted as an alias of `untyped`. The last three types come from OpenMetrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::EnumString, strum::Display)]
#[strum(ascii_case_insensitive)]
#[strum(serialize_all = "snake_case")]
pub enum Type {
    Counter,
    Gauge,
    #[default]
    #[strum(to_string = "untyped", serialize = "unknown")]
    Untyped,
    Summary,
    Histogram,
    #[strum(serialize = "gaugehistogram")]
    GaugeHistogram,
    Info,
    #[strum(serialize = "stateset")]
    StateSet,
}

/// A single label of a metric.
///
/// Example:
/// ```text
/// name="a"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Constructor)]
pub struct Label {
    /// Label name
    pub name: String,
    /// Label value, unescaped
    pub value: String,
}

/// A set of labels identifying a metric within its family.
///
/// Example:
/// ```text
/// {name="a",id="1",type="x"}
/// ```
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Default,
    derive_more::Deref,
    derive_more::DerefMut,
    derive_more::From,
)]
#[repr(transparent)]
pub struct Labels(Vec<Label>);

impl Labels {
    /// The value of the label called `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|label| label.name == name)
            .map(|label| label.value.as_str())
    }

    /// The first label name that appears more than once.
    pub fn duplicate_name(&self) -> Option<&str> {
        self.0
            .iter()
            .enumerate()
            .find(|(idx, label)| self.0[..*idx].iter().any(|prev| prev.name == label.name))
            .map(|(_, label)| label.name.as_str())
    }

    /// Remove the label called `name`, returning the remaining labels and the removed value.
    pub(crate) fn split_off(mut self, name: &str) -> (Self, Option<String>) {
        let value = self
            .0
            .iter()
            .position(|label| label.name == name)
            .map(|idx| self.0.remove(idx).value);
        (self, value)
    }

    /// The labels sorted by name, so that two sets with the same labels compare equal
    /// regardless of the order they were written in.
    pub(crate) fn signature(&self) -> Vec<(String, String)> {
        let mut pairs = self
            .0
            .iter()
            .map(|label| (label.name.clone(), label.value.clone()))
            .collect::<Vec<_>>();
        pairs.sort();
        pairs
    }
}

impl Display for Labels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        let last_idx = self.0.len() - 1;
        f.write_str("{")?;
        for (idx, label) in self.0.iter().enumerate() {
            f.write_str(&label.name)?;
            f.write_str("=")?;
            write!(f, "{:?}", label.value)?;
            if idx != last_idx {
                f.write_str(",")?;
            }
        }
        f.write_str("}")?;
        Ok(())
    }
}

/// The possible roles of a sample line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueType {
    Sample,
    // The following two are only relevant for Summary, Histogram
    Sum,
    Count,
}

/// The value of a single sample line.
#[derive(Debug, Clone, PartialEq, Constructor)]
pub(crate) struct Value {
    /// Whether this is a regular sample value, or a Sum or a Count value.
    pub value_type: ValueType,
    /// Float as represented by Go's ParseFloat(), including NaN, +Inf and -Inf.
    pub value: f64,
    /// The timestamp is an int64 (milliseconds since epoch, i.e. 1970-01-01 00:00:00 UTC,
    /// excluding leap seconds).
    pub timestamp: Option<i64>,
}

/// A cumulative histogram bucket.
#[derive(Debug, Clone, Copy, PartialEq, Constructor)]
pub struct Bucket {
    /// The `le` label of the bucket.
    pub upper_bound: f64,
    pub cumulative_count: f64,
}

/// The buckets, sum and count of one histogram.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Histogram {
    pub buckets: Vec<Bucket>,
    pub sample_sum: Option<f64>,
    pub sample_count: Option<f64>,
}

/// A summary quantile.
#[derive(Debug, Clone, Copy, PartialEq, Constructor)]
pub struct Quantile {
    /// The `quantile` label of the sample.
    pub quantile: f64,
    pub value: f64,
}

/// The quantiles, sum and count of one summary.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Summary {
    pub quantiles: Vec<Quantile>,
    pub sample_sum: Option<f64>,
    pub sample_count: Option<f64>,
}

/// The typed value carried by a metric.
///
/// Info and state set samples are plain numbers and are carried as `Untyped`.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter(f64),
    Gauge(f64),
    Untyped(f64),
    Histogram(Histogram),
    Summary(Summary),
}

impl MetricValue {
    /// Whether the value is a single number.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Counter(_) | Self::Gauge(_) | Self::Untyped(_))
    }

    /// The number sent for this value.
    ///
    /// Histograms and summaries have no single value and yield `0.0`.
    pub fn scalar(&self) -> f64 {
        match self {
            Self::Counter(value) | Self::Gauge(value) | Self::Untyped(value) => *value,
            Self::Histogram(_) | Self::Summary(_) => 0.0,
        }
    }
}

/// One metric of a family: a label set and its value.
///
/// A histogram or a summary is a single metric, even though it spans several sample lines.
#[derive(Debug, Clone, PartialEq, Constructor)]
pub struct Metric {
    pub labels: Labels,
    pub value: MetricValue,
    /// The timestamp written in the exposition text, if any.
    pub timestamp: Option<i64>,
}

/// A metric family.
///
/// An example:
/// ```text
/// # HELP http_requests_total The total number of HTTP requests.
/// # TYPE http_requests_total counter
/// http_requests_total{method="post",code="200"} 1027 1395066363000
/// http_requests_total{method="post",code="400"}    3 1395066363000
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    /// The name of the family, excluding any `_bucket`, `_sum` or `_count` suffix.
    pub name: String,
    /// The text of the `# HELP` line
    pub help: Option<String>,
    /// The type given by the `# TYPE` line, `Untyped` when there is none.
    pub kind: Type,
    pub metrics: Vec<Metric>,
}

/// Parsed families keyed by family name. Iteration order is unspecified.
pub type MetricFamilies = HashMap<String, MetricFamily>;
