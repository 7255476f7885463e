//! The messages of the Prometheus remote write protocol (version 1).
//!
//! Field numbers follow the `prompb` package of Prometheus, so a [`WriteRequest`] encoded
//! here is understood by any remote write receiver.
use super::Type;

/// A batch of time series, and optionally the metadata of their families.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteRequest {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
    #[prost(message, repeated, tag = "3")]
    pub metadata: Vec<MetricMetadata>,
}

/// A label set and its samples.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimeSeries {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Label {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Sample {
    #[prost(double, tag = "1")]
    pub value: f64,
    /// Milliseconds since epoch
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

/// The type, help and unit of a metric family.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetricMetadata {
    #[prost(enumeration = "MetricType", tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub metric_family_name: String,
    #[prost(string, tag = "4")]
    pub help: String,
    #[prost(string, tag = "5")]
    pub unit: String,
}

impl MetricMetadata {
    /// The metadata of a family. The unit is never known from the text format.
    pub fn for_family(name: &str, kind: Type, help: Option<&str>) -> Self {
        Self {
            r#type: MetricType::from(kind) as i32,
            metric_family_name: name.to_string(),
            help: help.unwrap_or_default().to_string(),
            unit: String::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MetricType {
    Unknown = 0,
    Counter = 1,
    Gauge = 2,
    Histogram = 3,
    GaugeHistogram = 4,
    Summary = 5,
    Info = 6,
    StateSet = 7,
}

impl From<Type> for MetricType {
    fn from(kind: Type) -> Self {
        match kind {
            Type::Counter => Self::Counter,
            Type::Gauge => Self::Gauge,
            Type::Untyped => Self::Unknown,
            Type::Summary => Self::Summary,
            Type::Histogram => Self::Histogram,
            Type::GaugeHistogram => Self::GaugeHistogram,
            Type::Info => Self::Info,
            Type::StateSet => Self::StateSet,
        }
    }
}
