//! Flattens metric families into a remote write request.
use super::{
    parser::parse_reader,
    remote_write::{
        Label,
        MetricMetadata,
        Sample,
        TimeSeries,
        WriteRequest,
    },
    MetricFamilies,
    ScrapeParseError,
};
use std::{
    io::Read,
    time::{
        SystemTime,
        UNIX_EPOCH,
    },
};
use tracing::{
    debug,
    warn,
};

const METRIC_NAME_LABEL: &str = "__name__";
const JOB_LABEL: &str = "job";

/// The `job` label used when none is configured.
pub const DEFAULT_JOB_LABEL: &str = "prom-push-cli";

/// How families are turned into a write request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    /// The value of the `job` label added to every time series.
    pub job_label: String,
    /// Append the type and help of every family to the request.
    ///
    /// Sending time series without metadata is the legacy behavior and is deprecated.
    pub include_metadata: bool,
}

impl FormatOptions {
    pub fn new(job_label: impl Into<String>) -> Self {
        Self {
            job_label: job_label.into(),
            include_metadata: true,
        }
    }

    /// The legacy request layout, with time series only.
    pub fn without_metadata(mut self) -> Self {
        self.include_metadata = false;
        self
    }
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self::new(DEFAULT_JOB_LABEL)
    }
}

/// Milliseconds since the epoch.
fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Turn every metric of every family into one time series.
///
/// The labels of a time series are `__name__` (the family name), then `job` (the configured
/// job label), then the labels of the metric without any `job` label it carried. Every
/// sample is stamped with the current time, timestamps of the input are ignored.
///
/// Histograms and summaries have no single value and are sent as `0.0`.
pub fn format_families(families: &MetricFamilies, options: &FormatOptions) -> WriteRequest {
    let timestamp = now_millis();
    let mut timeseries = Vec::with_capacity(families.values().map(|f| f.metrics.len()).sum());
    let mut metadata = Vec::new();

    for family in families.values() {
        let zero_filled = family
            .metrics
            .iter()
            .filter(|metric| !metric.value.is_scalar())
            .count();
        if zero_filled > 0 {
            warn!(
                family = %family.name,
                kind = %family.kind,
                metrics = zero_filled,
                "sending histogram or summary metrics as 0"
            );
        }

        for metric in &family.metrics {
            let mut labels = Vec::with_capacity(metric.labels.len() + 2);
            labels.push(Label::new(METRIC_NAME_LABEL, family.name.as_str()));
            labels.push(Label::new(JOB_LABEL, options.job_label.as_str()));
            labels.extend(
                metric
                    .labels
                    .iter()
                    .filter(|label| label.name != JOB_LABEL)
                    .map(|label| Label::new(label.name.as_str(), label.value.as_str())),
            );
            timeseries.push(TimeSeries {
                labels,
                samples: vec![Sample {
                    value: metric.value.scalar(),
                    timestamp,
                }],
            });
        }

        if options.include_metadata {
            metadata.push(MetricMetadata::for_family(
                &family.name,
                family.kind,
                family.help.as_deref(),
            ));
        }
    }

    debug!(
        timeseries = timeseries.len(),
        metadata = metadata.len(),
        "formatted write request"
    );
    WriteRequest {
        timeseries,
        metadata,
    }
}

/// Read exposition text from `reader` and format it with [`format_families`].
pub fn parse_and_format<R: Read>(
    reader: R,
    options: &FormatOptions,
) -> Result<WriteRequest, ScrapeParseError> {
    let families = parse_reader(reader)?;
    Ok(format_families(&families, options))
}
