//! Assembles parsed metric blocks into metric families.
//!
//! A family may be written as several blocks that are not next to each other, and a
//! histogram or summary metric spans several sample lines. Both are merged here.
use super::{
    parser::{
        names_are_equal,
        LinesStatus,
        MetricBlock,
        MetricError,
        RawSample,
    },
    Bucket,
    Histogram,
    Metric,
    MetricFamilies,
    MetricFamily,
    MetricValue,
    Quantile,
    Summary,
    Type,
    ValueType,
};
use std::collections::HashMap;
use tracing::debug;

/// Metrics of one family indexed by their label set.
#[derive(Debug, Default)]
struct Instances {
    index: HashMap<Vec<(String, String)>, usize>,
    metrics: Vec<Metric>,
}

impl Instances {
    /// The metric with the same labels as `sample`, created with `init` if it does not exist yet.
    fn get_or_insert(
        &mut self,
        sample: &RawSample,
        init: impl FnOnce() -> MetricValue,
    ) -> &mut Metric {
        let signature = sample.labels.signature();
        let idx = match self.index.get(&signature) {
            Some(idx) => *idx,
            None => {
                let idx = self.metrics.len();
                self.metrics.push(Metric::new(
                    sample.labels.clone(),
                    init(),
                    sample.value.timestamp,
                ));
                self.index.insert(signature, idx);
                idx
            }
        };
        &mut self.metrics[idx]
    }
}

/// Collects the blocks of one family.
#[derive(Debug)]
struct FamilyBuilder {
    name: String,
    help: Option<String>,
    kind: Option<Type>,
    samples: Vec<RawSample>,
}

impl FamilyBuilder {
    fn new(name: String) -> Self {
        Self {
            name,
            help: None,
            kind: None,
            samples: Vec::new(),
        }
    }

    /// Add a block with the same name. The type and help must agree with the earlier blocks.
    fn merge(&mut self, block: MetricBlock) -> Result<(), MetricError> {
        let line_no = block.line_no;
        if let Some(kind) = block.kind {
            match self.kind {
                Some(prev) if prev != kind => {
                    return Err(MetricError::at_line(
                        line_no,
                        format!(
                            "Metric {} declared as {kind} after being declared as {prev}",
                            self.name
                        ),
                    ));
                }
                None if !self.samples.is_empty() => {
                    return Err(MetricError::at_line(
                        line_no,
                        format!("Metric {} TYPE appeared after its samples", self.name),
                    ));
                }
                _ => self.kind = Some(kind),
            }
        }
        if let Some(help) = block.help_desc {
            match &self.help {
                Some(prev) if *prev != help => {
                    return Err(MetricError::at_line(
                        line_no,
                        format!("Metric {} has conflicting HELP texts", self.name),
                    ));
                }
                _ => self.help = Some(help),
            }
        }
        self.samples.extend(block.samples);
        Ok(())
    }

    fn build(self) -> Result<MetricFamily, MetricError> {
        for sample in &self.samples {
            if let Some(name) = sample.labels.duplicate_name() {
                return Err(MetricError::at_line(
                    sample.line_no,
                    format!("Metric {} has duplicate label {name}", self.name),
                ));
            }
        }
        let kind = self.kind.unwrap_or_default();
        let metrics = match kind {
            Type::Counter => scalars(self.samples, MetricValue::Counter),
            Type::Gauge => scalars(self.samples, MetricValue::Gauge),
            Type::Untyped | Type::Info | Type::StateSet => {
                scalars(self.samples, MetricValue::Untyped)
            }
            Type::Histogram | Type::GaugeHistogram => histograms(&self.name, self.samples)?,
            Type::Summary => summaries(&self.name, self.samples)?,
        };
        Ok(MetricFamily {
            name: self.name,
            help: self.help,
            kind,
            metrics,
        })
    }
}

fn scalars(samples: Vec<RawSample>, wrap: fn(f64) -> MetricValue) -> Vec<Metric> {
    samples
        .into_iter()
        .map(|sample| Metric::new(sample.labels, wrap(sample.value.value), sample.value.timestamp))
        .collect()
}

/// Parse the value of the `le` or `quantile` label.
fn bound(
    family: &str,
    sample: &RawSample,
    label: &str,
    value: Option<String>,
) -> Result<f64, MetricError> {
    let Some(value) = value else {
        return Err(MetricError::at_line(
            sample.line_no,
            format!("Metric {family} sample is missing the {label} label"),
        ));
    };
    value.parse().map_err(|_| {
        MetricError::at_line(
            sample.line_no,
            format!("Metric {family} has an invalid {label} label \"{value}\""),
        )
    })
}

fn histograms(family: &str, samples: Vec<RawSample>) -> Result<Vec<Metric>, MetricError> {
    let mut instances = Instances::default();
    for sample in samples {
        match sample.value.value_type {
            ValueType::Sample => {
                let (labels, le) = sample.labels.clone().split_off("le");
                let upper_bound = bound(family, &sample, "le", le)?;
                let sample = RawSample { labels, ..sample };
                let metric = instances.get_or_insert(&sample, || {
                    MetricValue::Histogram(Histogram::default())
                });
                if let MetricValue::Histogram(histogram) = &mut metric.value {
                    histogram
                        .buckets
                        .push(Bucket::new(upper_bound, sample.value.value));
                }
            }
            ValueType::Sum | ValueType::Count => {
                let metric = instances.get_or_insert(&sample, || {
                    MetricValue::Histogram(Histogram::default())
                });
                if let MetricValue::Histogram(histogram) = &mut metric.value {
                    match sample.value.value_type {
                        ValueType::Sum => histogram.sample_sum = Some(sample.value.value),
                        _ => histogram.sample_count = Some(sample.value.value),
                    }
                }
            }
        }
    }
    Ok(instances.metrics)
}

fn summaries(family: &str, samples: Vec<RawSample>) -> Result<Vec<Metric>, MetricError> {
    let mut instances = Instances::default();
    for sample in samples {
        match sample.value.value_type {
            ValueType::Sample => {
                let (labels, quantile) = sample.labels.clone().split_off("quantile");
                let quantile = bound(family, &sample, "quantile", quantile)?;
                let sample = RawSample { labels, ..sample };
                let metric = instances
                    .get_or_insert(&sample, || MetricValue::Summary(Summary::default()));
                if let MetricValue::Summary(summary) = &mut metric.value {
                    summary
                        .quantiles
                        .push(Quantile::new(quantile, sample.value.value));
                }
            }
            ValueType::Sum | ValueType::Count => {
                let metric = instances
                    .get_or_insert(&sample, || MetricValue::Summary(Summary::default()));
                if let MetricValue::Summary(summary) = &mut metric.value {
                    match sample.value.value_type {
                        ValueType::Sum => summary.sample_sum = Some(sample.value.value),
                        _ => summary.sample_count = Some(sample.value.value),
                    }
                }
            }
        }
    }
    Ok(instances.metrics)
}

/// Suffixes of the sample names of histograms, summaries and info metrics.
const SUFFIXES: [&str; 6] = ["_bucket", "_sum", "_count", "_gsum", "_gcount", "_info"];

/// The typed family a block of suffixed samples belongs to, when one was seen before.
///
/// `latency_sum` written apart from the other samples of the histogram `latency` belongs to
/// `latency`. Blocks with their own TYPE line are families of their own.
fn parent_family(
    block: &MetricBlock,
    builders: &[FamilyBuilder],
    by_name: &HashMap<String, usize>,
) -> Option<(usize, LinesStatus)> {
    if block.kind.is_some() {
        return None;
    }
    SUFFIXES.iter().find_map(|suffix| {
        let base = block.name.strip_suffix(suffix)?;
        let idx = *by_name.get(base)?;
        match names_are_equal(base, &block.name, builders[idx].kind) {
            LinesStatus::NotEqual => None,
            status => Some((idx, status)),
        }
    })
}

/// Merge the blocks into families keyed by name.
///
/// Families without any sample are dropped. All the errors are collected, sorted by line.
pub(crate) fn collect_families(
    blocks: Vec<MetricBlock>,
) -> Result<MetricFamilies, Vec<MetricError>> {
    let mut builders: Vec<FamilyBuilder> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();
    let mut errors = Vec::new();

    for mut block in blocks {
        let idx = match parent_family(&block, &builders, &by_name) {
            Some((idx, status)) => {
                let value_type = match status {
                    LinesStatus::NewIsSum => Some(ValueType::Sum),
                    LinesStatus::NewIsCount => Some(ValueType::Count),
                    LinesStatus::Equal | LinesStatus::NotEqual => None,
                };
                if let Some(value_type) = value_type {
                    for sample in &mut block.samples {
                        sample.value.value_type = value_type;
                    }
                }
                block.name = builders[idx].name.clone();
                idx
            }
            None => *by_name.entry(block.name.clone()).or_insert_with(|| {
                builders.push(FamilyBuilder::new(block.name.clone()));
                builders.len() - 1
            }),
        };
        if let Err(e) = builders[idx].merge(block) {
            errors.push(e);
        }
    }

    let mut families = MetricFamilies::with_capacity(builders.len());
    for builder in builders {
        if builder.samples.is_empty() {
            debug!(family = %builder.name, "dropping family without samples");
            continue;
        }
        match builder.build() {
            Ok(family) => {
                families.insert(family.name.clone(), family);
            }
            Err(e) => errors.push(e),
        }
    }

    if errors.is_empty() {
        Ok(families)
    } else {
        errors.sort_by_key(|e| e.line_no.start);
        Err(errors)
    }
}
