//! In-process metric aggregation.
//!
//! Every measurement taken during a test is a [`Sample`]. Samples are pushed
//! into a [`Collector`], which folds them into per-metric [`Sink`]s (used for
//! thresholds and the end-of-test summary) and forwards them to the results
//! file writer when one is configured.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::percentiles::PercentileTracker;

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const DATA_RECEIVED: &str = "data_received";
pub const DATA_SENT: &str = "data_sent";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";
pub const CHECKS: &str = "checks";
pub const ERRORS: &str = "errors";

/// How a metric's samples are aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Rate,
    Trend,
}

/// What a metric's values measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Default,
    Time,
    Data,
}

/// Static description of a known metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDef {
    pub name: &'static str,
    pub kind: MetricType,
    pub contains: ValueType,
}

const fn def(name: &'static str, kind: MetricType, contains: ValueType) -> MetricDef {
    MetricDef {
        name,
        kind,
        contains,
    }
}

/// Every metric the load test can emit.
pub const BUILTIN_METRICS: &[MetricDef] = &[
    def(HTTP_REQS, MetricType::Counter, ValueType::Default),
    def(HTTP_REQ_DURATION, MetricType::Trend, ValueType::Time),
    def(HTTP_REQ_FAILED, MetricType::Rate, ValueType::Default),
    def(DATA_RECEIVED, MetricType::Counter, ValueType::Data),
    def(DATA_SENT, MetricType::Counter, ValueType::Data),
    def(ITERATIONS, MetricType::Counter, ValueType::Default),
    def(ITERATION_DURATION, MetricType::Trend, ValueType::Time),
    def(VUS, MetricType::Gauge, ValueType::Default),
    def(VUS_MAX, MetricType::Gauge, ValueType::Default),
    def(CHECKS, MetricType::Rate, ValueType::Default),
    def(ERRORS, MetricType::Rate, ValueType::Default),
];

/// Look up a metric definition by name.
pub fn metric_def(name: &str) -> Option<&'static MetricDef> {
    BUILTIN_METRICS.iter().find(|d| d.name == name)
}

pub type Tags = BTreeMap<String, String>;

/// A single measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: &'static MetricDef,
    pub value: f64,
    pub time: DateTime<Utc>,
    pub tags: Tags,
}

impl Sample {
    pub fn new(metric: &'static MetricDef, value: f64, tags: Tags) -> Self {
        Self {
            metric,
            value,
            time: Utc::now(),
            tags,
        }
    }

    /// Rate sample: 1 for true, 0 for false.
    pub fn rate(metric: &'static MetricDef, hit: bool, tags: Tags) -> Self {
        Self::new(metric, if hit { 1.0 } else { 0.0 }, tags)
    }
}

/// Running aggregate for one metric.
#[derive(Debug, Clone)]
pub enum Sink {
    Counter { count: u64, sum: f64 },
    Gauge { last: f64, min: f64, max: f64, count: u64 },
    Rate { trues: u64, total: u64 },
    Trend(PercentileTracker),
}

impl Sink {
    pub fn new(kind: MetricType) -> Self {
        match kind {
            MetricType::Counter => Sink::Counter { count: 0, sum: 0.0 },
            MetricType::Gauge => Sink::Gauge {
                last: 0.0,
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
                count: 0,
            },
            MetricType::Rate => Sink::Rate { trues: 0, total: 0 },
            MetricType::Trend => Sink::Trend(PercentileTracker::new()),
        }
    }

    pub fn add(&mut self, value: f64) {
        match self {
            Sink::Counter { count, sum } => {
                *count += 1;
                *sum += value;
            }
            Sink::Gauge {
                last,
                min,
                max,
                count,
            } => {
                *count += 1;
                *last = value;
                *min = min.min(value);
                *max = max.max(value);
            }
            Sink::Rate { trues, total } => {
                *total += 1;
                if value != 0.0 {
                    *trues += 1;
                }
            }
            Sink::Trend(tracker) => tracker.record_ms(value),
        }
    }

    /// Number of samples folded into this sink.
    pub fn sample_count(&self) -> u64 {
        match self {
            Sink::Counter { count, .. } => *count,
            Sink::Gauge { count, .. } => *count,
            Sink::Rate { total, .. } => *total,
            Sink::Trend(tracker) => tracker.count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }

    /// Fraction of true samples for a rate sink.
    pub fn rate(&self) -> Option<f64> {
        match self {
            Sink::Rate { trues, total } if *total > 0 => Some(*trues as f64 / *total as f64),
            Sink::Rate { .. } => Some(0.0),
            _ => None,
        }
    }
}

/// Pass/fail tally for one named check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckTally {
    pub passes: u64,
    pub fails: u64,
}

/// Point-in-time copy of every sink and check tally.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub sinks: BTreeMap<&'static str, Sink>,
    pub checks: BTreeMap<String, CheckTally>,
}

impl MetricsSnapshot {
    pub fn sink(&self, name: &str) -> Option<&Sink> {
        self.sinks.get(name)
    }
}

/// Entry point for all samples produced during a test.
///
/// Shared between VU tasks behind an `Arc`.
pub struct Collector {
    aggregates: Mutex<MetricsSnapshot>,
    output: Mutex<Option<UnboundedSender<Sample>>>,
}

impl Collector {
    pub fn new(output: Option<UnboundedSender<Sample>>) -> Self {
        Self {
            aggregates: Mutex::new(MetricsSnapshot::default()),
            output: Mutex::new(output),
        }
    }

    pub fn push(&self, sample: Sample) {
        {
            let mut aggregates = self.aggregates.lock().unwrap();
            aggregates
                .sinks
                .entry(sample.metric.name)
                .or_insert_with(|| Sink::new(sample.metric.kind))
                .add(sample.value);

            if sample.metric.name == CHECKS {
                if let Some(check) = sample.tags.get("check") {
                    let tally = aggregates.checks.entry(check.clone()).or_default();
                    if sample.value != 0.0 {
                        tally.passes += 1;
                    } else {
                        tally.fails += 1;
                    }
                }
            }
        }

        let mut output = self.output.lock().unwrap();
        if let Some(tx) = output.as_ref() {
            if tx.send(sample).is_err() {
                warn!("Results writer stopped, no further samples will be written");
                output.take();
            }
        }
    }

    /// True while samples are still forwarded to a results writer.
    pub fn has_output(&self) -> bool {
        self.output.lock().unwrap().is_some()
    }

    pub fn push_all(&self, samples: impl IntoIterator<Item = Sample>) {
        for sample in samples {
            self.push(sample);
        }
    }

    /// Drop the results-file sender so the writer task can drain and exit.
    pub fn close_output(&self) {
        self.output.lock().unwrap().take();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.aggregates.lock().unwrap().clone()
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new(None)
    }
}
