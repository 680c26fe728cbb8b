//! Pass/fail thresholds evaluated against aggregated metrics.
//!
//! A threshold expression has the form `<aggregation> <op> <number>`, for
//! example `p(95)<500`, `rate<0.05` or `count>=100`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::sinks::{metric_def, MetricType, MetricsSnapshot, Sink};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThresholdError {
    #[error("Invalid threshold expression '{expr}': {message}")]
    Parse { expr: String, message: String },

    #[error("Threshold defined for unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("Aggregation '{aggregation}' is not valid for {kind:?} metric '{metric}'")]
    InvalidAggregation {
        metric: String,
        aggregation: String,
        kind: MetricType,
    },
}

/// The statistic a threshold compares.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
    Rate,
    Count,
    Value,
}

impl Aggregation {
    fn is_valid_for(&self, kind: MetricType) -> bool {
        match kind {
            MetricType::Trend => matches!(
                self,
                Aggregation::Avg
                    | Aggregation::Min
                    | Aggregation::Max
                    | Aggregation::Med
                    | Aggregation::Percentile(_)
            ),
            MetricType::Rate => matches!(self, Aggregation::Rate),
            MetricType::Counter => matches!(self, Aggregation::Count | Aggregation::Rate),
            MetricType::Gauge => {
                matches!(self, Aggregation::Value | Aggregation::Min | Aggregation::Max)
            }
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Avg => write!(f, "avg"),
            Aggregation::Min => write!(f, "min"),
            Aggregation::Max => write!(f, "max"),
            Aggregation::Med => write!(f, "med"),
            Aggregation::Percentile(p) => write!(f, "p({})", p),
            Aggregation::Rate => write!(f, "rate"),
            Aggregation::Count => write!(f, "count"),
            Aggregation::Value => write!(f, "value"),
        }
    }
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avg" => Ok(Aggregation::Avg),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            "med" => Ok(Aggregation::Med),
            "rate" => Ok(Aggregation::Rate),
            "count" => Ok(Aggregation::Count),
            "value" => Ok(Aggregation::Value),
            _ => {
                let inner = s
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| format!("unknown aggregation '{}'", s))?;
                let pct: f64 = inner
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid percentile '{}'", inner))?;
                if !(0.0..=100.0).contains(&pct) {
                    return Err(format!("percentile {} is outside 0-100", pct));
                }
                Ok(Aggregation::Percentile(pct))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    pub fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparison::Lt => lhs < rhs,
            Comparison::Le => lhs <= rhs,
            Comparison::Gt => lhs > rhs,
            Comparison::Ge => lhs >= rhs,
            Comparison::Eq => lhs == rhs,
            Comparison::Ne => lhs != rhs,
        }
    }
}

/// A single parsed threshold expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub source: String,
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub limit: f64,
}

impl FromStr for Threshold {
    type Err = ThresholdError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let parse_err = |message: String| ThresholdError::Parse {
            expr: expr.to_string(),
            message,
        };

        let op_start = expr
            .find(&['<', '>', '=', '!'][..])
            .ok_or_else(|| parse_err("missing comparison operator".to_string()))?;
        let (lhs, rest) = expr.split_at(op_start);

        let (comparison, op_len) = match (rest.as_bytes()[0], rest.as_bytes().get(1)) {
            (b'<', Some(b'=')) => (Comparison::Le, 2),
            (b'<', _) => (Comparison::Lt, 1),
            (b'>', Some(b'=')) => (Comparison::Ge, 2),
            (b'>', _) => (Comparison::Gt, 1),
            (b'=', Some(b'=')) => (Comparison::Eq, 2),
            (b'!', Some(b'=')) => (Comparison::Ne, 2),
            _ => return Err(parse_err("unknown comparison operator".to_string())),
        };

        let aggregation: Aggregation = lhs.trim().parse().map_err(parse_err)?;
        let limit_str = rest[op_len..].trim();
        let limit: f64 = limit_str
            .parse()
            .map_err(|_| parse_err(format!("invalid number '{}'", limit_str)))?;

        Ok(Threshold {
            source: expr.trim().to_string(),
            aggregation,
            comparison,
            limit,
        })
    }
}

impl Threshold {
    /// Compute the observed value for this threshold from a sink.
    ///
    /// Returns None when the metric has no samples (except `count`, which
    /// is 0 in that case).
    pub fn observe(&self, sink: Option<&Sink>, test_duration: Duration) -> Option<f64> {
        let sink = match sink {
            Some(s) if !s.is_empty() => s,
            _ => {
                return matches!(self.aggregation, Aggregation::Count).then_some(0.0);
            }
        };

        match (sink, self.aggregation) {
            (Sink::Trend(t), Aggregation::Avg) => t.mean(),
            (Sink::Trend(t), Aggregation::Min) => t.min(),
            (Sink::Trend(t), Aggregation::Max) => t.max(),
            (Sink::Trend(t), Aggregation::Med) => t.percentile(50.0),
            (Sink::Trend(t), Aggregation::Percentile(p)) => t.percentile(p),
            (Sink::Rate { .. }, Aggregation::Rate) => sink.rate(),
            (Sink::Counter { sum, .. }, Aggregation::Count) => Some(*sum),
            (Sink::Counter { sum, .. }, Aggregation::Rate) => {
                let secs = test_duration.as_secs_f64();
                Some(if secs > 0.0 { sum / secs } else { 0.0 })
            }
            (Sink::Gauge { last, .. }, Aggregation::Value) => Some(*last),
            (Sink::Gauge { min, .. }, Aggregation::Min) => Some(*min),
            (Sink::Gauge { max, .. }, Aggregation::Max) => Some(*max),
            _ => None,
        }
    }
}

/// Outcome of one threshold expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    pub metric: String,
    pub source: String,
    pub observed: Option<f64>,
    pub passed: bool,
}

/// All thresholds of a test, keyed by metric name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdSet {
    entries: BTreeMap<String, Vec<Threshold>>,
}

impl ThresholdSet {
    /// Parse raw `metric -> [expression]` pairs, validating metric names and
    /// aggregations.
    pub fn parse(raw: &BTreeMap<String, Vec<String>>) -> Result<Self, ThresholdError> {
        let mut entries = BTreeMap::new();

        for (metric, exprs) in raw {
            let def =
                metric_def(metric).ok_or_else(|| ThresholdError::UnknownMetric(metric.clone()))?;

            let mut parsed = Vec::with_capacity(exprs.len());
            for expr in exprs {
                let threshold: Threshold = expr.parse()?;
                if !threshold.aggregation.is_valid_for(def.kind) {
                    return Err(ThresholdError::InvalidAggregation {
                        metric: metric.clone(),
                        aggregation: threshold.aggregation.to_string(),
                        kind: def.kind,
                    });
                }
                parsed.push(threshold);
            }
            entries.insert(metric.clone(), parsed);
        }

        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Original expression strings for a metric, as written in the config.
    pub fn sources_for(&self, metric: &str) -> Vec<String> {
        self.entries
            .get(metric)
            .map(|ts| ts.iter().map(|t| t.source.clone()).collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<Threshold>)> {
        self.entries.iter()
    }

    /// Evaluate every threshold. A metric without samples passes.
    pub fn evaluate(
        &self,
        snapshot: &MetricsSnapshot,
        test_duration: Duration,
    ) -> Vec<ThresholdResult> {
        let mut results = Vec::new();

        for (metric, thresholds) in &self.entries {
            let sink = snapshot.sink(metric);
            for threshold in thresholds {
                let observed = threshold.observe(sink, test_duration);
                let passed = observed
                    .map(|v| threshold.comparison.apply(v, threshold.limit))
                    .unwrap_or(true);
                results.push(ThresholdResult {
                    metric: metric.clone(),
                    source: threshold.source.clone(),
                    observed,
                    passed,
                });
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::{Collector, Sample, Tags, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED};

    fn raw(pairs: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(m, exprs)| (m.to_string(), exprs.iter().map(|e| e.to_string()).collect()))
            .collect()
    }

    #[test]
    fn parses_common_forms() {
        let t: Threshold = "p(95)<500".parse().unwrap();
        assert_eq!(t.aggregation, Aggregation::Percentile(95.0));
        assert_eq!(t.comparison, Comparison::Lt);
        assert_eq!(t.limit, 500.0);

        let t: Threshold = " rate <= 0.05 ".parse().unwrap();
        assert_eq!(t.aggregation, Aggregation::Rate);
        assert_eq!(t.comparison, Comparison::Le);
        assert_eq!(t.source, "rate <= 0.05");

        let t: Threshold = "p(99.9)>=1".parse().unwrap();
        assert_eq!(t.aggregation, Aggregation::Percentile(99.9));
        assert_eq!(t.comparison, Comparison::Ge);

        assert_eq!(
            "count==10".parse::<Threshold>().unwrap().comparison,
            Comparison::Eq
        );
        assert_eq!(
            "value!=0".parse::<Threshold>().unwrap().comparison,
            Comparison::Ne
        );
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in ["p95<500", "avg", "avg<", "avg<abc", "p(101)<5", "avg=5", "foo>1"] {
            assert!(
                bad.parse::<Threshold>().is_err(),
                "expected '{}' to be rejected",
                bad
            );
        }
    }

    #[test]
    fn set_rejects_unknown_metric_and_wrong_aggregation() {
        let err = ThresholdSet::parse(&raw(&[("nope", &["avg<1"])])).unwrap_err();
        assert_eq!(err, ThresholdError::UnknownMetric("nope".to_string()));

        let err = ThresholdSet::parse(&raw(&[(HTTP_REQ_FAILED, &["p(95)<1"])])).unwrap_err();
        assert!(matches!(err, ThresholdError::InvalidAggregation { .. }));
    }

    #[test]
    fn evaluates_against_snapshot() {
        let collector = Collector::default();
        let duration_def = metric_def(HTTP_REQ_DURATION).unwrap();
        let failed_def = metric_def(HTTP_REQ_FAILED).unwrap();

        for ms in 1..=100 {
            collector.push(Sample::new(duration_def, ms as f64, Tags::new()));
        }
        for i in 0..100 {
            collector.push(Sample::rate(failed_def, i < 10, Tags::new()));
        }

        let set = ThresholdSet::parse(&raw(&[
            (HTTP_REQ_DURATION, &["p(95)<500", "avg<20"]),
            (HTTP_REQ_FAILED, &["rate<0.05"]),
        ]))
        .unwrap();

        let results = set.evaluate(&collector.snapshot(), Duration::from_secs(10));
        assert_eq!(results.len(), 3);

        let by_source = |s: &str| results.iter().find(|r| r.source == s).unwrap();
        assert!(by_source("p(95)<500").passed);
        assert!(!by_source("avg<20").passed);
        assert!(!by_source("rate<0.05").passed);
        assert_eq!(by_source("rate<0.05").observed, Some(0.1));
    }

    #[test]
    fn metrics_without_samples_pass_except_count() {
        let set = ThresholdSet::parse(&raw(&[
            (HTTP_REQ_DURATION, &["p(95)<1"]),
            (HTTP_REQS, &["count>0"]),
        ]))
        .unwrap();

        let results = set.evaluate(&MetricsSnapshot::default(), Duration::from_secs(1));
        let duration = results.iter().find(|r| r.metric == HTTP_REQ_DURATION).unwrap();
        assert!(duration.passed);
        assert_eq!(duration.observed, None);

        let count = results.iter().find(|r| r.metric == HTTP_REQS).unwrap();
        assert!(!count.passed);
        assert_eq!(count.observed, Some(0.0));
    }

    #[test]
    fn counter_rate_is_per_second() {
        let collector = Collector::default();
        let reqs = metric_def(HTTP_REQS).unwrap();
        for _ in 0..20 {
            collector.push(Sample::new(reqs, 1.0, Tags::new()));
        }
        let t: Threshold = "rate>=2".parse().unwrap();
        let observed = t.observe(collector.snapshot().sink(HTTP_REQS), Duration::from_secs(10));
        assert_eq!(observed, Some(2.0));
    }

    #[test]
    fn sources_preserved_for_output() {
        let set = ThresholdSet::parse(&raw(&[(HTTP_REQ_DURATION, &["p(95)<500"])])).unwrap();
        assert_eq!(set.sources_for(HTTP_REQ_DURATION), vec!["p(95)<500"]);
        assert!(set.sources_for(HTTP_REQS).is_empty());
    }
}
