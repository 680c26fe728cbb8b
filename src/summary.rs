//! End-of-test text summary.

use std::fmt::Write;
use tokio::time::Duration;

use crate::percentiles::PercentileTracker;
use crate::sinks::{metric_def, MetricsSnapshot, Sink, ValueType};
use crate::thresholds::ThresholdResult;
use crate::utils::format_duration;

const PASS: &str = "✓";
const FAIL: &str = "✗";

/// Width the metric names are padded to with dots.
const NAME_WIDTH: usize = 32;

/// Formats milliseconds the way durations are shown in the summary.
pub fn format_time_ms(ms: f64) -> String {
    if ms >= 1000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else if ms >= 1.0 {
        format!("{:.2}ms", ms)
    } else {
        format!("{:.2}µs", ms * 1000.0)
    }
}

/// Formats a byte count with decimal units.
pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 4] = ["B", "kB", "MB", "GB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{:.0} {}", value, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn format_value(value: f64, contains: ValueType) -> String {
    match contains {
        ValueType::Time => format_time_ms(value),
        ValueType::Data => format_bytes(value),
        ValueType::Default => {
            if value.fract() == 0.0 {
                format!("{:.0}", value)
            } else {
                format!("{:.2}", value)
            }
        }
    }
}

fn trend_line(tracker: &PercentileTracker, contains: ValueType) -> String {
    match tracker.stats() {
        Some(stats) => format!(
            "avg={} min={} med={} max={} p(90)={} p(95)={}",
            format_value(stats.mean, contains),
            format_value(stats.min, contains),
            format_value(stats.p50, contains),
            format_value(stats.max, contains),
            format_value(stats.p90, contains),
            format_value(stats.p95, contains),
        ),
        None => "no samples".to_string(),
    }
}

fn sink_line(sink: &Sink, contains: ValueType, duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    match sink {
        Sink::Counter { sum, .. } => {
            let per_sec = if secs > 0.0 { sum / secs } else { 0.0 };
            match contains {
                ValueType::Data => format!("{} {}/s", format_bytes(*sum), format_bytes(per_sec)),
                _ => format!("{} {:.2}/s", format_value(*sum, contains), per_sec),
            }
        }
        Sink::Gauge { last, min, max, .. } => format!(
            "{} min={} max={}",
            format_value(*last, contains),
            format_value(*min, contains),
            format_value(*max, contains)
        ),
        Sink::Rate { trues, total } => {
            let pct = if *total > 0 {
                *trues as f64 / *total as f64 * 100.0
            } else {
                0.0
            };
            format!("{:.2}% {} {} {} {}", pct, PASS, trues, FAIL, total - trues)
        }
        Sink::Trend(tracker) => trend_line(tracker, contains),
    }
}

fn dotted(name: &str) -> String {
    let dots = NAME_WIDTH.saturating_sub(name.len()).max(3);
    format!("{}{}", name, ".".repeat(dots))
}

/// Renders the summary printed when a test finishes: check pass rates,
/// threshold verdicts and one line per metric.
pub fn render_summary(
    snapshot: &MetricsSnapshot,
    thresholds: &[ThresholdResult],
    duration: Duration,
) -> String {
    let mut out = String::new();

    let _ = writeln!(out);
    let _ = writeln!(out, "  test duration: {}", format_duration(duration));

    if !snapshot.checks.is_empty() {
        let _ = writeln!(out);
        for (name, tally) in &snapshot.checks {
            let total = tally.passes + tally.fails;
            if tally.fails == 0 {
                let _ = writeln!(out, "     {} {}", PASS, name);
            } else {
                let pct = tally.passes as f64 / total as f64 * 100.0;
                let _ = writeln!(out, "     {} {}", FAIL, name);
                let _ = writeln!(
                    out,
                    "      ↳  {:.0}% : {} {} / {} {}",
                    pct, PASS, tally.passes, FAIL, tally.fails
                );
            }
        }
    }

    if !thresholds.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  thresholds:");
        for result in thresholds {
            let mark = if result.passed { PASS } else { FAIL };
            let observed = match result.observed {
                Some(v) => format!("{:.4}", v),
                None => "no data".to_string(),
            };
            let _ = writeln!(
                out,
                "     {} {}: {} (observed {})",
                mark, result.metric, result.source, observed
            );
        }
    }

    let _ = writeln!(out);
    for (name, sink) in &snapshot.sinks {
        let contains = metric_def(name)
            .map(|d| d.contains)
            .unwrap_or(ValueType::Default);

        let mut verdicts = thresholds.iter().filter(|r| r.metric == *name).peekable();
        let mark = if verdicts.peek().is_none() {
            " "
        } else if verdicts.all(|r| r.passed) {
            PASS
        } else {
            FAIL
        };

        let _ = writeln!(
            out,
            "   {} {}: {}",
            mark,
            dotted(name),
            sink_line(sink, contains, duration)
        );
    }

    out
}
