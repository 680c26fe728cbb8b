//! HTML report generation from a results file.
//!
//! Reads the newline-delimited JSON written during a test (or by any tool
//! using the same `Metric`/`Point` line format) and renders a standalone
//! HTML page with request totals, success rate and per-metric counts.

use chrono::{DateTime, Local};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::percentiles::PercentileTracker;
use crate::sinks::{metric_def, MetricType, HTTP_REQ_DURATION, HTTP_REQ_FAILED};
use crate::summary::format_time_ms;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("File '{}' not found!", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to access '{}': {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Only the fields the report needs; everything else on a line is ignored.
#[derive(Debug, Deserialize)]
struct RawLine {
    #[serde(rename = "type")]
    kind: String,
    metric: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Everything known about one metric in the results file.
#[derive(Debug, Clone)]
pub struct MetricEntry {
    pub name: String,
    pub kind: Option<MetricType>,
    /// Number of `Metric` declaration lines.
    pub declarations: u64,
    /// Number of `Point` lines.
    pub samples: u64,
    trend: Option<PercentileTracker>,
}

impl MetricEntry {
    fn new(name: &str) -> Self {
        let mut entry = Self {
            name: name.to_string(),
            kind: None,
            declarations: 0,
            samples: 0,
            trend: None,
        };
        if let Some(def) = metric_def(name) {
            entry.set_kind(def.kind);
        }
        entry
    }

    fn set_kind(&mut self, kind: MetricType) {
        self.kind = Some(kind);
        if kind == MetricType::Trend && self.trend.is_none() {
            self.trend = Some(PercentileTracker::new());
        }
    }

    pub fn trend(&self) -> Option<&PercentileTracker> {
        self.trend.as_ref()
    }

    fn kind_label(&self) -> &'static str {
        match self.kind {
            Some(MetricType::Counter) => "counter",
            Some(MetricType::Gauge) => "gauge",
            Some(MetricType::Rate) => "rate",
            Some(MetricType::Trend) => "trend",
            None => "unknown",
        }
    }
}

/// Aggregates read from a results file.
#[derive(Debug, Clone, Default)]
pub struct ReportData {
    /// Metrics in the order they first appeared.
    pub metrics: Vec<MetricEntry>,
    index: HashMap<String, usize>,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub skipped_lines: u64,
}

impl ReportData {
    /// Parse results file content. Blank and malformed lines are skipped.
    pub fn parse(content: &str) -> Self {
        let mut data = ReportData::default();

        for line in content.lines().map(str::trim) {
            if line.is_empty() {
                continue;
            }
            let raw: RawLine = match serde_json::from_str(line) {
                Ok(raw) => raw,
                Err(_) => {
                    data.skipped_lines += 1;
                    continue;
                }
            };

            match raw.kind.as_str() {
                "Metric" => {
                    let kind = raw
                        .data
                        .get("type")
                        .cloned()
                        .and_then(|v| serde_json::from_value::<MetricType>(v).ok());
                    let entry = data.entry(&raw.metric);
                    entry.declarations += 1;
                    if let Some(kind) = kind {
                        entry.set_kind(kind);
                    }
                }
                "Point" => {
                    let value = raw.data.get("value").and_then(serde_json::Value::as_f64);
                    if raw.metric == HTTP_REQ_DURATION {
                        data.total_requests += 1;
                    }
                    if raw.metric == HTTP_REQ_FAILED && value == Some(1.0) {
                        data.failed_requests += 1;
                    }

                    let entry = data.entry(&raw.metric);
                    entry.samples += 1;
                    if let (Some(tracker), Some(v)) = (entry.trend.as_mut(), value) {
                        tracker.record_ms(v);
                    }
                }
                _ => data.skipped_lines += 1,
            }
        }

        data
    }

    fn entry(&mut self, name: &str) -> &mut MetricEntry {
        let idx = match self.index.get(name) {
            Some(&idx) => idx,
            None => {
                self.metrics.push(MetricEntry::new(name));
                self.index.insert(name.to_string(), self.metrics.len() - 1);
                self.metrics.len() - 1
            }
        };
        &mut self.metrics[idx]
    }

    pub fn metric(&self, name: &str) -> Option<&MetricEntry> {
        self.index.get(name).map(|&idx| &self.metrics[idx])
    }

    pub fn succeeded_requests(&self) -> u64 {
        self.total_requests.saturating_sub(self.failed_requests)
    }

    /// "97.5%", or "0%" when there were no requests.
    pub fn success_rate(&self) -> String {
        if self.total_requests == 0 {
            return "0%".to_string();
        }
        let rate = self.succeeded_requests() as f64 / self.total_requests as f64 * 100.0;
        format!("{:.1}%", rate)
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const STYLE: &str = r#"    * { margin: 0; padding: 0; box-sizing: border-box; }
    body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); padding: 20px; min-height: 100vh; }
    .container { max-width: 1200px; margin: 0 auto; background: white; border-radius: 12px; box-shadow: 0 20px 60px rgba(0,0,0,0.3); overflow: hidden; }
    .header { background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: white; padding: 40px; text-align: center; }
    .header h1 { font-size: 2.5em; margin-bottom: 10px; }
    .summary { display: grid; grid-template-columns: repeat(auto-fit, minmax(250px, 1fr)); gap: 20px; padding: 40px; background: #f8f9fa; }
    .metric-card { background: white; padding: 25px; border-radius: 8px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); }
    .metric-card h3 { color: #667eea; font-size: 0.9em; text-transform: uppercase; margin-bottom: 10px; }
    .metric-value { font-size: 2.5em; font-weight: bold; color: #2d3748; margin-bottom: 5px; }
    .success { color: #48bb78; }
    .error { color: #f56565; }
    .details { padding: 40px; }
    .section { margin-bottom: 40px; }
    .section h2 { color: #2d3748; margin-bottom: 20px; padding-bottom: 10px; border-bottom: 2px solid #e2e8f0; }
    table { width: 100%; border-collapse: collapse; background: white; box-shadow: 0 2px 8px rgba(0,0,0,0.1); border-radius: 8px; overflow: hidden; }
    th { background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: white; padding: 15px; text-align: left; }
    td { padding: 15px; border-bottom: 1px solid #e2e8f0; }
    tr:hover { background: #f7fafc; }
"#;

fn metrics_rows(data: &ReportData) -> String {
    let mut rows = String::new();
    for entry in &data.metrics {
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&entry.name),
            entry.kind_label(),
            entry.samples
        );
    }
    rows
}

fn trend_rows(data: &ReportData) -> String {
    let mut rows = String::new();
    for entry in &data.metrics {
        let Some(stats) = entry.trend().and_then(PercentileTracker::stats) else {
            continue;
        };
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&entry.name),
            stats.count,
            format_time_ms(stats.mean),
            format_time_ms(stats.p95),
            format_time_ms(stats.max)
        );
    }
    rows
}

/// Render the report page.
pub fn render_html(data: &ReportData, generated_at: DateTime<Local>) -> String {
    let rate_class = if data.failed_requests == 0 {
        "success"
    } else {
        "error"
    };

    let trends = trend_rows(data);
    let trend_section = if trends.is_empty() {
        String::new()
    } else {
        format!(
            r#"
      <div class="section">
        <h2>⏱️ Response Times</h2>
        <table>
          <tr><th>Metric</th><th>Samples</th><th>Avg</th><th>P95</th><th>Max</th></tr>
          {}
        </table>
      </div>"#,
            trends
        )
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Load Test Report</title>
  <style>
{style}  </style>
</head>
<body>
  <div class="container">
    <div class="header">
      <h1>⚡ Load Test Report</h1>
      <p>Generated on {generated}</p>
    </div>
    <div class="summary">
      <div class="metric-card">
        <h3>Total Requests</h3>
        <div class="metric-value">{total}</div>
      </div>
      <div class="metric-card">
        <h3>Success Rate</h3>
        <div class="metric-value {rate_class}">
          {rate}
        </div>
        <div>{succeeded} succeeded, {failed} failed</div>
      </div>
    </div>
    <div class="details">
      <div class="section">
        <h2>📈 Metrics Collected</h2>
        <table>
          <tr><th>Metric</th><th>Type</th><th>Count</th></tr>
          {metric_rows}
        </table>
      </div>{trend_section}
    </div>
  </div>
</body>
</html>
"#,
        style = STYLE,
        generated = generated_at.format("%Y-%m-%d %H:%M:%S"),
        total = data.total_requests,
        rate_class = rate_class,
        rate = data.success_rate(),
        succeeded = data.succeeded_requests(),
        failed = data.failed_requests,
        metric_rows = metrics_rows(data),
        trend_section = trend_section,
    )
}

/// `results.json` becomes `results.html`. A name without `.json` gets
/// `.html` appended so the input is never overwritten.
pub fn output_path_for(input: &Path) -> PathBuf {
    let file_name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let output_name = if file_name.contains(".json") {
        file_name.replacen(".json", ".html", 1)
    } else {
        format!("{}.html", file_name)
    };
    input.with_file_name(output_name)
}

/// Read `input`, write the HTML report next to it, and return its path.
pub fn generate_report(input: &Path) -> Result<PathBuf, ReportError> {
    if !input.exists() {
        return Err(ReportError::NotFound(input.to_path_buf()));
    }

    let content = fs::read_to_string(input).map_err(|source| ReportError::Io {
        path: input.to_path_buf(),
        source,
    })?;
    let data = ReportData::parse(&content);
    debug!(
        metrics = data.metrics.len(),
        total_requests = data.total_requests,
        failed_requests = data.failed_requests,
        skipped_lines = data.skipped_lines,
        "Parsed results file"
    );

    let output = output_path_for(input);
    fs::write(&output, render_html(&data, Local::now())).map_err(|source| ReportError::Io {
        path: output.clone(),
        source,
    })?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{"type":"Metric","data":{"name":"http_reqs","type":"counter","contains":"default","thresholds":[],"submetrics":null},"metric":"http_reqs"}
{"type":"Point","data":{"time":"2026-01-01T00:00:00Z","value":1,"tags":{}},"metric":"http_reqs"}
{"type":"Metric","data":{"name":"http_req_duration","type":"trend","contains":"time","thresholds":["p(95)<500"],"submetrics":null},"metric":"http_req_duration"}
{"type":"Point","data":{"time":"2026-01-01T00:00:00Z","value":100,"tags":{}},"metric":"http_req_duration"}
{"type":"Point","data":{"time":"2026-01-01T00:00:01Z","value":300,"tags":{}},"metric":"http_req_duration"}
not json at all

{"type":"Metric","data":{"name":"http_req_failed","type":"rate","contains":"default"},"metric":"http_req_failed"}
{"type":"Point","data":{"time":"2026-01-01T00:00:00Z","value":0,"tags":{}},"metric":"http_req_failed"}
{"type":"Point","data":{"time":"2026-01-01T00:00:01Z","value":1,"tags":{}},"metric":"http_req_failed"}
"#;

    #[test]
    fn counts_requests_and_failures() {
        let data = ReportData::parse(SAMPLE);
        assert_eq!(data.total_requests, 2);
        assert_eq!(data.failed_requests, 1);
        assert_eq!(data.succeeded_requests(), 1);
        assert_eq!(data.success_rate(), "50.0%");
        assert_eq!(data.skipped_lines, 1);
    }

    #[test]
    fn metrics_in_first_seen_order() {
        let data = ReportData::parse(SAMPLE);
        let names: Vec<&str> = data.metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["http_reqs", "http_req_duration", "http_req_failed"]);

        let duration = data.metric("http_req_duration").unwrap();
        assert_eq!(duration.declarations, 1);
        assert_eq!(duration.samples, 2);
        assert_eq!(duration.kind, Some(MetricType::Trend));
        assert_eq!(duration.trend().unwrap().count(), 2);
    }

    #[test]
    fn success_rate_formatting() {
        let mut data = ReportData::default();
        assert_eq!(data.success_rate(), "0%");

        data.total_requests = 40;
        data.failed_requests = 1;
        assert_eq!(data.success_rate(), "97.5%");

        data.failed_requests = 0;
        assert_eq!(data.success_rate(), "100.0%");
    }

    #[test]
    fn html_contains_cards_and_tables() {
        let data = ReportData::parse(SAMPLE);
        let html = render_html(&data, Local::now());

        assert!(html.contains("<title>Load Test Report</title>"));
        assert!(html.contains("Generated on "));
        assert!(html.contains(r#"<div class="metric-value">2</div>"#));
        assert!(html.contains(r#"metric-value error"#));
        assert!(html.contains("1 succeeded, 1 failed"));
        assert!(html.contains("<tr><td>http_req_duration</td><td>trend</td><td>2</td></tr>"));
        assert!(html.contains("Response Times"));
    }

    #[test]
    fn html_escapes_metric_names() {
        let data = ReportData::parse(
            r#"{"type":"Point","data":{"value":1},"metric":"<script>x</script>"}"#,
        );
        let html = render_html(&data, Local::now());
        assert!(html.contains("&lt;script&gt;x&lt;/script&gt;"));
        assert!(!html.contains("<script>x"));
        assert!(html.contains(r#"metric-value success"#));
    }

    #[test]
    fn output_path_rules() {
        assert_eq!(
            output_path_for(Path::new("results.json")),
            PathBuf::from("results.html")
        );
        assert_eq!(
            output_path_for(Path::new("out/run.json.bak")),
            PathBuf::from("out/run.html.bak")
        );
        assert_eq!(
            output_path_for(Path::new("data.json/results")),
            PathBuf::from("data.json/results.html")
        );
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = generate_report(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ReportError::NotFound(_)));
        assert_eq!(err.to_string(), "File '/definitely/not/here.json' not found!");
    }
}
