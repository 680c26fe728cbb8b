//! Newline-delimited JSON results output.
//!
//! Each metric is declared once with a `Metric` line before its first
//! `Point` line. Samples arrive over a channel and a single task owns the
//! file, so lines from concurrent VUs never interleave.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::sinks::{MetricType, Sample, Tags, ValueType};
use crate::thresholds::ThresholdSet;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write results file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode result line: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Results writer task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Body of a `Metric` declaration line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricData {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MetricType,
    pub contains: ValueType,
    #[serde(default)]
    pub thresholds: Vec<String>,
    #[serde(default)]
    pub submetrics: Option<serde_json::Value>,
}

/// Body of a `Point` line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointData {
    pub time: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub tags: Tags,
}

/// One line of the results file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResultLine {
    Metric { data: MetricData, metric: String },
    Point { data: PointData, metric: String },
}

impl ResultLine {
    pub fn declaration(sample: &Sample, thresholds: &ThresholdSet) -> Self {
        ResultLine::Metric {
            data: MetricData {
                name: sample.metric.name.to_string(),
                kind: sample.metric.kind,
                contains: sample.metric.contains,
                thresholds: thresholds.sources_for(sample.metric.name),
                submetrics: None,
            },
            metric: sample.metric.name.to_string(),
        }
    }

    pub fn point(sample: &Sample) -> Self {
        ResultLine::Point {
            data: PointData {
                time: sample.time,
                value: sample.value,
                tags: sample.tags.clone(),
            },
            metric: sample.metric.name.to_string(),
        }
    }

    /// Serialize as a single line, newline included.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Handle to a running results writer.
pub struct ResultsWriter {
    handle: JoinHandle<Result<u64, OutputError>>,
}

impl ResultsWriter {
    /// Create the results file and start the writer task.
    ///
    /// The file is created before returning so an unwritable path fails the
    /// test before any load is generated.
    pub fn spawn(
        path: &Path,
        thresholds: ThresholdSet,
    ) -> Result<(UnboundedSender<Sample>, Self), OutputError> {
        let file = std::fs::File::create(path)?;
        let file = tokio::fs::File::from_std(file);
        let (tx, rx) = mpsc::unbounded_channel();

        info!(path = %path.display(), "Writing results");
        let handle = tokio::spawn(write_results(rx, BufWriter::new(file), thresholds));
        Ok((tx, Self { handle }))
    }

    /// Wait for the writer to drain. Returns the number of lines written.
    ///
    /// Every sender must be dropped first, otherwise this waits forever.
    pub async fn finish(self) -> Result<u64, OutputError> {
        self.handle.await?
    }
}

async fn write_results<W>(
    mut rx: UnboundedReceiver<Sample>,
    mut writer: W,
    thresholds: ThresholdSet,
) -> Result<u64, OutputError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut declared: HashSet<&'static str> = HashSet::new();
    let mut lines = 0u64;

    while let Some(sample) = rx.recv().await {
        if declared.insert(sample.metric.name) {
            let line = ResultLine::declaration(&sample, &thresholds).to_line()?;
            writer.write_all(line.as_bytes()).await?;
            lines += 1;
        }
        let line = ResultLine::point(&sample).to_line()?;
        writer.write_all(line.as_bytes()).await?;
        lines += 1;
    }

    writer.flush().await?;
    debug!(lines = lines, "Results writer finished");
    Ok(lines)
}
