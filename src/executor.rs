//! Load test execution engine.
//!
//! Drives the VU schedule of a [`LoadModel`]: every tick the executor
//! compares the scheduled VU count with the running one and starts or
//! retires VUs to match. When the schedule ends all VUs are asked to stop,
//! given `graceful_stop` to finish their iteration, and then aborted.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::checks::Check;
use crate::config::Config;
use crate::errors::LoadTestError;
use crate::load_models::LoadModel;
use crate::metrics::VIRTUAL_USERS;
use crate::sinks::{metric_def, Collector, MetricsSnapshot, Sample, Tags, VUS, VUS_MAX};
use crate::thresholds::ThresholdResult;
use crate::worker::{run_vu, RequestTemplate, ThinkTime, VuConfig};

/// How often the executor re-evaluates the VU schedule.
pub const RAMP_TICK: Duration = Duration::from_millis(100);

/// How often the `vus` gauge is sampled when the count is steady.
const VUS_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Produced once before any VU starts and handed to teardown.
#[derive(Debug, Clone)]
pub struct SetupData {
    pub started_at: DateTime<Utc>,
}

/// Everything the caller needs after a run.
#[derive(Debug)]
pub struct TestOutcome {
    /// Wall-clock time from the first tick until every VU finished.
    pub duration: Duration,

    /// Iterations completed by VUs that stopped on their own.
    pub iterations: u64,

    /// VUs still busy when the graceful stop expired.
    pub interrupted_vus: usize,

    /// True when the run was cut short by an interrupt.
    pub aborted: bool,

    pub threshold_results: Vec<ThresholdResult>,

    pub snapshot: MetricsSnapshot,
}

impl TestOutcome {
    /// True when every threshold passed.
    pub fn passed(&self) -> bool {
        self.threshold_results.iter().all(|r| r.passed)
    }
}

struct RunningVu {
    stop: watch::Sender<bool>,
    handle: JoinHandle<u64>,
}

/// Starts and retires VUs to follow the schedule.
struct VuController {
    client: reqwest::Client,
    request: Arc<RequestTemplate>,
    checks: Arc<[Check]>,
    think_time: Option<ThinkTime>,
    collector: Arc<Collector>,
    active: Vec<RunningVu>,
    retired: Vec<JoinHandle<u64>>,
    next_id: u64,
}

impl VuController {
    fn active(&self) -> u64 {
        self.active.len() as u64
    }

    /// Start or retire VUs until `target` are active. Retired VUs finish
    /// their current iteration before exiting.
    fn scale_to(&mut self, target: u64) {
        while self.active() < target {
            self.next_id += 1;
            let (stop_tx, stop_rx) = watch::channel(false);
            let vu_config = VuConfig {
                vu_id: self.next_id,
                request: self.request.clone(),
                checks: self.checks.clone(),
                think_time: self.think_time,
            };
            let handle = tokio::spawn(run_vu(
                self.client.clone(),
                vu_config,
                self.collector.clone(),
                stop_rx,
            ));
            self.active.push(RunningVu {
                stop: stop_tx,
                handle,
            });
        }

        while self.active() > target {
            if let Some(vu) = self.active.pop() {
                let _ = vu.stop.send(true);
                self.retired.push(vu.handle);
            }
        }
    }

    /// Stop every VU and wait up to `graceful_stop` for them to finish.
    ///
    /// An interrupt during the wait aborts every VU still running. Returns
    /// the completed iterations, the number of VUs aborted, and whether an
    /// interrupt cut the wait short.
    async fn shutdown(
        mut self,
        graceful_stop: Duration,
        interrupt: &mut watch::Receiver<bool>,
    ) -> (u64, usize, bool) {
        self.scale_to(0);

        let deadline = Instant::now() + graceful_stop;
        let mut iterations = 0u64;
        let mut interrupted = 0usize;
        let mut forced = false;

        for mut handle in self.retired {
            if forced {
                handle.abort();
                interrupted += 1;
                continue;
            }
            tokio::select! {
                res = time::timeout_at(deadline, &mut handle) => match res {
                    Ok(Ok(n)) => iterations += n,
                    Ok(Err(e)) => warn!(error = %e, "VU task failed"),
                    Err(_) => {
                        handle.abort();
                        interrupted += 1;
                    }
                },
                Ok(()) = interrupt.changed() => {
                    warn!("Interrupted during graceful stop, aborting remaining VUs");
                    forced = true;
                    handle.abort();
                    interrupted += 1;
                }
            }
        }

        (iterations, interrupted, forced)
    }
}

fn record_vus(collector: &Collector, active: u64) {
    VIRTUAL_USERS.set(active as i64);
    if let Some(def) = metric_def(VUS) {
        collector.push(Sample::new(def, active as f64, Tags::new()));
    }
}

/// Runs once before the first VU starts.
pub fn setup() -> SetupData {
    info!("Setting up test...");
    SetupData {
        started_at: Utc::now(),
    }
}

/// Runs once after every VU has stopped.
pub fn teardown(data: &SetupData) {
    let finished_at = Utc::now();
    info!(
        started_at = %data.started_at.to_rfc3339(),
        "Test completed at: {}",
        finished_at.to_rfc3339()
    );
}

/// Runs the configured schedule to completion and evaluates thresholds.
///
/// Ctrl-C ends the schedule early and VUs still get the graceful stop. A
/// Ctrl-C during the graceful stop aborts the remaining VUs at once.
pub async fn run_load_test(
    client: reqwest::Client,
    config: &Config,
    collector: Arc<Collector>,
) -> Result<TestOutcome, LoadTestError> {
    let (interrupt_tx, interrupt_rx) = watch::channel(false);
    let signal_task = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt_tx.send(true).is_err() {
                break;
            }
        }
    });

    let outcome = run_load_test_until(client, config, collector, interrupt_rx).await;
    signal_task.abort();
    outcome
}

/// Like [`run_load_test`], but interrupted through `interrupt_rx` instead of
/// Ctrl-C. Every send on the channel counts as one interrupt.
pub async fn run_load_test_until(
    client: reqwest::Client,
    config: &Config,
    collector: Arc<Collector>,
    mut interrupt_rx: watch::Receiver<bool>,
) -> Result<TestOutcome, LoadTestError> {
    let request = Arc::new(config.request_template()?);
    let setup_data = setup();

    let mut controller = VuController {
        client,
        request,
        checks: Arc::from(config.checks.clone()),
        think_time: config.think_time,
        collector: collector.clone(),
        active: Vec::new(),
        retired: Vec::new(),
        next_id: 0,
    };

    let model: &LoadModel = &config.load_model;
    let total = model.total_duration();
    if let Some(def) = metric_def(VUS_MAX) {
        collector.push(Sample::new(def, model.max_vus() as f64, Tags::new()));
    }
    info!(
        max_vus = model.max_vus(),
        duration_secs = total.as_secs_f64(),
        "Starting load test"
    );

    let start = Instant::now();
    let mut ticker = time::interval(RAMP_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut aborted = false;
    let mut current_stage = None;
    let mut last_vus_sample: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            Ok(()) = interrupt_rx.changed() => {
                warn!("Interrupted, stopping all VUs");
                aborted = true;
                break;
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= total {
            break;
        }

        let stage = model.stage_at(elapsed);
        if stage != current_stage {
            if let Some(idx) = stage {
                info!(stage = idx + 1, elapsed_secs = elapsed.as_secs_f64(), "Entering stage");
            }
            current_stage = stage;
        }

        let before = controller.active();
        controller.scale_to(model.target_vus_at(elapsed));
        let after = controller.active();

        let sample_due = last_vus_sample.map_or(true, |t| t.elapsed() >= VUS_SAMPLE_INTERVAL);
        if after != before || sample_due {
            if after != before {
                debug!(from = before, to = after, "Scaled VUs");
            }
            record_vus(&collector, after);
            last_vus_sample = Some(Instant::now());
        }
    }

    info!(
        graceful_stop_secs = config.graceful_stop.as_secs_f64(),
        "Schedule finished, waiting for VUs to stop"
    );
    let (iterations, interrupted_vus, forced) = controller
        .shutdown(config.graceful_stop, &mut interrupt_rx)
        .await;
    let aborted = aborted || forced;
    record_vus(&collector, 0);
    if interrupted_vus > 0 {
        warn!(
            interrupted_vus = interrupted_vus,
            "VUs did not finish within the graceful stop and were aborted"
        );
    }

    let duration = start.elapsed();
    teardown(&setup_data);

    let snapshot = collector.snapshot();
    let threshold_results = config.thresholds.evaluate(&snapshot, duration);
    for result in threshold_results.iter().filter(|r| !r.passed) {
        warn!(
            metric = %result.metric,
            threshold = %result.source,
            observed = ?result.observed,
            "Threshold crossed"
        );
    }

    Ok(TestOutcome {
        duration,
        iterations,
        interrupted_vus,
        aborted,
        threshold_results,
        snapshot,
    })
}
