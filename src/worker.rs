use rand::Rng;
use reqwest::header::HeaderMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, error};

use crate::checks::{run_checks, Check, CheckResponse};
use crate::errors::ErrorCategory;
use crate::metrics::{
    CHECKS_TOTAL, CONCURRENT_REQUESTS, ITERATIONS_TOTAL, REQUEST_DURATION_SECONDS,
    REQUEST_ERRORS_BY_CATEGORY, REQUEST_STATUS_CODES, REQUEST_TOTAL,
};
use crate::sinks::{
    metric_def, Collector, MetricDef, Sample, Tags, CHECKS, DATA_RECEIVED, DATA_SENT, ERRORS,
    HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED, ITERATIONS, ITERATION_DURATION,
};

/// Pause between iterations of a VU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkTime {
    Fixed(Duration),
    /// Uniformly random between min and max (inclusive).
    Random { min: Duration, max: Duration },
}

impl ThinkTime {
    pub fn sample(&self) -> Duration {
        match *self {
            ThinkTime::Fixed(d) => d,
            ThinkTime::Random { min, max } => {
                if max <= min {
                    return min;
                }
                let ms = rand::thread_rng()
                    .gen_range(min.as_millis() as u64..=max.as_millis() as u64);
                Duration::from_millis(ms)
            }
        }
    }
}

/// The request every iteration sends.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub method: reqwest::Method,
    pub url: String,
    pub body: Option<String>,
    pub headers: HeaderMap,
}

/// Configuration for one virtual user.
#[derive(Debug, Clone)]
pub struct VuConfig {
    pub vu_id: u64,
    pub request: Arc<RequestTemplate>,
    pub checks: Arc<[Check]>,
    pub think_time: Option<ThinkTime>,
}

fn def(name: &str) -> &'static MetricDef {
    metric_def(name).expect("built-in metric")
}

/// Runs a virtual user until `stop` flips to true.
///
/// A stop signal never interrupts an in-flight request; the current
/// iteration completes and the think time is cut short. Returns the number
/// of iterations completed.
pub async fn run_vu(
    client: reqwest::Client,
    config: VuConfig,
    collector: Arc<Collector>,
    mut stop: watch::Receiver<bool>,
) -> u64 {
    debug!(vu = config.vu_id, url = %config.request.url, "VU starting");

    let needs_body = config.checks.iter().any(Check::needs_body);
    let mut iterations = 0u64;

    loop {
        if *stop.borrow() {
            break;
        }

        let iteration_start = Instant::now();
        run_iteration(&client, &config, &collector, needs_body).await;

        let mut stopped = false;
        if let Some(think_time) = config.think_time {
            let pause = think_time.sample();
            stopped = tokio::select! {
                _ = time::sleep(pause) => false,
                changed = stop.changed() => changed.is_err() || *stop.borrow(),
            };
        }

        let iteration_ms = iteration_start.elapsed().as_secs_f64() * 1000.0;
        collector.push_all([
            Sample::new(def(ITERATIONS), 1.0, Tags::new()),
            Sample::new(def(ITERATION_DURATION), iteration_ms, Tags::new()),
        ]);
        ITERATIONS_TOTAL.inc();
        iterations += 1;

        if stopped {
            break;
        }
    }

    debug!(vu = config.vu_id, iterations = iterations, "VU stopped");
    iterations
}

/// What came back from one request.
struct Exchange {
    status: u16,
    headers: HeaderMap,
    body: String,
    received_bytes: u64,
}

async fn execute(
    builder: reqwest::RequestBuilder,
    keep_body: bool,
) -> Result<Exchange, reqwest::Error> {
    let mut response = builder.send().await?;
    let status = response.status().as_u16();
    let headers = response.headers().clone();

    // Stream the body so large responses are only buffered when a check
    // needs to look at them.
    let mut received_bytes = 0u64;
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        received_bytes += chunk.len() as u64;
        if keep_body {
            body.extend_from_slice(&chunk);
        }
    }

    Ok(Exchange {
        status,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
        received_bytes,
    })
}

/// Holds the in-flight gauge up until dropped, including when the VU task
/// is aborted mid-request.
struct InFlight;

impl InFlight {
    fn start() -> Self {
        CONCURRENT_REQUESTS.inc();
        InFlight
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        CONCURRENT_REQUESTS.dec();
    }
}

/// Sends one request, records its metrics and runs the checks.
///
/// Returns true when the request succeeded and every check passed.
pub async fn run_iteration(
    client: &reqwest::Client,
    config: &VuConfig,
    collector: &Collector,
    needs_body: bool,
) -> bool {
    let request = &config.request;
    let mut builder = client
        .request(request.method.clone(), &request.url)
        .headers(request.headers.clone());
    let sent_bytes = request.body.as_ref().map_or(0, |b| b.len());
    if let Some(body) = &request.body {
        builder = builder.body(body.clone());
    }

    let in_flight = InFlight::start();
    REQUEST_TOTAL.inc();

    let start = Instant::now();
    let exchange = execute(builder, needs_body).await;
    let duration = start.elapsed();

    REQUEST_DURATION_SECONDS.observe(duration.as_secs_f64());
    drop(in_flight);

    let mut tags = Tags::new();
    tags.insert("method".to_string(), request.method.to_string());
    tags.insert("url".to_string(), request.url.clone());
    tags.insert("name".to_string(), request.url.clone());

    let failure = match &exchange {
        Ok(ex) => {
            REQUEST_STATUS_CODES
                .with_label_values(&[status_code_label(ex.status)])
                .inc();
            tags.insert("status".to_string(), ex.status.to_string());
            debug!(
                vu = config.vu_id,
                url = %request.url,
                status_code = ex.status,
                "Request completed"
            );
            ErrorCategory::from_status_code(ex.status).map(|c| (c, Some(ex.status)))
        }
        Err(e) => {
            REQUEST_STATUS_CODES.with_label_values(&["error"]).inc();
            tags.insert("status".to_string(), "0".to_string());
            let category = ErrorCategory::from_reqwest_error(e);
            error!(
                vu = config.vu_id,
                url = %request.url,
                error = %e,
                error_category = %category.label(),
                "Request failed"
            );
            Some((category, None))
        }
    };

    if let Some((category, status)) = failure {
        REQUEST_ERRORS_BY_CATEGORY
            .with_label_values(&[category.label()])
            .inc();
        tags.insert(
            "error_code".to_string(),
            category.error_code(status).to_string(),
        );
    }
    tags.insert(
        "expected_response".to_string(),
        failure.is_none().to_string(),
    );

    let received_bytes = exchange.as_ref().map_or(0, |ex| ex.received_bytes);
    collector.push_all([
        Sample::new(def(HTTP_REQS), 1.0, tags.clone()),
        Sample::new(
            def(HTTP_REQ_DURATION),
            duration.as_secs_f64() * 1000.0,
            tags.clone(),
        ),
        Sample::rate(def(HTTP_REQ_FAILED), failure.is_some(), tags.clone()),
        Sample::new(def(DATA_SENT), sent_bytes as f64, tags.clone()),
        Sample::new(def(DATA_RECEIVED), received_bytes as f64, tags),
    ]);

    let check_response = match &exchange {
        Ok(ex) => CheckResponse {
            status: Some(ex.status),
            duration,
            body: &ex.body,
            headers: Some(&ex.headers),
        },
        Err(_) => CheckResponse {
            status: None,
            duration,
            body: "",
            headers: None,
        },
    };

    let mut all_passed = true;
    for result in run_checks(&config.checks, &check_response) {
        let mut check_tags = Tags::new();
        check_tags.insert("check".to_string(), result.name.clone());
        check_tags.insert("url".to_string(), request.url.clone());
        collector.push(Sample::rate(def(CHECKS), result.passed, check_tags));

        let outcome = if result.passed { "passed" } else { "failed" };
        CHECKS_TOTAL
            .with_label_values(&[result.name.as_str(), outcome])
            .inc();
        all_passed &= result.passed;
    }

    let ok = failure.is_none() && all_passed;
    collector.push(Sample::rate(def(ERRORS), !ok, Tags::new()));
    ok
}

/// Returns a static string label for common HTTP status codes.
///
/// Uncommon codes fall back to "other" rather than creating a new series.
fn status_code_label(code: u16) -> &'static str {
    match code {
        200 => "200",
        201 => "201",
        204 => "204",
        301 => "301",
        302 => "302",
        304 => "304",
        400 => "400",
        401 => "401",
        403 => "403",
        404 => "404",
        409 => "409",
        422 => "422",
        429 => "429",
        500 => "500",
        502 => "502",
        503 => "503",
        504 => "504",
        _ => "other",
    }
}
