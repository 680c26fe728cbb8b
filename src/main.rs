use std::env;
use std::path::Path;
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ramp_loadtest::client::build_client;
use ramp_loadtest::config::Config;
use ramp_loadtest::errors::LoadTestError;
use ramp_loadtest::executor::run_load_test;
use ramp_loadtest::metrics::{register_metrics, start_metrics_server};
use ramp_loadtest::output::ResultsWriter;
use ramp_loadtest::sinks::Collector;
use ramp_loadtest::summary::render_summary;

/// Exit code when the test ran but at least one threshold failed.
const EXIT_THRESHOLDS_FAILED: i32 = 99;

/// Prints helpful configuration documentation.
fn print_config_help() {
    eprintln!("Configuration file:");
    eprintln!("  CONFIG_FILE             - YAML test plan; when set the variables below are ignored");
    eprintln!("                            except the TLS/advanced ones");
    eprintln!();
    eprintln!("Required environment variables:");
    eprintln!(
        "  TARGET_URL              - The URL to load test (must start with http:// or https://)"
    );
    eprintln!();
    eprintln!("Optional environment variables:");
    eprintln!("  REQUEST_TYPE            - GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS (default: GET)");
    eprintln!("  SEND_JSON               - Send JSON payload: true or false (default: false)");
    eprintln!(
        "  JSON_PAYLOAD            - JSON request body (required if SEND_JSON=true)"
    );
    eprintln!();
    eprintln!("Load schedule:");
    eprintln!("  STAGES                  - Ramping stages duration:target, e.g. 2s:10,2s:10,2s:50,3s:0");
    eprintln!("  START_VUS               - VUs at the start of the first stage (default: 0)");
    eprintln!("  VUS                     - Constant VUs when STAGES is not set (default: 10)");
    eprintln!("  TEST_DURATION           - Constant-VU test duration: 30s, 10m, 1h (default: 30s)");
    eprintln!("  THINK_TIME              - Pause between iterations: 1s or 1s-3s (default: none)");
    eprintln!("  GRACEFUL_STOP           - Time VUs get to finish after the schedule (default: 30s)");
    eprintln!("  REQUEST_TIMEOUT         - Per-request timeout (default: 60s)");
    eprintln!();
    eprintln!("Checks and thresholds:");
    eprintln!("  CHECK_STATUS            - Expected status code, e.g. 200");
    eprintln!("  CHECK_MAX_RESPONSE_TIME - Response time limit, e.g. 200ms");
    eprintln!("  THRESHOLDS              - metric=expr[,expr];..., e.g.");
    eprintln!("                            http_req_duration=p(95)<500;http_req_failed=rate<0.05");
    eprintln!();
    eprintln!("Output:");
    eprintln!("  RESULTS_FILE            - Write every sample as NDJSON to this file");
    eprintln!("  METRICS_PORT            - Prometheus metrics port, 0 disables (default: 9090)");
    eprintln!("  METRIC_NAMESPACE        - Prometheus metric namespace (default: ramp_loadtest)");
    eprintln!("  RUST_LOG                - Log filter (default: info)");
    eprintln!("  LOG_FORMAT              - Set to json for JSON logs");
    eprintln!();
    eprintln!("TLS/mTLS configuration:");
    eprintln!("  SKIP_TLS_VERIFY         - Skip TLS certificate verification (default: false)");
    eprintln!("  CLIENT_CERT_PATH        - Path to client certificate for mTLS");
    eprintln!("  CLIENT_KEY_PATH         - Path to client key for mTLS");
    eprintln!("  Note: Both CLIENT_CERT_PATH and CLIENT_KEY_PATH must be set together");
    eprintln!();
    eprintln!("Advanced configuration:");
    eprintln!("  RESOLVE_TARGET_ADDR     - DNS override: hostname:ip:port");
    eprintln!("  CUSTOM_HEADERS          - Comma-separated headers (use \\, for literal commas)");
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json = env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for the results writer to drain everything the test produced.
async fn finish_results(writer: ResultsWriter, path: &Path) -> Result<(), LoadTestError> {
    let lines = writer.finish().await?;
    info!(lines = lines, path = %path.display(), "Results written");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging();

    // Register Prometheus metrics
    register_metrics()?;

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            process::exit(1);
        }
    };

    // Build HTTP client with TLS and header configuration
    let client_result = match build_client(&config.to_client_config()) {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Failed to build HTTP client");
            process::exit(1);
        }
    };

    config.print_summary(&client_result.parsed_headers);

    if config.metrics_port != 0 {
        let port = config.metrics_port;
        let registry = prometheus::default_registry().clone();
        tokio::spawn(async move {
            start_metrics_server(port, registry).await;
        });
    }

    let (collector, writer) = match &config.results_file {
        Some(path) => {
            let (tx, writer) = ResultsWriter::spawn(path, config.thresholds.clone())?;
            (Collector::new(Some(tx)), Some(writer))
        }
        None => (Collector::new(None), None),
    };
    let collector = Arc::new(collector);

    let outcome = run_load_test(client_result.client, &config, collector.clone()).await?;

    collector.close_output();
    let results = match (writer, &config.results_file) {
        (Some(writer), Some(path)) => finish_results(writer, path).await,
        _ => Ok(()),
    };

    println!(
        "{}",
        render_summary(
            &outcome.snapshot,
            &outcome.threshold_results,
            outcome.duration
        )
    );

    if outcome.aborted {
        warn!("Test was interrupted before the schedule finished");
    }

    if let Err(e) = results {
        error!(error = %e, "Results file is incomplete");
        process::exit(1);
    }

    if !outcome.passed() {
        error!("Some thresholds have failed");
        process::exit(EXIT_THRESHOLDS_FAILED);
    }

    Ok(())
}
