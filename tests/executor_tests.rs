//! Integration tests for the load test executor.
//!
//! These run short schedules against a mock server to check the VU count
//! follows the stages, thresholds decide the outcome, VUs that outlive
//! the graceful stop are aborted, and interrupts end the run early.

use reqwest::header::HeaderMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{self, Duration};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use ramp_loadtest::checks::Check;
use ramp_loadtest::config::Config;
use ramp_loadtest::executor::{run_load_test, run_load_test_until};
use ramp_loadtest::load_models::{LoadModel, Stage};
use ramp_loadtest::sinks::{Collector, Sink, HTTP_REQS, ITERATIONS, VUS, VUS_MAX};
use ramp_loadtest::thresholds::ThresholdSet;
use ramp_loadtest::worker::ThinkTime;

fn test_config(url: String, load_model: LoadModel) -> Config {
    Config {
        target_url: url,
        request_type: "GET".to_string(),
        json_payload: None,
        request_headers: HeaderMap::new(),
        load_model,
        thresholds: ThresholdSet::default(),
        checks: vec![Check::status_is(200)],
        think_time: Some(ThinkTime::Fixed(Duration::from_millis(50))),
        request_timeout: Duration::from_secs(10),
        graceful_stop: Duration::from_secs(2),
        results_file: None,
        metrics_port: 0,
        skip_tls_verify: false,
        resolve_target_addr: None,
        client_cert_path: None,
        client_key_path: None,
        custom_headers: None,
    }
}

fn thresholds(pairs: &[(&str, &str)]) -> ThresholdSet {
    let mut raw: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (metric, expr) in pairs {
        raw.entry(metric.to_string())
            .or_default()
            .push(expr.to_string());
    }
    ThresholdSet::parse(&raw).unwrap()
}

#[tokio::test]
async fn test_ramping_schedule_scales_up_and_down() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1..)
        .mount(&server)
        .await;

    let mut config = test_config(
        server.uri(),
        LoadModel::RampingVus {
            start_vus: 0,
            stages: vec![
                Stage::new(Duration::from_millis(400), 3),
                Stage::new(Duration::from_millis(400), 3),
                Stage::new(Duration::from_millis(400), 0),
            ],
        },
    );
    config.thresholds = thresholds(&[
        ("http_req_failed", "rate<0.05"),
        ("http_req_duration", "p(95)<2000"),
    ]);
    let collector = Arc::new(Collector::default());

    let outcome = run_load_test(reqwest::Client::new(), &config, collector)
        .await
        .unwrap();

    assert!(outcome.passed(), "thresholds: {:?}", outcome.threshold_results);
    assert_eq!(outcome.threshold_results.len(), 2);
    assert_eq!(outcome.interrupted_vus, 0);
    assert!(!outcome.aborted);
    assert!(outcome.iterations > 0);
    assert!(outcome.duration >= Duration::from_millis(1200));

    match outcome.snapshot.sink(VUS) {
        Some(Sink::Gauge { last, max, .. }) => {
            assert_eq!(*max, 3.0);
            assert_eq!(*last, 0.0);
        }
        other => panic!("unexpected vus sink: {:?}", other),
    }
    assert!(matches!(
        outcome.snapshot.sink(VUS_MAX),
        Some(Sink::Gauge { last, .. }) if *last == 3.0
    ));
    assert!(matches!(
        outcome.snapshot.sink(ITERATIONS),
        Some(Sink::Counter { count, .. }) if *count == outcome.iterations
    ));

    println!(
        "✅ Ramping schedule ran {} iterations with at most 3 VUs",
        outcome.iterations
    );
}

#[tokio::test]
async fn test_failed_threshold_fails_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut config = test_config(
        server.uri(),
        LoadModel::ConstantVus {
            vus: 2,
            duration: Duration::from_millis(300),
        },
    );
    config.thresholds = thresholds(&[
        ("http_req_failed", "rate<0.05"),
        ("errors", "rate<0.1"),
        ("http_reqs", "count>0"),
    ]);
    let collector = Arc::new(Collector::default());

    let outcome = run_load_test(reqwest::Client::new(), &config, collector)
        .await
        .unwrap();

    assert!(!outcome.passed());
    let failed: Vec<&str> = outcome
        .threshold_results
        .iter()
        .filter(|r| !r.passed)
        .map(|r| r.metric.as_str())
        .collect();
    assert_eq!(failed, vec!["errors", "http_req_failed"]);
    assert_eq!(outcome.snapshot.checks["status is 200"].passes, 0);

    println!("✅ Server errors crossed the failure thresholds");
}

#[tokio::test]
async fn test_slow_vus_are_aborted_after_graceful_stop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let mut config = test_config(
        server.uri(),
        LoadModel::ConstantVus {
            vus: 2,
            duration: Duration::from_millis(200),
        },
    );
    config.graceful_stop = Duration::from_millis(200);
    let collector = Arc::new(Collector::default());

    let outcome = run_load_test(reqwest::Client::new(), &config, collector)
        .await
        .unwrap();

    assert_eq!(outcome.interrupted_vus, 2);
    assert_eq!(outcome.iterations, 0);
    assert!(outcome.duration < Duration::from_secs(3));
    assert!(outcome.snapshot.sink(HTTP_REQS).is_none());

    println!("✅ VUs stuck in slow requests were aborted after the graceful stop");
}

#[tokio::test]
async fn test_interrupt_ends_schedule_with_graceful_stop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    let config = test_config(
        server.uri(),
        LoadModel::ConstantVus {
            vus: 2,
            duration: Duration::from_secs(30),
        },
    );
    let collector = Arc::new(Collector::default());
    let (interrupt_tx, interrupt_rx) = watch::channel(false);

    let run = tokio::spawn(async move {
        run_load_test_until(reqwest::Client::new(), &config, collector, interrupt_rx).await
    });
    time::sleep(Duration::from_millis(500)).await;
    interrupt_tx.send(true).unwrap();

    let outcome = run.await.unwrap().unwrap();

    assert!(outcome.aborted);
    assert_eq!(outcome.interrupted_vus, 0);
    assert!(outcome.iterations > 0);
    assert!(outcome.duration < Duration::from_secs(5));

    println!("✅ Interrupt ended the schedule and VUs finished their iteration");
}

#[tokio::test]
async fn test_second_interrupt_skips_graceful_stop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(20)))
        .mount(&server)
        .await;

    let mut config = test_config(
        server.uri(),
        LoadModel::ConstantVus {
            vus: 2,
            duration: Duration::from_secs(30),
        },
    );
    config.graceful_stop = Duration::from_secs(20);
    let collector = Arc::new(Collector::default());
    let (interrupt_tx, interrupt_rx) = watch::channel(false);

    let run = tokio::spawn(async move {
        run_load_test_until(reqwest::Client::new(), &config, collector, interrupt_rx).await
    });
    time::sleep(Duration::from_millis(300)).await;
    interrupt_tx.send(true).unwrap();
    time::sleep(Duration::from_millis(300)).await;
    interrupt_tx.send(true).unwrap();

    let outcome = run.await.unwrap().unwrap();

    assert!(outcome.aborted);
    assert_eq!(outcome.interrupted_vus, 2);
    assert_eq!(outcome.iterations, 0);
    assert!(outcome.duration < Duration::from_secs(5));

    println!("✅ Second interrupt aborted VUs without waiting for the graceful stop");
}

#[tokio::test]
async fn test_interrupt_after_schedule_aborts_graceful_stop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(20)))
        .mount(&server)
        .await;

    let mut config = test_config(
        server.uri(),
        LoadModel::ConstantVus {
            vus: 1,
            duration: Duration::from_millis(200),
        },
    );
    config.graceful_stop = Duration::from_secs(20);
    let collector = Arc::new(Collector::default());
    let (interrupt_tx, interrupt_rx) = watch::channel(false);

    let run = tokio::spawn(async move {
        run_load_test_until(reqwest::Client::new(), &config, collector, interrupt_rx).await
    });
    time::sleep(Duration::from_millis(800)).await;
    interrupt_tx.send(true).unwrap();

    let outcome = run.await.unwrap().unwrap();

    assert!(outcome.aborted);
    assert_eq!(outcome.interrupted_vus, 1);
    assert!(outcome.duration < Duration::from_secs(5));

    println!("✅ Interrupt during the graceful stop aborted the waiting VU");
}
