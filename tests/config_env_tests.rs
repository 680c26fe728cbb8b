//! Integration tests for environment and YAML configuration loading.
//!
//! Environment variables are process-global, so every test is `#[serial]`
//! and starts from a clean slate.

use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use ramp_loadtest::config::{Config, ConfigError};
use ramp_loadtest::load_models::{LoadModel, Stage};
use ramp_loadtest::worker::ThinkTime;

/// Clear all env vars that could affect config parsing.
fn clean_env() {
    for var in [
        "CONFIG_FILE",
        "TARGET_URL",
        "REQUEST_TYPE",
        "SEND_JSON",
        "JSON_PAYLOAD",
        "STAGES",
        "START_VUS",
        "VUS",
        "TEST_DURATION",
        "THRESHOLDS",
        "CHECK_STATUS",
        "CHECK_MAX_RESPONSE_TIME",
        "THINK_TIME",
        "REQUEST_TIMEOUT",
        "GRACEFUL_STOP",
        "RESULTS_FILE",
        "METRICS_PORT",
        "SKIP_TLS_VERIFY",
        "RESOLVE_TARGET_ADDR",
        "CLIENT_CERT_PATH",
        "CLIENT_KEY_PATH",
        "CUSTOM_HEADERS",
    ] {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_defaults_with_only_target_url() {
    clean_env();
    env::set_var("TARGET_URL", "https://test-api.example.com/public/crocodiles/");

    let config = Config::load().unwrap();

    assert_eq!(config.request_type, "GET");
    assert_eq!(
        config.load_model,
        LoadModel::ConstantVus {
            vus: 10,
            duration: Duration::from_secs(30)
        }
    );
    assert!(config.thresholds.is_empty());
    assert!(config.checks.is_empty());
    assert_eq!(config.think_time, None);
    assert_eq!(config.request_timeout, Duration::from_secs(60));
    assert_eq!(config.graceful_stop, Duration::from_secs(30));
    assert_eq!(config.results_file, None);
    assert_eq!(config.metrics_port, 9090);
    assert!(!config.skip_tls_verify);

    println!("✅ Defaults applied when only TARGET_URL is set");
}

#[test]
#[serial]
fn test_staged_run_from_env() {
    clean_env();
    env::set_var("TARGET_URL", "https://test-api.example.com/public/crocodiles/");
    env::set_var("STAGES", "2s:10,2s:10,2s:50,3s:0");
    env::set_var("START_VUS", "1");
    env::set_var(
        "THRESHOLDS",
        "http_req_duration=p(95)<500;http_req_failed=rate<0.05;errors=rate<0.1",
    );
    env::set_var("CHECK_STATUS", "200");
    env::set_var("CHECK_MAX_RESPONSE_TIME", "200ms");
    env::set_var("THINK_TIME", "1s");
    env::set_var("GRACEFUL_STOP", "5s");
    env::set_var("RESULTS_FILE", "results.json");
    env::set_var("METRICS_PORT", "0");

    let config = Config::load().unwrap();

    assert_eq!(
        config.load_model,
        LoadModel::RampingVus {
            start_vus: 1,
            stages: vec![
                Stage::new(Duration::from_secs(2), 10),
                Stage::new(Duration::from_secs(2), 10),
                Stage::new(Duration::from_secs(2), 50),
                Stage::new(Duration::from_secs(3), 0),
            ],
        }
    );
    assert_eq!(config.thresholds.sources_for("http_req_duration"), vec!["p(95)<500"]);
    assert_eq!(config.thresholds.sources_for("errors"), vec!["rate<0.1"]);
    let names: Vec<&str> = config.checks.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["status is 200", "response time < 200ms"]);
    assert_eq!(config.think_time, Some(ThinkTime::Fixed(Duration::from_secs(1))));
    assert_eq!(config.graceful_stop, Duration::from_secs(5));
    assert_eq!(config.results_file, Some(PathBuf::from("results.json")));
    assert_eq!(config.metrics_port, 0);

    println!("✅ Staged configuration read from environment");
}

#[test]
#[serial]
fn test_missing_target_url() {
    clean_env();
    assert!(matches!(
        Config::load(),
        Err(ConfigError::MissingEnvVar("TARGET_URL"))
    ));
    println!("✅ Missing TARGET_URL rejected");
}

#[test]
#[serial]
fn test_invalid_values_are_rejected() {
    clean_env();
    env::set_var("TARGET_URL", "http://localhost:8080");

    env::set_var("THRESHOLDS", "not_a_metric=avg<1");
    assert!(matches!(Config::load(), Err(ConfigError::Threshold(_))));
    env::remove_var("THRESHOLDS");

    env::set_var("SEND_JSON", "true");
    assert!(matches!(Config::load(), Err(ConfigError::InvalidValue { .. })));
    env::set_var("JSON_PAYLOAD", "{not json");
    assert!(matches!(Config::load(), Err(ConfigError::InvalidValue { .. })));
    env::remove_var("SEND_JSON");
    env::remove_var("JSON_PAYLOAD");

    env::set_var("REQUEST_TYPE", "FETCH");
    assert!(matches!(Config::load(), Err(ConfigError::Validation(_))));
    env::remove_var("REQUEST_TYPE");

    env::set_var("STAGES", "0s:10");
    assert!(matches!(Config::load(), Err(ConfigError::Validation(_))));
    env::remove_var("STAGES");

    env::set_var("VUS", "0");
    assert!(matches!(Config::load(), Err(ConfigError::Validation(_))));

    println!("✅ Invalid environment values rejected");
}

#[test]
#[serial]
fn test_json_payload_sets_content_type() {
    clean_env();
    env::set_var("TARGET_URL", "http://localhost:8080/api");
    env::set_var("REQUEST_TYPE", "post");
    env::set_var("SEND_JSON", "true");
    env::set_var("JSON_PAYLOAD", r#"{"name":"croc"}"#);

    let config = Config::load().unwrap();
    let template = config.request_template().unwrap();

    assert_eq!(template.method, reqwest::Method::POST);
    assert_eq!(template.body.as_deref(), Some(r#"{"name":"croc"}"#));
    assert_eq!(template.headers["content-type"], "application/json");

    println!("✅ JSON payload configured with content type");
}

#[test]
#[serial]
fn test_config_file_takes_precedence_but_keeps_connection_env() {
    clean_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
version: "1.0"
target:
  url: https://yaml.example.com/
load:
  stages:
    - {{ duration: 1s, target: 5 }}
thresholds:
  http_req_failed: ["rate<0.05"]
"#
    )
    .unwrap();

    env::set_var("CONFIG_FILE", file.path());
    env::set_var("TARGET_URL", "https://env.example.com/");
    env::set_var("SKIP_TLS_VERIFY", "true");
    env::set_var("METRICS_PORT", "9191");

    let config = Config::load().unwrap();

    assert_eq!(config.target_url, "https://yaml.example.com/");
    assert_eq!(config.load_model.max_vus(), 5);
    assert!(config.skip_tls_verify);
    assert_eq!(config.metrics_port, 9191);

    println!("✅ CONFIG_FILE used with connection options from the environment");
}

#[test]
#[serial]
fn test_unreadable_config_file() {
    clean_env();
    env::set_var("CONFIG_FILE", "/definitely/not/here.yaml");
    assert!(matches!(Config::load(), Err(ConfigError::Yaml(_))));
    println!("✅ Missing CONFIG_FILE reported");
}
