//! Integration tests for the YAML test plans shipped in `demos/`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ramp_loadtest::checks::CheckKind;
use ramp_loadtest::load_models::LoadModel;
use ramp_loadtest::worker::ThinkTime;
use ramp_loadtest::yaml_config::{YamlConfig, YamlConfigError};

fn demo(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("demos").join(name)
}

#[test]
fn test_crocodiles_demo_loads() {
    let config = YamlConfig::from_file(demo("crocodiles.yaml"))
        .unwrap()
        .into_config()
        .unwrap();

    assert_eq!(config.target_url, "https://test-api.k6.io/public/crocodiles/");
    assert_eq!(config.load_model.total_duration(), Duration::from_secs(9));
    assert_eq!(config.load_model.max_vus(), 50);
    assert_eq!(config.load_model.target_vus_at(Duration::from_secs(1)), 5);
    assert_eq!(
        config.thresholds.sources_for("http_req_duration"),
        vec!["p(95)<500"]
    );
    assert_eq!(config.checks.len(), 2);
    assert_eq!(config.think_time, Some(ThinkTime::Fixed(Duration::from_secs(1))));
    assert_eq!(config.graceful_stop, Duration::from_secs(30));

    println!("✅ crocodiles.yaml loads");
}

#[test]
fn test_post_demo_loads() {
    let config = YamlConfig::from_file(demo("crocodiles_post.yaml"))
        .unwrap()
        .into_config()
        .unwrap();

    assert_eq!(config.request_type, "POST");
    assert!(matches!(config.load_model, LoadModel::ConstantVus { vus: 10, .. }));
    assert_eq!(config.request_headers["content-type"], "application/json");
    assert_eq!(config.request_headers["authorization"], "Bearer YOUR_TOKEN_HERE");

    let body: serde_json::Value =
        serde_json::from_str(config.json_payload.as_deref().unwrap()).unwrap();
    assert_eq!(body["date_of_birth"], "2020-01-01");

    assert_eq!(config.checks[0].name, "post status is 201");
    assert!(matches!(
        &config.checks[1].kind,
        CheckKind::JsonPath { path, expected: None } if path == "$.id"
    ));
    assert!(matches!(config.think_time, Some(ThinkTime::Random { .. })));

    println!("✅ crocodiles_post.yaml loads");
}

#[test]
fn test_missing_file() {
    assert!(matches!(
        YamlConfig::from_file("/definitely/not/here.yaml"),
        Err(YamlConfigError::FileRead(_))
    ));
    println!("✅ Missing YAML file reported");
}

#[test]
fn test_think_time_range_must_be_ordered() {
    let yaml = r#"
target: { url: "http://localhost" }
load: { vus: 1, duration: 1s }
thinkTime: { min: 3s, max: 1s }
"#;
    let err = YamlConfig::from_str(yaml).unwrap_err();
    assert!(err.to_string().contains("thinkTime"));
    println!("✅ Reversed think time range rejected");
}
