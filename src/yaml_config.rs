//! YAML configuration file support.
//!
//! A YAML test plan is an alternative to environment variables: one target,
//! a load schedule, thresholds and checks in a version-controlled file.
//! Every field error is collected before reporting, with its dotted path.

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;
use thiserror::Error;

use crate::checks::{validate_json_path, Check, CheckKind};
use crate::config::{
    header_map, Config, DEFAULT_GRACEFUL_STOP, DEFAULT_METRICS_PORT, DEFAULT_REQUEST_TIMEOUT,
};
use crate::config_validation::{
    HttpMethodValidator, RangeValidator, StagesValidator, UrlValidator, ValidationContext,
    MAX_VUS,
};
use crate::load_models::{LoadModel, Stage};
use crate::thresholds::ThresholdSet;
use crate::worker::ThinkTime;

/// Config file versions this build understands.
pub const SUPPORTED_VERSIONS: &[&str] = &["1.0"];

/// Errors that can occur when loading or parsing YAML configuration.
#[derive(Error, Debug)]
pub enum YamlConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Duration format for YAML (e.g., 30, "30s", "1m30s").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum YamlDuration {
    Seconds(u64),
    String(String),
}

impl YamlDuration {
    pub fn to_std_duration(&self) -> Result<StdDuration, YamlConfigError> {
        match self {
            YamlDuration::Seconds(s) => Ok(StdDuration::from_secs(*s)),
            YamlDuration::String(s) => crate::utils::parse_duration_string(s).map_err(|e| {
                YamlConfigError::Validation(format!("Invalid duration '{}': {}", s, e))
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlTarget {
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    /// A string is sent as-is; any other value is sent as JSON.
    pub body: Option<serde_json::Value>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    pub timeout: Option<YamlDuration>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlStage {
    pub duration: YamlDuration,
    pub target: u64,
}

/// Either a list of stages or a constant VU count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum YamlLoad {
    Staged {
        stages: Vec<YamlStage>,
        #[serde(rename = "startVus", default)]
        start_vus: u64,
    },
    Constant {
        vus: u64,
        duration: YamlDuration,
    },
}

impl YamlLoad {
    pub fn to_load_model(&self) -> Result<LoadModel, YamlConfigError> {
        match self {
            YamlLoad::Staged { stages, start_vus } => {
                let stages = stages
                    .iter()
                    .map(|s| Ok(Stage::new(s.duration.to_std_duration()?, s.target)))
                    .collect::<Result<Vec<_>, YamlConfigError>>()?;
                Ok(LoadModel::RampingVus {
                    start_vus: *start_vus,
                    stages,
                })
            }
            YamlLoad::Constant { vus, duration } => Ok(LoadModel::ConstantVus {
                vus: *vus,
                duration: duration.to_std_duration()?,
            }),
        }
    }
}

/// A response check. `name` defaults to a description of the check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum YamlCheck {
    StatusCode {
        name: Option<String>,
        expected: u16,
    },
    ResponseTime {
        name: Option<String>,
        max: YamlDuration,
    },
    BodyContains {
        name: Option<String>,
        text: String,
    },
    BodyMatches {
        name: Option<String>,
        pattern: String,
    },
    HeaderExists {
        name: Option<String>,
        header: String,
    },
    JsonPath {
        name: Option<String>,
        path: String,
        expected: Option<serde_json::Value>,
    },
}

impl YamlCheck {
    pub fn to_check(&self) -> Result<Check, YamlConfigError> {
        let invalid = |e: String| YamlConfigError::Validation(e);

        let check = match self {
            YamlCheck::StatusCode { name, expected } => {
                with_name(Check::status_is(*expected), name)
            }
            YamlCheck::ResponseTime { name, max } => {
                with_name(Check::response_time_below(max.to_std_duration()?), name)
            }
            YamlCheck::BodyContains { name, text } => Check::new(
                name.clone()
                    .unwrap_or_else(|| format!("body contains '{}'", text)),
                CheckKind::BodyContains(text.clone()),
            ),
            YamlCheck::BodyMatches { name, pattern } => Check::body_matches(
                name.clone()
                    .unwrap_or_else(|| format!("body matches /{}/", pattern)),
                pattern,
            )
            .map_err(|e| invalid(format!("Invalid regex '{}': {}", pattern, e)))?,
            YamlCheck::HeaderExists { name, header } => Check::new(
                name.clone()
                    .unwrap_or_else(|| format!("header {} exists", header)),
                CheckKind::HeaderExists(header.clone()),
            ),
            YamlCheck::JsonPath {
                name,
                path,
                expected,
            } => {
                validate_json_path(path).map_err(invalid)?;
                let expected = expected.as_ref().map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
                let default_name = match &expected {
                    Some(e) => format!("{} is {}", path, e),
                    None => format!("{} exists", path),
                };
                Check::new(
                    name.clone().unwrap_or(default_name),
                    CheckKind::JsonPath {
                        path: path.clone(),
                        expected,
                    },
                )
            }
        };
        Ok(check)
    }
}

fn with_name(mut check: Check, name: &Option<String>) -> Check {
    if let Some(name) = name {
        check.name = name.clone();
    }
    check
}

/// Think time as a fixed duration or a `{min, max}` range.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum YamlThinkTime {
    Fixed(YamlDuration),
    Random { min: YamlDuration, max: YamlDuration },
}

impl YamlThinkTime {
    pub fn to_think_time(&self) -> Result<Option<ThinkTime>, YamlConfigError> {
        match self {
            YamlThinkTime::Fixed(d) => {
                let d = d.to_std_duration()?;
                Ok((!d.is_zero()).then_some(ThinkTime::Fixed(d)))
            }
            YamlThinkTime::Random { min, max } => {
                let (min, max) = (min.to_std_duration()?, max.to_std_duration()?);
                if max < min {
                    return Err(YamlConfigError::Validation(
                        "thinkTime max must not be below min".to_string(),
                    ));
                }
                Ok((!max.is_zero()).then_some(ThinkTime::Random { min, max }))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct YamlOutput {
    #[serde(rename = "resultsFile")]
    pub results_file: Option<PathBuf>,
}

/// Root of a YAML test plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlConfig {
    #[serde(default = "default_version")]
    pub version: String,

    pub target: YamlTarget,

    pub load: YamlLoad,

    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub checks: Vec<YamlCheck>,

    #[serde(rename = "thinkTime")]
    pub think_time: Option<YamlThinkTime>,

    #[serde(rename = "gracefulStop")]
    pub graceful_stop: Option<YamlDuration>,

    #[serde(default)]
    pub output: YamlOutput,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl YamlConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, YamlConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse and validate configuration from a YAML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, YamlConfigError> {
        let config: YamlConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), YamlConfigError> {
        let mut ctx = ValidationContext::new();

        ctx.enter("version");
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            ctx.field_error(format!(
                "unsupported version '{}', expected one of: {}",
                self.version,
                SUPPORTED_VERSIONS.join(", ")
            ));
        }
        ctx.exit();

        ctx.enter("target");
        ctx.enter("url");
        ctx.check(UrlValidator::validate(&self.target.url));
        ctx.exit();
        ctx.enter("method");
        ctx.check(HttpMethodValidator::validate(&self.target.method));
        ctx.exit();
        ctx.enter("headers");
        if let Err(e) = header_map(&self.target.headers) {
            ctx.field_error(e);
        }
        ctx.exit();
        if let Some(timeout) = &self.target.timeout {
            ctx.enter("timeout");
            match timeout.to_std_duration() {
                Ok(d) if d.is_zero() => ctx.field_error("must be greater than zero".to_string()),
                Ok(_) => {}
                Err(e) => ctx.field_error(e.to_string()),
            }
            ctx.exit();
        }
        ctx.exit(); // target

        ctx.enter("load");
        match self.load.to_load_model() {
            Ok(LoadModel::RampingVus { start_vus, stages }) => {
                ctx.check(RangeValidator::validate_u64(start_vus, 0, MAX_VUS, "startVus"));
                ctx.check(StagesValidator::validate(&stages));
            }
            Ok(LoadModel::ConstantVus { vus, duration }) => {
                ctx.check(RangeValidator::validate_u64(vus, 1, MAX_VUS, "vus"));
                if duration.is_zero() {
                    ctx.field_error("duration must be greater than zero".to_string());
                }
            }
            Err(e) => ctx.field_error(e.to_string()),
        }
        ctx.exit(); // load

        ctx.enter("thresholds");
        for (metric, exprs) in &self.thresholds {
            ctx.enter(metric);
            let single = BTreeMap::from([(metric.clone(), exprs.clone())]);
            if let Err(e) = ThresholdSet::parse(&single) {
                ctx.field_error(e.to_string());
            }
            ctx.exit();
        }
        ctx.exit();

        ctx.enter("checks");
        for (idx, check) in self.checks.iter().enumerate() {
            ctx.enter(&format!("[{}]", idx));
            if let Err(e) = check.to_check() {
                ctx.field_error(e.to_string());
            }
            ctx.exit();
        }
        ctx.exit();

        if let Some(think_time) = &self.think_time {
            ctx.enter("thinkTime");
            if let Err(e) = think_time.to_think_time() {
                ctx.field_error(e.to_string());
            }
            ctx.exit();
        }

        if let Some(graceful_stop) = &self.graceful_stop {
            ctx.enter("gracefulStop");
            if let Err(e) = graceful_stop.to_std_duration() {
                ctx.field_error(e.to_string());
            }
            ctx.exit();
        }

        ctx.into_result()
            .map_err(|e| YamlConfigError::Validation(e.to_string()))
    }

    /// Convert into the runtime configuration.
    pub fn into_config(self) -> Result<Config, YamlConfigError> {
        let mut request_headers =
            header_map(&self.target.headers).map_err(YamlConfigError::Validation)?;

        let json_payload = match &self.target.body {
            None => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(value) => {
                if !request_headers.contains_key(CONTENT_TYPE) {
                    request_headers
                        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                }
                Some(value.to_string())
            }
        };

        let thresholds = ThresholdSet::parse(&self.thresholds)
            .map_err(|e| YamlConfigError::Validation(e.to_string()))?;

        let checks = self
            .checks
            .iter()
            .map(YamlCheck::to_check)
            .collect::<Result<Vec<_>, _>>()?;

        let think_time = match &self.think_time {
            Some(t) => t.to_think_time()?,
            None => None,
        };

        let request_timeout = match &self.target.timeout {
            Some(t) => t.to_std_duration()?,
            None => DEFAULT_REQUEST_TIMEOUT,
        };
        let graceful_stop = match &self.graceful_stop {
            Some(d) => d.to_std_duration()?,
            None => DEFAULT_GRACEFUL_STOP,
        };

        Ok(Config {
            target_url: self.target.url.clone(),
            request_type: self.target.method.to_uppercase(),
            json_payload,
            request_headers,
            load_model: self.load.to_load_model()?,
            thresholds,
            checks,
            think_time,
            request_timeout,
            graceful_stop,
            results_file: self.output.results_file,
            metrics_port: DEFAULT_METRICS_PORT,
            skip_tls_verify: false,
            resolve_target_addr: None,
            client_cert_path: None,
            client_key_path: None,
            custom_headers: None,
        })
    }
}
