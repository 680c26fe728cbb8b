use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tokio::time::Duration;
use tracing::info;

use crate::checks::Check;
use crate::client::ClientConfig;
use crate::config_validation::{
    HttpMethodValidator, RangeValidator, StagesValidator, UrlValidator, ValidationError, MAX_VUS,
};
use crate::load_models::{LoadModel, Stage};
use crate::thresholds::{ThresholdError, ThresholdSet};
use crate::utils::{format_duration, parse_duration_string};
use crate::worker::{RequestTemplate, ThinkTime};
use crate::yaml_config::{YamlConfig, YamlConfigError};

pub const DEFAULT_METRICS_PORT: u16 = 9090;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} environment variable must be set")]
    MissingEnvVar(&'static str),

    #[error("Invalid {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Threshold(#[from] ThresholdError),

    #[error(transparent)]
    Yaml(#[from] YamlConfigError),
}

impl ConfigError {
    fn invalid(var: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            var: var.to_string(),
            message: message.into(),
        }
    }
}

/// Main configuration for the load test.
#[derive(Debug, Clone)]
pub struct Config {
    pub target_url: String,
    pub request_type: String,
    pub json_payload: Option<String>,
    /// Headers sent with every request, on top of the client defaults.
    pub request_headers: HeaderMap,
    pub load_model: LoadModel,
    pub thresholds: ThresholdSet,
    pub checks: Vec<Check>,
    pub think_time: Option<ThinkTime>,
    pub request_timeout: Duration,
    pub graceful_stop: Duration,
    pub results_file: Option<PathBuf>,
    pub metrics_port: u16,
    pub skip_tls_verify: bool,
    pub resolve_target_addr: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub custom_headers: Option<String>,
}

impl Config {
    /// Loads the YAML file named by `CONFIG_FILE`, or falls back to
    /// environment variables.
    ///
    /// Connection options (TLS, DNS override, custom headers, metrics port)
    /// are always read from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match env::var("CONFIG_FILE") {
            Ok(path) if !path.trim().is_empty() => {
                info!(path = %path, "Loading YAML configuration");
                YamlConfig::from_file(path.trim())?.into_config()?
            }
            _ => Self::from_env()?,
        };
        config.apply_connection_env()?;
        Ok(config)
    }

    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let target_url = env::var("TARGET_URL")
            .map_err(|_| ConfigError::MissingEnvVar("TARGET_URL"))?
            .trim()
            .to_string();
        UrlValidator::validate(&target_url)?;

        let request_type = env_or("REQUEST_TYPE", "GET").to_uppercase();
        HttpMethodValidator::validate(&request_type)?;

        let mut request_headers = HeaderMap::new();
        let json_payload = if env_bool("SEND_JSON") {
            let payload = env::var("JSON_PAYLOAD").map_err(|_| {
                ConfigError::invalid("JSON_PAYLOAD", "must be set when SEND_JSON=true")
            })?;
            serde_json::from_str::<serde_json::Value>(&payload)
                .map_err(|e| ConfigError::invalid("JSON_PAYLOAD", e.to_string()))?;
            request_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            Some(payload)
        } else {
            None
        };

        let load_model = Self::parse_load_model()?;

        let thresholds = match env::var("THRESHOLDS") {
            Ok(raw) if !raw.trim().is_empty() => {
                let parsed = parse_thresholds(&raw).map_err(|e| ConfigError::invalid("THRESHOLDS", e))?;
                ThresholdSet::parse(&parsed)?
            }
            _ => ThresholdSet::default(),
        };

        let mut checks = Vec::new();
        if let Ok(status) = env::var("CHECK_STATUS") {
            let status: u16 = status
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid("CHECK_STATUS", format!("'{}' is not a status code", status)))?;
            checks.push(Check::status_is(status));
        }
        if let Ok(raw) = env::var("CHECK_MAX_RESPONSE_TIME") {
            let limit = parse_duration_string(&raw)
                .map_err(|e| ConfigError::invalid("CHECK_MAX_RESPONSE_TIME", e))?;
            checks.push(Check::response_time_below(limit));
        }

        let think_time = match env::var("THINK_TIME") {
            Ok(raw) => parse_think_time(&raw).map_err(|e| ConfigError::invalid("THINK_TIME", e))?,
            Err(_) => None,
        };

        let request_timeout = env_duration("REQUEST_TIMEOUT", DEFAULT_REQUEST_TIMEOUT)?;
        let graceful_stop = env_duration("GRACEFUL_STOP", DEFAULT_GRACEFUL_STOP)?;

        let results_file = env::var("RESULTS_FILE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Config {
            target_url,
            request_type,
            json_payload,
            request_headers,
            load_model,
            thresholds,
            checks,
            think_time,
            request_timeout,
            graceful_stop,
            results_file,
            metrics_port: DEFAULT_METRICS_PORT,
            skip_tls_verify: false,
            resolve_target_addr: None,
            client_cert_path: None,
            client_key_path: None,
            custom_headers: None,
        })
    }

    /// `STAGES` selects a ramping schedule; otherwise `VUS` run for
    /// `TEST_DURATION`.
    fn parse_load_model() -> Result<LoadModel, ConfigError> {
        if let Ok(raw) = env::var("STAGES") {
            if !raw.trim().is_empty() {
                let stages = parse_stages(&raw).map_err(|e| ConfigError::invalid("STAGES", e))?;
                StagesValidator::validate(&stages)?;

                let start_vus: u64 = env_or("START_VUS", "0")
                    .parse()
                    .map_err(|_| ConfigError::invalid("START_VUS", "must be a valid number"))?;
                RangeValidator::validate_u64(start_vus, 0, MAX_VUS, "START_VUS")?;

                return Ok(LoadModel::RampingVus { start_vus, stages });
            }
        }

        let vus: u64 = env_or("VUS", "10")
            .parse()
            .map_err(|_| ConfigError::invalid("VUS", "must be a valid number"))?;
        RangeValidator::validate_u64(vus, 1, MAX_VUS, "VUS")?;

        let duration = env_duration("TEST_DURATION", Duration::from_secs(30))?;
        if duration.is_zero() {
            return Err(ConfigError::invalid("TEST_DURATION", "must be greater than zero"));
        }

        Ok(LoadModel::ConstantVus { vus, duration })
    }

    fn apply_connection_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(port) = env::var("METRICS_PORT") {
            self.metrics_port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid("METRICS_PORT", format!("'{}' is not a port", port)))?;
        }
        self.skip_tls_verify = env_bool("SKIP_TLS_VERIFY");
        self.resolve_target_addr = env::var("RESOLVE_TARGET_ADDR").ok();
        self.client_cert_path = env::var("CLIENT_CERT_PATH").ok();
        self.client_key_path = env::var("CLIENT_KEY_PATH").ok();
        self.custom_headers = env::var("CUSTOM_HEADERS").ok();
        Ok(())
    }

    /// Creates a ClientConfig from this Config.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            skip_tls_verify: self.skip_tls_verify,
            resolve_target_addr: self.resolve_target_addr.clone(),
            client_cert_path: self.client_cert_path.clone(),
            client_key_path: self.client_key_path.clone(),
            custom_headers: self.custom_headers.clone(),
            request_timeout: Some(self.request_timeout),
        }
    }

    /// The request every VU iteration sends.
    pub fn request_template(&self) -> Result<RequestTemplate, ConfigError> {
        let method = reqwest::Method::from_str(&self.request_type)
            .map_err(|e| ConfigError::invalid("REQUEST_TYPE", e.to_string()))?;
        Ok(RequestTemplate {
            method,
            url: self.target_url.clone(),
            body: self.json_payload.clone(),
            headers: self.request_headers.clone(),
        })
    }

    /// Prints the configuration summary.
    pub fn print_summary(&self, parsed_headers: &HeaderMap) {
        println!("Starting load test:");
        println!("  Target URL: {}", self.target_url);
        println!("  Request type: {}", self.request_type);
        match &self.load_model {
            LoadModel::ConstantVus { vus, duration } => {
                println!("  Load Model: {} VUs for {}", vus, format_duration(*duration));
            }
            LoadModel::RampingVus { start_vus, stages } => {
                println!(
                    "  Load Model: {} stages, start {} VUs, max {} VUs, total {}",
                    stages.len(),
                    start_vus,
                    self.load_model.max_vus(),
                    format_duration(self.load_model.total_duration())
                );
                for (idx, stage) in stages.iter().enumerate() {
                    println!(
                        "    stage {}: {} -> {} VUs",
                        idx + 1,
                        format_duration(stage.duration),
                        stage.target
                    );
                }
            }
        }
        if let Some(think_time) = &self.think_time {
            println!("  Think time: {}", describe_think_time(think_time));
        }
        println!("  Request timeout: {}", format_duration(self.request_timeout));
        println!("  Graceful stop: {}", format_duration(self.graceful_stop));

        for (metric, thresholds) in self.thresholds.iter() {
            let sources: Vec<&str> = thresholds.iter().map(|t| t.source.as_str()).collect();
            println!("  Threshold: {} {}", metric, sources.join(", "));
        }
        for check in &self.checks {
            println!("  Check: {}", check.name);
        }
        if let Some(path) = &self.results_file {
            println!("  Results file: {}", path.display());
        }
        println!("  Skip TLS Verify: {}", self.skip_tls_verify);

        if self.client_cert_path.is_some() && self.client_key_path.is_some() {
            println!("  mTLS Enabled: Yes (using CLIENT_CERT_PATH and CLIENT_KEY_PATH)");
        } else {
            println!("  mTLS Enabled: No");
        }

        if parsed_headers.is_empty() {
            println!("  Custom Headers Enabled: No");
        } else {
            println!("  Custom Headers Enabled: Yes");
            for (name, value) in parsed_headers.iter() {
                println!(
                    "    {}: {}",
                    name,
                    value.to_str().unwrap_or("<non-ASCII or sensitive value>")
                );
            }
        }
    }
}

fn describe_think_time(think_time: &ThinkTime) -> String {
    match think_time {
        ThinkTime::Fixed(d) => format_duration(*d),
        ThinkTime::Random { min, max } => {
            format!("{} - {}", format_duration(*min), format_duration(*max))
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_bool(name: &str) -> bool {
    env::var(name)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn env_duration(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(raw) => parse_duration_string(&raw)
            .map_err(|e| ConfigError::invalid(name, format!("'{}'. {}", raw, e))),
        Err(_) => Ok(default),
    }
}

/// Parses `2s:10,2s:10,2s:50,3s:0` into stages.
pub fn parse_stages(s: &str) -> Result<Vec<Stage>, String> {
    let mut stages = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (duration, target) = part
            .split_once(':')
            .ok_or_else(|| format!("stage '{}' is not in 'duration:target' form", part))?;
        let duration = parse_duration_string(duration.trim())?;
        let target: u64 = target
            .trim()
            .parse()
            .map_err(|_| format!("invalid target '{}' in stage '{}'", target.trim(), part))?;
        stages.push(Stage::new(duration, target));
    }
    if stages.is_empty() {
        return Err("no stages given".to_string());
    }
    Ok(stages)
}

/// Parses `metric=expr,expr;metric=expr` into raw threshold expressions.
pub fn parse_thresholds(s: &str) -> Result<BTreeMap<String, Vec<String>>, String> {
    let mut raw: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in s.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (metric, list) = entry
            .split_once('=')
            .ok_or_else(|| format!("'{}' is not in 'metric=expression' form", entry))?;
        let metric = metric.trim();
        if metric.is_empty() {
            return Err(format!("missing metric name in '{}'", entry));
        }
        let exprs = raw.entry(metric.to_string()).or_default();
        exprs.extend(
            list.split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string),
        );
        if exprs.is_empty() {
            return Err(format!("no expressions for metric '{}'", metric));
        }
    }
    Ok(raw)
}

/// Parses `1s` (fixed) or `1s-3s` (random range). Zero means no think time.
pub fn parse_think_time(s: &str) -> Result<Option<ThinkTime>, String> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }

    if let Some((min, max)) = s.split_once('-') {
        let min = parse_duration_string(min.trim())?;
        let max = parse_duration_string(max.trim())?;
        if max < min {
            return Err(format!("maximum is below minimum in '{}'", s));
        }
        if max.is_zero() {
            return Ok(None);
        }
        return Ok(Some(ThinkTime::Random { min, max }));
    }

    let fixed = parse_duration_string(s)?;
    Ok((!fixed.is_zero()).then_some(ThinkTime::Fixed(fixed)))
}

/// Converts a string map into request headers.
pub fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, String> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_str(name.trim())
            .map_err(|e| format!("Invalid header name '{}': {}", name, e))?;
        let header_value = HeaderValue::from_str(value.trim())
            .map_err(|e| format!("Invalid header value for '{}': {}", name, e))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}
