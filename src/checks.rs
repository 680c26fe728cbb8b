//! Named response checks.
//!
//! A check is a boolean assertion over one response. Failing a check never
//! aborts the iteration; results are recorded into the `checks` rate metric
//! and, per iteration, into the `errors` rate.

use regex::Regex;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors describing why a check did not hold.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CheckError {
    #[error("Status code mismatch: expected {expected}, got {actual}")]
    StatusCodeMismatch { expected: u16, actual: u16 },

    #[error("Response time {actual_ms:.2}ms is not below {limit_ms}ms")]
    ResponseTimeTooSlow { actual_ms: f64, limit_ms: u128 },

    #[error("Body does not contain expected substring: {0}")]
    BodyNotContains(String),

    #[error("Body does not match regex: {0}")]
    BodyNotMatches(String),

    #[error("Header '{0}' not found in response")]
    HeaderNotFound(String),

    #[error("JSONPath check failed: {0}")]
    JsonPathFailed(String),

    #[error("No response received")]
    NoResponse,
}

/// What a check asserts.
#[derive(Debug, Clone)]
pub enum CheckKind {
    StatusIs(u16),
    ResponseTimeBelow(Duration),
    BodyContains(String),
    BodyMatches(Regex),
    HeaderExists(String),
    JsonPath {
        path: String,
        expected: Option<String>,
    },
}

/// A check with the name it is reported under.
#[derive(Debug, Clone)]
pub struct Check {
    pub name: String,
    pub kind: CheckKind,
}

/// The parts of a response that checks look at.
#[derive(Debug, Clone, Copy)]
pub struct CheckResponse<'a> {
    /// None when the request failed before a response arrived.
    pub status: Option<u16>,
    pub duration: Duration,
    pub body: &'a str,
    pub headers: Option<&'a reqwest::header::HeaderMap>,
}

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub error: Option<CheckError>,
}

impl Check {
    pub fn new(name: impl Into<String>, kind: CheckKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// "status is 200"
    pub fn status_is(expected: u16) -> Self {
        Self::new(format!("status is {}", expected), CheckKind::StatusIs(expected))
    }

    /// "response time < 200ms"
    pub fn response_time_below(limit: Duration) -> Self {
        Self::new(
            format!("response time < {}ms", limit.as_millis()),
            CheckKind::ResponseTimeBelow(limit),
        )
    }

    pub fn body_matches(name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::new(name, CheckKind::BodyMatches(Regex::new(pattern)?)))
    }

    /// Whether the response body must be buffered to evaluate this check.
    pub fn needs_body(&self) -> bool {
        matches!(
            self.kind,
            CheckKind::BodyContains(_) | CheckKind::BodyMatches(_) | CheckKind::JsonPath { .. }
        )
    }

    pub fn evaluate(&self, response: &CheckResponse<'_>) -> Result<(), CheckError> {
        match &self.kind {
            CheckKind::ResponseTimeBelow(limit) => {
                if response.duration < *limit {
                    Ok(())
                } else {
                    Err(CheckError::ResponseTimeTooSlow {
                        actual_ms: response.duration.as_secs_f64() * 1000.0,
                        limit_ms: limit.as_millis(),
                    })
                }
            }
            _ if response.status.is_none() => Err(CheckError::NoResponse),
            CheckKind::StatusIs(expected) => {
                let actual = response.status.unwrap_or_default();
                if actual == *expected {
                    Ok(())
                } else {
                    Err(CheckError::StatusCodeMismatch {
                        expected: *expected,
                        actual,
                    })
                }
            }
            CheckKind::BodyContains(substring) => {
                if response.body.contains(substring.as_str()) {
                    Ok(())
                } else {
                    Err(CheckError::BodyNotContains(substring.clone()))
                }
            }
            CheckKind::BodyMatches(re) => {
                if re.is_match(response.body) {
                    Ok(())
                } else {
                    Err(CheckError::BodyNotMatches(re.as_str().to_string()))
                }
            }
            CheckKind::HeaderExists(name) => {
                if response
                    .headers
                    .map(|h| h.contains_key(name.as_str()))
                    .unwrap_or(false)
                {
                    Ok(())
                } else {
                    Err(CheckError::HeaderNotFound(name.clone()))
                }
            }
            CheckKind::JsonPath { path, expected } => {
                check_json_path(response.body, path, expected.as_deref())
            }
        }
    }
}

/// Validate a JSONPath expression up front so config errors surface early.
pub fn validate_json_path(path: &str) -> Result<(), String> {
    serde_json_path::JsonPath::parse(path)
        .map(|_| ())
        .map_err(|e| format!("Invalid JSONPath '{}': {}", path, e))
}

fn check_json_path(body: &str, path: &str, expected: Option<&str>) -> Result<(), CheckError> {
    use serde_json_path::JsonPath;

    let json: Value = serde_json::from_str(body)
        .map_err(|e| CheckError::JsonPathFailed(format!("body is not JSON: {}", e)))?;
    let json_path = JsonPath::parse(path).map_err(|e| {
        CheckError::JsonPathFailed(format!("Invalid JSONPath '{}': {}", path, e))
    })?;

    let value = json_path
        .query(&json)
        .first()
        .ok_or_else(|| CheckError::JsonPathFailed(format!("'{}' matched nothing", path)))?;

    let Some(expected) = expected else {
        return Ok(());
    };

    let actual = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if actual == expected {
        Ok(())
    } else {
        Err(CheckError::JsonPathFailed(format!(
            "'{}' expected '{}', got '{}'",
            path, expected, actual
        )))
    }
}

/// Run every check against a response.
pub fn run_checks(checks: &[Check], response: &CheckResponse<'_>) -> Vec<CheckResult> {
    checks
        .iter()
        .map(|check| match check.evaluate(response) {
            Ok(()) => CheckResult {
                name: check.name.clone(),
                passed: true,
                error: None,
            },
            Err(e) => {
                debug!(check = %check.name, error = %e, "Check failed");
                CheckResult {
                    name: check.name.clone(),
                    passed: false,
                    error: Some(e),
                }
            }
        })
        .collect()
}
