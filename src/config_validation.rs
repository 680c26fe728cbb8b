//! Field-level configuration validation.
//!
//! Validators return a [`ValidationError`] naming the offending field;
//! [`ValidationContext`] collects them with a dotted field path so a YAML
//! file with several mistakes reports all of them at once.

use thiserror::Error;

use crate::load_models::Stage;

/// Validation error with context about which field failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Field '{field}': {message}")]
    FieldError { field: String, message: String },

    #[error("Field '{field}': value {value} is out of range ({min} to {max})")]
    OutOfRange {
        field: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Field '{field}': invalid format - {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}': invalid enum value '{value}'. Expected one of: {expected}")]
    InvalidEnum {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Multiple validation errors: {0}")]
    Multiple(String),
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Collects errors while walking a nested configuration.
#[derive(Debug, Default)]
pub struct ValidationContext {
    field_path: Vec<String>,
    errors: Vec<ValidationError>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&mut self, field: &str) {
        self.field_path.push(field.to_string());
    }

    pub fn exit(&mut self) {
        self.field_path.pop();
    }

    pub fn current_path(&self) -> String {
        self.field_path.join(".")
    }

    /// Record an error message against the current field path.
    pub fn field_error(&mut self, message: String) {
        self.errors.push(ValidationError::FieldError {
            field: self.current_path(),
            message,
        });
    }

    /// Record the error of a failed validator, if any.
    pub fn check(&mut self, result: ValidationResult<()>) {
        if let Err(e) = result {
            self.field_error(e.to_string());
        }
    }

    pub fn into_result(mut self) -> ValidationResult<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => {
                let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
                Err(ValidationError::Multiple(messages.join("; ")))
            }
        }
    }
}

pub struct UrlValidator;

impl UrlValidator {
    pub fn validate(url: &str) -> ValidationResult<()> {
        let invalid = |message: String| ValidationError::InvalidFormat {
            field: "url".to_string(),
            message,
        };

        if url.is_empty() {
            return Err(invalid("URL cannot be empty".to_string()));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(invalid(format!(
                "URL must start with http:// or https://, got: {}",
                url
            )));
        }
        if url.contains(' ') {
            return Err(invalid("URL cannot contain spaces".to_string()));
        }
        Ok(())
    }
}

pub struct RangeValidator;

impl RangeValidator {
    pub fn validate_u64(value: u64, min: u64, max: u64, field: &str) -> ValidationResult<()> {
        if value < min || value > max {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value: value.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(())
    }
}

pub struct HttpMethodValidator;

impl HttpMethodValidator {
    pub const VALID_METHODS: &'static [&'static str] =
        &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

    pub fn validate(method: &str) -> ValidationResult<()> {
        let method_upper = method.to_uppercase();
        if !Self::VALID_METHODS.contains(&method_upper.as_str()) {
            return Err(ValidationError::InvalidEnum {
                field: "method".to_string(),
                value: method.to_string(),
                expected: Self::VALID_METHODS.join(", "),
            });
        }
        Ok(())
    }
}

/// Upper bound on VUs accepted from configuration.
pub const MAX_VUS: u64 = 100_000;

pub struct StagesValidator;

impl StagesValidator {
    /// A staged schedule needs at least one stage, a non-zero total length,
    /// and targets within [`MAX_VUS`].
    pub fn validate(stages: &[Stage]) -> ValidationResult<()> {
        if stages.is_empty() {
            return Err(ValidationError::FieldError {
                field: "stages".to_string(),
                message: "at least one stage is required".to_string(),
            });
        }

        for (idx, stage) in stages.iter().enumerate() {
            RangeValidator::validate_u64(stage.target, 0, MAX_VUS, &format!("stages[{}].target", idx))?;
        }

        if stages.iter().all(|s| s.duration.is_zero()) {
            return Err(ValidationError::FieldError {
                field: "stages".to_string(),
                message: "total stage duration must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}
