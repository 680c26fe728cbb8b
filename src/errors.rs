//! Error categorization for request failures.
//!
//! Every failed request is classified into an [`ErrorCategory`]. The category
//! feeds the Prometheus error counter and the `error_code` tag attached to
//! request samples in the results file.

use thiserror::Error;

/// Categories of errors that can occur during load testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// HTTP 4xx errors (client errors)
    ClientError,

    /// HTTP 5xx errors (server errors)
    ServerError,

    /// Network connectivity errors (DNS, connection refused, etc.)
    NetworkError,

    /// Request timeout errors
    TimeoutError,

    /// TLS/SSL certificate errors
    TlsError,

    /// Other/unknown errors
    OtherError,
}

impl ErrorCategory {
    /// Categorize an HTTP status code.
    ///
    /// Returns None for statuses inside the expected range (2xx/3xx).
    pub fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            200..=399 => None,
            400..=499 => Some(ErrorCategory::ClientError),
            500..=599 => Some(ErrorCategory::ServerError),
            _ => Some(ErrorCategory::OtherError),
        }
    }

    /// Categorize a transport-level reqwest error.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return ErrorCategory::TimeoutError;
        }
        if error.is_redirect() {
            return ErrorCategory::ClientError;
        }

        // reqwest folds TLS failures into connect errors, so look at the
        // message before trusting is_connect().
        let error_msg = format!("{:?}", error).to_lowercase();
        if error_msg.contains("certificate") || error_msg.contains("tls") {
            ErrorCategory::TlsError
        } else if error.is_connect()
            || error.is_request()
            || error.is_body()
            || error.is_decode()
            || error_msg.contains("dns")
            || error_msg.contains("connection")
        {
            ErrorCategory::NetworkError
        } else if error_msg.contains("timeout") {
            ErrorCategory::TimeoutError
        } else {
            ErrorCategory::OtherError
        }
    }

    /// Get the Prometheus label for this error category.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::OtherError => "other_error",
        }
    }

    /// Numeric error code attached to failed request samples.
    ///
    /// HTTP failures map into 1400-1599 (`1000 + status`); transport failures
    /// use fixed codes per category.
    pub fn error_code(&self, status_code: Option<u16>) -> u32 {
        match (self, status_code) {
            (ErrorCategory::ClientError, Some(status)) | (ErrorCategory::ServerError, Some(status)) => {
                1000 + status as u32
            }
            (ErrorCategory::ClientError, None) => 1400,
            (ErrorCategory::ServerError, None) => 1500,
            (ErrorCategory::TimeoutError, _) => 1050,
            (ErrorCategory::NetworkError, _) => 1200,
            (ErrorCategory::TlsError, _) => 1300,
            (ErrorCategory::OtherError, _) => 1000,
        }
    }
}

/// Fatal errors raised while running a load test.
#[derive(Error, Debug)]
pub enum LoadTestError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Results output failed: {0}")]
    Output(#[from] crate::output::OutputError),
}
