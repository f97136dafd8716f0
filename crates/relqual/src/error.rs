use std::fmt;

use thiserror::Error;

/// Maximum length for upstream error bodies kept in messages and logs.
const MAX_ERROR_BODY_LENGTH: usize = 200;

#[derive(Error, Debug)]
pub enum RelqualError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Environment variable '{name}' is not set")]
    MissingVar { name: &'static str },

    #[error("Invalid value for '{name}': {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// External service an upstream error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Jenkins,
    Dashboard,
    Jira,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Jenkins => write!(f, "Jenkins"),
            Service::Dashboard => write!(f, "Dashboard"),
            Service::Jira => write!(f, "Jira"),
        }
    }
}

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("{service} request failed: {source}")]
    Request {
        service: Service,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned status {status}: {body}")]
    Status {
        service: Service,
        status: u16,
        body: String,
    },

    /// The service answered with an HTML error page instead of an API response.
    #[error("{service} Internal Server Error (status {status})")]
    InternalServerError { service: Service, status: u16 },

    #[error("{service} returned a malformed response: {reason}")]
    Malformed { service: Service, reason: String },
}

impl UpstreamError {
    /// Builds a status error, classifying HTML error pages separately.
    pub fn from_status(service: Service, status: u16, body: &str) -> Self {
        if is_html_error_page(body) {
            UpstreamError::InternalServerError { service, status }
        } else {
            UpstreamError::Status {
                service,
                status,
                body: truncate_body(body),
            }
        }
    }

    pub fn request(service: Service, source: reqwest::Error) -> Self {
        UpstreamError::Request { service, source }
    }

    pub fn malformed(service: Service, reason: impl Into<String>) -> Self {
        UpstreamError::Malformed {
            service,
            reason: reason.into(),
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { status, .. }
            | UpstreamError::InternalServerError { status, .. } => Some(*status),
            UpstreamError::Request { source, .. } => source.status().map(|s| s.as_u16()),
            UpstreamError::Malformed { .. } => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No releases provided.")]
    EmptyBatch,

    #[error("All selected models must share the same release target (found: {targets})")]
    MixedReleaseTargets { targets: String },

    #[error("Invalid release id '{0}': must be in the format rXXXX")]
    InvalidReleaseId(String),

    #[error("Model '{model}' is missing required field '{field}'")]
    MissingField { model: String, field: &'static str },

    #[error("Model '{model}' needs either an MIQ branch or a profile")]
    MissingProfile { model: String },
}

/// Returns true when a response body is an HTML document rather than an API payload.
pub fn is_html_error_page(body: &str) -> bool {
    body.trim_start()
        .get(..15)
        .map(|head| head.eq_ignore_ascii_case("<!doctype html>"))
        .unwrap_or(false)
        || body.contains("<!DOCTYPE html")
}

/// Truncates an upstream response body to a bounded length.
pub fn truncate_body(body: &str) -> String {
    let body = body.trim();
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}

pub type Result<T> = std::result::Result<T, RelqualError>;
