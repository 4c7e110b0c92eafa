//! Error types
//!
//! Every failure the client surfaces maps onto one [`CfError`] variant so
//! callers can branch on the kind (not found, conflict, auth, transient...)
//! without parsing messages.

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Result type alias using `CfError`.
pub type CfResult<T> = Result<T, CfError>;

/// Errors that can occur when talking to the Cloud Controller or UAA.
#[derive(Debug, Error)]
pub enum CfError {
    /// The requested resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The provider rejected a write because of a conflicting resource.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The provider rejected a request as invalid.
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// The provider returned 401/403 for a resource call.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The authorization endpoint refused to issue a token.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// More than one result where at most one was expected.
    #[error("Ambiguous result: {0}")]
    Ambiguous(String),

    /// 429/5xx or timeout-class failure, eligible for caller-level retry.
    #[error("Transient failure ({status}): {message}")]
    Transient { status: u16, message: String },

    /// Any other non-success provider response.
    #[error("Cloud Controller error {status} {code}: {description}")]
    Provider {
        status: u16,
        code: String,
        description: String,
    },

    /// A required field was missing or unparseable in a raw record.
    #[error("Malformed {kind} record: {reason}")]
    MalformedRecord { kind: &'static str, reason: String },

    /// Client configuration is incomplete or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error details extracted from a Cloud Controller error body.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ErrorBody {
    pub code: String,
    pub description: String,
}

impl ErrorBody {
    /// Parse both body shapes:
    /// V2 `{"code": 10010, "description": "...", "error_code": "CF-..."}`
    /// V3 `{"errors": [{"code": 10010, "title": "CF-...", "detail": "..."}]}`
    pub(crate) fn parse(body: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(body) else {
            return Self {
                code: String::new(),
                description: body.trim().to_string(),
            };
        };

        if let Some(first) = value
            .get("errors")
            .and_then(|v| v.as_array())
            .and_then(|errors| errors.first())
        {
            return Self {
                code: first
                    .get("title")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                description: first
                    .get("detail")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            };
        }

        Self {
            code: value
                .get("error_code")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            description: value
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }
    }

    fn message(&self, status: StatusCode) -> String {
        match (self.code.is_empty(), self.description.is_empty()) {
            (true, true) => status.to_string(),
            (true, false) => self.description.clone(),
            (false, true) => self.code.clone(),
            (false, false) => format!("{} ({})", self.description, self.code),
        }
    }
}

impl CfError {
    /// Classify a non-success provider response.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let parsed = ErrorBody::parse(body);
        let message = parsed.message(status);

        match status.as_u16() {
            400 | 422 => Self::Invalid(message),
            401 | 403 => Self::Unauthorized(message),
            404 => Self::NotFound(message),
            409 => Self::Conflict(message),
            429 | 500..=599 => Self::Transient {
                status: status.as_u16(),
                message,
            },
            other => Self::Provider {
                status: other,
                code: parsed.code,
                description: parsed.description,
            },
        }
    }

    /// Build a `NotFound` naming the resource kind and key.
    pub fn not_found(kind: &str, key: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{} '{}' not found", kind, key))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True for failures a caller may retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// True when a broker cannot serve binding parameters.
    ///
    /// Some brokers do not implement the parameters endpoint; the Cloud
    /// Controller then answers 502 or a `*NotSupported` error code. A plain
    /// 404 means the binding itself is missing and is not covered.
    pub fn is_parameters_unavailable(&self) -> bool {
        match self {
            Self::Transient { status: 502, .. } => true,
            Self::Provider { code, .. } => code.ends_with("NotSupported"),
            Self::NotFound(message)
            | Self::Invalid(message)
            | Self::Conflict(message)
            | Self::Transient { message, .. } => message.contains("NotSupported"),
            _ => false,
        }
    }
}

/// Convert an optional lookup result into a `NotFound` when `required`.
pub fn require<T>(value: Option<T>, required: bool, kind: &str, key: &str) -> CfResult<Option<T>> {
    match value {
        None if required => Err(CfError::not_found(kind, key)),
        other => Ok(other),
    }
}
