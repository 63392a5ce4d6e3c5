//! Backend call errors.

use thiserror::Error;

/// Error code the backend returns once the metrics/log store is gone.
pub const DATABASE_NOT_AVAILABLE: &str = "DATABASE_NOT_AVAILABLE";

/// Error codes meaning the edit is illegal in the current phase.
pub const PHASE_LOCKED_CODES: [&str; 2] = ["PHASE_LOCKED", "INVALID_PHASE"];

/// Result alias for backend calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors from a backend call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The request never produced a response.
    #[error("Request failed: {message}")]
    Transport { message: String, timeout: bool },

    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("Invalid response: {0}")]
    Decode(String),

    /// Structured rejection: `{success: false, errorCode, error}`.
    #[error("Rejected by backend ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The configured base URL cannot address the API.
    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Structured error code, when the backend sent one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } => Some(code),
            _ => None,
        }
    }

    /// The edit is not legal in the current phase. Never retried.
    pub fn is_phase_locked(&self) -> bool {
        match self {
            Self::Rejected { code, .. } => PHASE_LOCKED_CODES.contains(&code.as_str()),
            Self::Status { status, .. } => *status == 409,
            _ => false,
        }
    }

    /// The backend has torn down its metrics/log store.
    pub fn is_database_unavailable(&self) -> bool {
        self.code() == Some(DATABASE_NOT_AVAILABLE)
    }

    /// Network failures, timeouts and 5xx/429 responses.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::Status {
                status: status.as_u16(),
                body: err.to_string(),
            };
        }
        Self::Transport {
            timeout: err.is_timeout(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
