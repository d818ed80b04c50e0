use shared::{
    error::{ApiError, ErrorCode},
    protocol::ErrorBody,
};
use thiserror::Error;

/// Postgres `insufficient_privilege`, raised when row-level security rejects a write.
pub const RLS_VIOLATION_CODE: &str = "42501";
const VALIDATION_CODES: &[&str] = &["23502", "23514", "22P02"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Transport(String),
    #[error("session is missing or expired; sign in again")]
    Unauthorized,
    #[error("permission denied by row-level security: {0}")]
    PermissionDenied(String),
    #[error("invalid data: {0}")]
    Validation(String),
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("unexpected backend response: {0}")]
    Protocol(String),
}

impl BackendError {
    pub fn from_status(status: u16, body: &ErrorBody) -> Self {
        let message = match (body.message(), body.hint.as_deref()) {
            (Some(message), Some(hint)) if !hint.trim().is_empty() => {
                format!("{message} ({hint})")
            }
            (Some(message), _) => message.to_string(),
            (None, _) => format!("HTTP {status}"),
        };
        let code = body.code();

        match code.as_deref() {
            Some(RLS_VIOLATION_CODE) => return Self::PermissionDenied(message),
            Some(code) if VALIDATION_CODES.contains(&code) => return Self::Validation(message),
            _ => {}
        }

        match status {
            401 => Self::Unauthorized,
            403 => Self::PermissionDenied(message),
            _ => Self::Rejected { status, message },
        }
    }

    /// Worth retrying later without any user action.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Transport(_) => ErrorCode::Transport,
            Self::Unauthorized => ErrorCode::Unauthorized,
            Self::PermissionDenied(_) => ErrorCode::PermissionDenied,
            Self::Validation(_) => ErrorCode::Validation,
            Self::Rejected { status: 404, .. } => ErrorCode::NotFound,
            Self::Rejected { status, .. } if *status < 500 => ErrorCode::Validation,
            Self::Rejected { .. } | Self::Protocol(_) => ErrorCode::Internal,
        }
    }

    pub fn to_api_error(&self) -> ApiError {
        ApiError::new(self.code(), self.to_string())
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Protocol(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Rejected {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<url::ParseError> for BackendError {
    fn from(err: url::ParseError) -> Self {
        Self::Protocol(format!("invalid url: {err}"))
    }
}
