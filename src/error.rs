use http::StatusCode;
use thiserror::Error;

/// Errors raised by the sync engine and its collaborators.
///
/// Display strings carry the keywords the classifier looks for
/// (`network`, `unauthorized`, `timeout`, ...), so a `SyncError` classifies the
/// same way as the raw failure it was built from.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Server error ({status}): {message}")]
    Http { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Json(e.to_string())
    }
}

impl From<tempfile::PersistError> for SyncError {
    fn from(e: tempfile::PersistError) -> Self {
        SyncError::Storage(e.error.to_string())
    }
}

impl SyncError {
    /// Map a failed response from the mutation endpoint onto an error variant.
    pub fn from_status(status: StatusCode, body: impl Into<String>) -> Self {
        let message = body.into();
        match status {
            StatusCode::UNAUTHORIZED => SyncError::Unauthorized(message),
            StatusCode::FORBIDDEN => SyncError::Forbidden(message),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                SyncError::Validation(message)
            }
            StatusCode::CONFLICT => SyncError::Conflict(message),
            StatusCode::NOT_FOUND => SyncError::NotFound(message),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                SyncError::Timeout { after_ms: 0 }
            }
            _ => SyncError::Http {
                status: status.as_u16(),
                message,
            },
        }
    }

    /// HTTP status this error corresponds to, when it came from (or maps to) one.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            SyncError::Unauthorized(_) => Some(StatusCode::UNAUTHORIZED),
            SyncError::Forbidden(_) => Some(StatusCode::FORBIDDEN),
            SyncError::Validation(_) => Some(StatusCode::UNPROCESSABLE_ENTITY),
            SyncError::Conflict(_) => Some(StatusCode::CONFLICT),
            SyncError::NotFound(_) => Some(StatusCode::NOT_FOUND),
            SyncError::Timeout { .. } => Some(StatusCode::GATEWAY_TIMEOUT),
            SyncError::Http { status, .. } => StatusCode::from_u16(*status).ok(),
            _ => None,
        }
    }
}
