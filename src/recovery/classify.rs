//! Maps raw failures onto a typed classification.
//!
//! Classification is keyword based and ordered: the first category whose
//! keywords appear in the lower-cased message wins. The order is part of the
//! contract, a message mentioning both a timeout and the server is a timeout.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Network,
    Authentication,
    Authorization,
    Validation,
    Conflict,
    Timeout,
    Server,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Network => "NETWORK",
            ErrorKind::Authentication => "AUTHENTICATION",
            ErrorKind::Authorization => "AUTHORIZATION",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Server => "SERVER",
            ErrorKind::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Presentation-only severity. Never used for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retryable: bool,
    /// User-facing message for the category.
    pub message: String,
}

/// Keyword table in precedence order.
const RULES: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::Network,
        &[
            "network",
            "fetch",
            "connection",
            "offline",
            "unreachable",
            "dns",
        ],
    ),
    (
        ErrorKind::Authentication,
        &[
            "unauthorized",
            "unauthenticated",
            "authentication",
            "not authenticated",
            "session expired",
            "login required",
        ],
    ),
    (
        ErrorKind::Authorization,
        &["forbidden", "permission", "access denied", "not allowed"],
    ),
    (
        ErrorKind::Validation,
        &["validation", "invalid", "required field", "bad request"],
    ),
    (
        ErrorKind::Conflict,
        &[
            "conflict",
            "version mismatch",
            "concurrent modification",
            "already exists",
        ],
    ),
    (
        ErrorKind::Timeout,
        &["timeout", "timed out", "deadline exceeded"],
    ),
    (
        ErrorKind::Server,
        &[
            "server",
            "internal error",
            "service unavailable",
            "bad gateway",
            "500",
            "502",
            "503",
        ],
    ),
];

/// Classify any displayable failure. Total: unmatched messages are `UNKNOWN`.
pub fn classify<E: fmt::Display + ?Sized>(error: &E) -> ErrorClassification {
    classify_message(&error.to_string())
}

/// Classify a crate error by its variant. Only variants without a category
/// of their own fall back to the keyword rules, so server-supplied text never
/// reclassifies a typed failure.
pub fn classify_error(error: &SyncError) -> ErrorClassification {
    let kind = match error {
        SyncError::Network(_) => ErrorKind::Network,
        SyncError::Timeout { .. } => ErrorKind::Timeout,
        SyncError::Unauthorized(_) => ErrorKind::Authentication,
        SyncError::Forbidden(_) => ErrorKind::Authorization,
        SyncError::Validation(_) => ErrorKind::Validation,
        SyncError::Conflict(_) => ErrorKind::Conflict,
        SyncError::Http { status, .. } if *status >= 500 => ErrorKind::Server,
        SyncError::Http { message, .. } => return classify_message(message),
        _ => return classify(error),
    };
    classification_for(kind)
}

pub fn classify_message(message: &str) -> ErrorClassification {
    let lowered = message.to_lowercase();
    let kind = RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(kind, _)| *kind)
        .unwrap_or(ErrorKind::Unknown);
    classification_for(kind)
}

pub fn classification_for(kind: ErrorKind) -> ErrorClassification {
    let (severity, message) = match kind {
        ErrorKind::Network => (
            Severity::Medium,
            "Connection lost. Changes will sync when you are back online.",
        ),
        ErrorKind::Authentication => (
            Severity::High,
            "Your session has expired. Please sign in again.",
        ),
        ErrorKind::Authorization => (
            Severity::High,
            "You do not have permission to perform this action.",
        ),
        ErrorKind::Validation => (
            Severity::Low,
            "The submitted data is invalid. Please check your input.",
        ),
        ErrorKind::Conflict => (
            Severity::Medium,
            "This interaction was changed by someone else. Review the latest state.",
        ),
        ErrorKind::Timeout => (
            Severity::Medium,
            "The request took too long. Retrying automatically.",
        ),
        ErrorKind::Server => (
            Severity::High,
            "The server ran into a problem. Please try again shortly.",
        ),
        ErrorKind::Unknown => (Severity::Medium, "An unexpected error occurred."),
    };

    ErrorClassification {
        kind,
        severity,
        retryable: is_retryable(kind),
        message: message.to_string(),
    }
}

pub fn is_retryable(kind: ErrorKind) -> bool {
    !matches!(
        kind,
        ErrorKind::Authentication | ErrorKind::Authorization | ErrorKind::Validation
    )
}
