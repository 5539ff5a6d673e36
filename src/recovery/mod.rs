//! Error classification, retry with backoff, and the coordinator that owns
//! connectivity, sync status and offline replay.

pub mod classify;
pub mod coordinator;
pub mod retry;

pub use classify::{classify, classify_error, ErrorClassification, ErrorKind, Severity};
pub use coordinator::{
    DrainReport, ErrorContext, ErrorRecord, FailureOutcome, NoopHooks, RecoveryCoordinator,
    RecoveryHooks, RecoveryMetrics, RecoveryState,
};
pub use retry::{retry_with_backoff, RetryConfig};
