use crate::error::{Result, SyncError};
use crate::recovery::retry::RetryConfig;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Storage key under which the offline queue is persisted.
pub const OFFLINE_QUEUE_KEY: &str = "skirmish.offline_queue";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub retry: RetryConfig,
    /// How long an optimistic overlay may be shown without a resolution.
    pub overlay_grace: Duration,
    /// Failed replays an offline action survives before it is dropped.
    pub offline_retry_ceiling: u32,
    pub error_history_cap: usize,
    pub data_dir: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            retry: RetryConfig::default(),
            overlay_grace: Duration::from_secs(5),
            offline_retry_ceiling: 3,
            error_history_cap: 100,
            data_dir: PathBuf::from("./data"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl SyncConfig {
    /// Build a config from `SKIRMISH_*` environment variables.
    ///
    /// Unset, unparsable or out-of-range variables keep their defaults.
    pub fn from_env() -> Self {
        let defaults = SyncConfig::default();
        let retry_defaults = RetryConfig::default();

        let retry = RetryConfig {
            max_retries: env_parse("SKIRMISH_MAX_RETRIES").unwrap_or(retry_defaults.max_retries),
            base_delay: env_parse("SKIRMISH_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.base_delay),
            max_delay: env_parse("SKIRMISH_MAX_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.max_delay),
            backoff_multiplier: env_parse::<f64>("SKIRMISH_BACKOFF_MULTIPLIER")
                .filter(|m| m.is_finite() && *m >= 1.0)
                .unwrap_or(retry_defaults.backoff_multiplier),
            timeout: env_parse::<u64>("SKIRMISH_TIMEOUT_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.timeout),
        };

        SyncConfig {
            retry,
            overlay_grace: env_parse("SKIRMISH_OVERLAY_GRACE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.overlay_grace),
            offline_retry_ceiling: env_parse::<u32>("SKIRMISH_OFFLINE_RETRY_CEILING")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.offline_retry_ceiling),
            error_history_cap: env_parse::<usize>("SKIRMISH_ERROR_HISTORY_CAP")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.error_history_cap),
            data_dir: env::var("SKIRMISH_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let multiplier = self.retry.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(SyncError::Config(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.retry.backoff_multiplier
            )));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(SyncError::Config(format!(
                "base delay {:?} exceeds max delay {:?}",
                self.retry.base_delay, self.retry.max_delay
            )));
        }
        if self.retry.timeout.is_zero() {
            return Err(SyncError::Config("operation timeout must be non-zero".into()));
        }
        if self.offline_retry_ceiling == 0 {
            return Err(SyncError::Config(
                "offline retry ceiling must be at least 1".into(),
            ));
        }
        if self.error_history_cap == 0 {
            return Err(SyncError::Config("error history cap must be at least 1".into()));
        }
        Ok(())
    }
}
