use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub api_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl RemoteConfig {
    /// Load from {data_dir}/remote.json, or fall back to `SKIRMISH_API_*` env vars
    pub fn load_or_default(data_dir: &Path) -> Self {
        let remote_json = data_dir.join("remote.json");

        if remote_json.exists() {
            match std::fs::read_to_string(&remote_json) {
                Ok(content) => match serde_json::from_str::<RemoteConfig>(&content) {
                    Ok(config) => {
                        tracing::info!(
                            "[REMOTE] loaded remote.json: api_url={}, auth={}",
                            config.api_url,
                            config.api_token.is_some()
                        );
                        return config;
                    }
                    Err(e) => {
                        tracing::error!("[REMOTE] failed to parse remote.json: {}, using env", e);
                    }
                },
                Err(e) => {
                    tracing::error!("[REMOTE] failed to read remote.json: {}, using env", e);
                }
            }
        }

        Self::from_env()
    }

    pub fn from_env() -> Self {
        let api_url =
            std::env::var("SKIRMISH_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let api_token = std::env::var("SKIRMISH_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());
        let timeout_ms = std::env::var("SKIRMISH_REMOTE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        RemoteConfig {
            api_url,
            api_token,
            timeout_ms,
        }
    }
}
