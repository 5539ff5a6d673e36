use serde::{Deserialize, Serialize};

/// Error payload returned by the interaction API. Either field may be used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ErrorBody {
    /// Best human-readable message from a raw response body.
    pub fn message_from(raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match serde_json::from_str::<ErrorBody>(trimmed) {
            Ok(body) => body.message.or(body.error),
            Err(_) => Some(trimmed.to_string()),
        }
    }
}

/// Client health for operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteStatus {
    pub api_url: String,
    pub authenticated: bool,
    /// Unix seconds of the last accepted mutation, 0 if none yet
    pub last_success: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_from() {
        assert_eq!(
            ErrorBody::message_from(r#"{"message": "status is locked"}"#).as_deref(),
            Some("status is locked")
        );
        assert_eq!(
            ErrorBody::message_from(r#"{"error": "forbidden"}"#).as_deref(),
            Some("forbidden")
        );
        assert_eq!(
            ErrorBody::message_from("Bad Gateway").as_deref(),
            Some("Bad Gateway")
        );
        assert_eq!(ErrorBody::message_from("  "), None);
        assert_eq!(ErrorBody::message_from("{}"), None);
    }
}
