use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::{DEFAULT_ERROR_RECONNECT_TIMEOUT, DEFAULT_RECONNECT_TIMEOUT};

/// How text-typed frames are decoded before publication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageEncoding {
    /// Strict UTF-8; frames that fail validation are surfaced as binary.
    #[default]
    Utf8,
    /// UTF-8 with replacement characters for invalid sequences.
    Utf8Lossy,
}

/// Tunables of a session.
///
/// A `None` timeout disables the corresponding reconnection path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Target endpoint. Reassigning it takes effect on the next reconnect.
    pub url: Url,
    /// Logging tag.
    pub name: Option<String>,
    /// Master switch for every reconnection path.
    pub is_reconnection_enabled: bool,
    /// No-message watchdog window.
    pub reconnect_timeout: Option<Duration>,
    /// Delay before retrying a failed connect.
    pub error_reconnect_timeout: Option<Duration>,
    /// Delay before reconnecting after an unexpected stream loss.
    /// `None` reconnects immediately.
    pub lost_reconnect_timeout: Option<Duration>,
    /// Whether text-typed frames are decoded to strings at all.
    pub is_text_message_conversion_enabled: bool,
    pub message_encoding: MessageEncoding,
}

impl SessionConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            name: None,
            is_reconnection_enabled: true,
            reconnect_timeout: Some(DEFAULT_RECONNECT_TIMEOUT),
            error_reconnect_timeout: Some(DEFAULT_ERROR_RECONNECT_TIMEOUT),
            lost_reconnect_timeout: None,
            is_text_message_conversion_enabled: true,
            message_encoding: MessageEncoding::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_table() {
        let config = SessionConfig::new(Url::parse("wss://example.com/feed").unwrap());
        assert!(config.is_reconnection_enabled);
        assert_eq!(config.reconnect_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.error_reconnect_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.lost_reconnect_timeout, None);
        assert!(config.is_text_message_conversion_enabled);
        assert_eq!(config.message_encoding, MessageEncoding::Utf8);
        assert!(config.name.is_none());
    }

    #[test]
    fn serializes_round_trip() {
        let config = SessionConfig::new(Url::parse("ws://127.0.0.1:9000").unwrap());
        let json = serde_json::to_string(&config).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.url, config.url);
        assert_eq!(back.reconnect_timeout, config.reconnect_timeout);
    }
}
