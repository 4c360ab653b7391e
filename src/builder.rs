use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::client::WsSession;
use crate::config::{MessageEncoding, SessionConfig};
use crate::connector::{Connector, TungsteniteConnector};
use crate::error::{WsError, WsResult};

/// Assembles a [`WsSession`].
///
/// ```rust,no_run
/// # use ws_session::builder::SessionBuilder;
/// # use std::time::Duration;
/// # async fn run() -> ws_session::error::WsResult<()> {
/// let session = SessionBuilder::new("wss://example.com/feed")
///     .with_name("feed")
///     .with_reconnect_timeout(Some(Duration::from_secs(30)))
///     .build()?;
/// session.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    url: String,
    name: Option<String>,
    connector: Option<Arc<dyn Connector>>,
    is_reconnection_enabled: bool,
    reconnect_timeout: Option<Option<Duration>>,
    error_reconnect_timeout: Option<Option<Duration>>,
    lost_reconnect_timeout: Option<Option<Duration>>,
    is_text_message_conversion_enabled: bool,
    message_encoding: MessageEncoding,
}

impl SessionBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: None,
            connector: None,
            is_reconnection_enabled: true,
            reconnect_timeout: None,
            error_reconnect_timeout: None,
            lost_reconnect_timeout: None,
            is_text_message_conversion_enabled: true,
            message_encoding: MessageEncoding::default(),
        }
    }

    /// Logging tag for every line this session emits.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replaces the default tungstenite connector, e.g. with a mock from
    /// [`crate::testing`].
    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    pub fn with_reconnection(mut self, enabled: bool) -> Self {
        self.is_reconnection_enabled = enabled;
        self
    }

    /// `None` disables the no-message watchdog.
    pub fn with_reconnect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reconnect_timeout = Some(timeout);
        self
    }

    /// `None` disables retrying after a failed connect.
    pub fn with_error_reconnect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.error_reconnect_timeout = Some(timeout);
        self
    }

    /// `None` reconnects immediately after a lost stream.
    pub fn with_lost_reconnect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lost_reconnect_timeout = Some(timeout);
        self
    }

    pub fn with_text_message_conversion(mut self, enabled: bool) -> Self {
        self.is_text_message_conversion_enabled = enabled;
        self
    }

    pub fn with_message_encoding(mut self, encoding: MessageEncoding) -> Self {
        self.message_encoding = encoding;
        self
    }

    pub fn build(self) -> WsResult<WsSession> {
        if self.url.trim().is_empty() {
            return Err(WsError::InvalidInput("url must not be empty".to_string()));
        }
        let url = Url::parse(&self.url)
            .map_err(|err| WsError::InvalidInput(format!("invalid url '{}': {err}", self.url)))?;
        let mut config = SessionConfig::new(url);
        config.name = self.name;
        config.is_reconnection_enabled = self.is_reconnection_enabled;
        if let Some(timeout) = self.reconnect_timeout {
            config.reconnect_timeout = timeout;
        }
        if let Some(timeout) = self.error_reconnect_timeout {
            config.error_reconnect_timeout = timeout;
        }
        if let Some(timeout) = self.lost_reconnect_timeout {
            config.lost_reconnect_timeout = timeout;
        }
        config.is_text_message_conversion_enabled = self.is_text_message_conversion_enabled;
        config.message_encoding = self.message_encoding;
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TungsteniteConnector));
        Ok(WsSession::from_parts(config, connector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_session_builder_send_sync() {
        // This will fail to compile if SessionBuilder is not Send + Sync
        assert_send_sync::<SessionBuilder>();
    }

    #[test]
    fn empty_url_is_rejected() {
        assert!(matches!(
            SessionBuilder::new("  ").build(),
            Err(WsError::InvalidInput(_))
        ));
    }

    #[test]
    fn malformed_url_is_rejected() {
        assert!(matches!(
            SessionBuilder::new("not a url").build(),
            Err(WsError::InvalidInput(_))
        ));
    }

    #[test]
    fn builder_overrides_land_in_the_config() {
        let session = SessionBuilder::new("wss://example.com/feed")
            .with_name("feed")
            .with_reconnection(false)
            .with_reconnect_timeout(None)
            .with_lost_reconnect_timeout(Some(Duration::from_millis(250)))
            .build()
            .unwrap();
        assert_eq!(session.name(), "feed");
        assert!(!session.is_reconnection_enabled());
    }
}
