use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

use crate::config::{MessageEncoding, SessionConfig};
use crate::connector::{Connector, TungsteniteTransport};
use crate::error::{WsError, WsResult};
use crate::events::{DisconnectionInfo, ReconnectionInfo, ResponseMessage};
use crate::session::SessionCore;
use crate::transport::{FrameKind, Transport};
use crate::utils::stream::MessageStream;
use crate::utils::{read_lock, write_lock};

/// The public handle of a resilient WebSocket session.
///
/// Cheap to clone; all clones share one logical connection. The session keeps
/// running until [`dispose`](Self::dispose) is called.
#[derive(Clone)]
pub struct WsSession {
    core: Arc<SessionCore>,
}

impl WsSession {
    pub(crate) fn from_parts(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            core: Arc::new(SessionCore::new(config, connector)),
        }
    }

    // --- Lifecycle ---

    /// Connects and keeps the connection alive. Network failures surface as
    /// `DisconnectionHappened(Error)` events, never as an error here.
    pub async fn start(&self) -> WsResult<()> {
        self.core.start(false).await
    }

    /// Like [`start`](Self::start), but an initial connect failure is
    /// returned to the caller.
    pub async fn start_or_fail(&self) -> WsResult<()> {
        self.core.start(true).await
    }

    /// Closes the connection. Returns whether a close handshake actually ran;
    /// close failures are swallowed.
    pub async fn stop(&self, code: CloseCode, reason: &str) -> WsResult<bool> {
        self.core.stop(code, reason, false).await
    }

    /// Like [`stop`](Self::stop), but close failures propagate.
    pub async fn stop_or_fail(&self, code: CloseCode, reason: &str) -> WsResult<bool> {
        self.core.stop(code, reason, true).await
    }

    /// Forces a reconnection of type `ByUser`. A session that was never
    /// started is left alone.
    pub async fn reconnect(&self) -> WsResult<()> {
        self.core.reconnect_requested(false).await
    }

    pub async fn reconnect_or_fail(&self) -> WsResult<()> {
        self.core.reconnect_requested(true).await
    }

    /// Tears the session down for good. Idempotent; afterwards every
    /// operation fails with [`WsError::AlreadyDisposed`].
    pub async fn dispose(&self) {
        self.core.dispose().await
    }

    // --- Sending ---

    /// Enqueues a text message without blocking. Dropped silently when the
    /// queue is full or the session is shutting down.
    pub fn send_text(&self, text: impl Into<String>) -> WsResult<()> {
        if self.core.is_disposing() {
            return Err(WsError::AlreadyDisposed);
        }
        self.core.text_queue.add(text.into());
        Ok(())
    }

    /// Enqueues a binary message without blocking.
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> WsResult<()> {
        if self.core.is_disposing() {
            return Err(WsError::AlreadyDisposed);
        }
        self.core.binary_queue.add(data.into());
        Ok(())
    }

    /// Bypasses the queue and writes directly under the send-lock.
    pub async fn send_text_instant(&self, text: impl Into<String>) -> WsResult<()> {
        if self.core.is_disposing() {
            return Err(WsError::AlreadyDisposed);
        }
        let text = text.into();
        self.core.send_internal(text.as_bytes(), FrameKind::Text).await
    }

    pub async fn send_binary_instant(&self, data: impl Into<Vec<u8>>) -> WsResult<()> {
        if self.core.is_disposing() {
            return Err(WsError::AlreadyDisposed);
        }
        let data = data.into();
        self.core.send_internal(&data, FrameKind::Binary).await
    }

    /// Test hook: publishes straight to `message_received` subscribers.
    pub fn stream_fake_message(&self, message: ResponseMessage) {
        self.core.events.publish_message(message);
    }

    // --- Event streams ---

    /// Subscribes to data frames, in receive order.
    pub fn messages(&self) -> broadcast::Receiver<ResponseMessage> {
        self.core.events.subscribe_messages()
    }

    /// Subscribes to data frames as a [`futures_util::Stream`].
    pub fn message_stream(&self) -> MessageStream {
        MessageStream::new(self.core.events.subscribe_messages())
    }

    /// Like [`message_stream`](Self::message_stream) with a per-item timeout.
    pub fn message_stream_timed(&self, timeout: Duration) -> MessageStream {
        MessageStream::new_timed(self.core.events.subscribe_messages(), Some(timeout))
    }

    pub fn reconnections(&self) -> broadcast::Receiver<ReconnectionInfo> {
        self.core.events.subscribe_reconnections()
    }

    pub fn disconnections(&self) -> broadcast::Receiver<DisconnectionInfo> {
        self.core.events.subscribe_disconnections()
    }

    /// Registers a synchronous observer that runs before the controller acts
    /// on a disconnection; the only place where writing
    /// [`DisconnectionInfo::set_cancel_reconnection`] or
    /// [`DisconnectionInfo::set_cancel_closing`] is guaranteed to be seen in
    /// time.
    pub fn on_disconnection(&self, observer: impl FnMut(&DisconnectionInfo) + Send + 'static) {
        self.core.events.add_disconnection_observer(Box::new(observer));
    }

    // --- State & configuration ---

    pub fn is_started(&self) -> bool {
        self.core.is_started()
    }

    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    pub fn is_disposed(&self) -> bool {
        self.core.is_disposing()
    }

    pub fn is_reconnection_enabled(&self) -> bool {
        self.core.is_reconnection_enabled()
    }

    pub fn name(&self) -> String {
        self.core.name()
    }

    pub fn url(&self) -> Url {
        read_lock(&self.core.config).url.clone()
    }

    /// Reassigns the target URL; takes effect on the next reconnect.
    pub fn set_url(&self, url: Url) {
        write_lock(&self.core.config).url = url;
    }

    /// Flips the master reconnection switch. Disabling it while running
    /// leaves the current connection up but turns every loss into a stop.
    pub fn set_reconnection_enabled(&self, enabled: bool) {
        write_lock(&self.core.config).is_reconnection_enabled = enabled;
    }

    /// No-message watchdog window; applied when the next connection is
    /// established.
    pub fn set_reconnect_timeout(&self, timeout: Option<Duration>) {
        write_lock(&self.core.config).reconnect_timeout = timeout;
    }

    pub fn set_error_reconnect_timeout(&self, timeout: Option<Duration>) {
        write_lock(&self.core.config).error_reconnect_timeout = timeout;
    }

    pub fn set_lost_reconnect_timeout(&self, timeout: Option<Duration>) {
        write_lock(&self.core.config).lost_reconnect_timeout = timeout;
    }

    pub fn set_text_message_conversion_enabled(&self, enabled: bool) {
        write_lock(&self.core.config).is_text_message_conversion_enabled = enabled;
    }

    pub fn set_message_encoding(&self, encoding: MessageEncoding) {
        write_lock(&self.core.config).message_encoding = encoding;
    }

    /// The active transport as the default tungstenite implementation.
    ///
    /// Fails with [`WsError::InvalidCast`] when a custom connector installed
    /// a different concrete type, and with [`WsError::InvalidInput`] when no
    /// transport is active.
    pub fn native_transport(&self) -> WsResult<Arc<TungsteniteTransport>> {
        let client = self
            .core
            .current_transport()
            .ok_or_else(|| WsError::InvalidInput("no active transport".to_string()))?;
        client
            .into_any()
            .downcast::<TungsteniteTransport>()
            .map_err(|_| {
                WsError::InvalidCast(
                    "active transport is not the native tungstenite transport".to_string(),
                )
            })
    }

    /// The active transport behind its trait object, if any.
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.core.current_transport()
    }
}
