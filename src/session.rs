use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{MessageEncoding, SessionConfig};
use crate::connector::Connector;
use crate::constants::{QUEUE_CAPACITY, QUEUE_DRAIN_TIMEOUT, RECEIVE_BUFFER_SIZE};
use crate::error::{WsError, WsResult};
use crate::events::{
    DisconnectionInfo, DisconnectionKind, EventStreams, ReconnectionInfo, ReconnectionKind,
    ResponseMessage,
};
use crate::queue::WorkQueue;
use crate::scopes::Scopes;
use crate::transport::{FrameKind, Transport, TransportError};
use crate::utils::{lock, read_lock, write_lock};

/// One frame pulled off the wire, owned, waiting for the dispatcher.
pub(crate) struct ReceiveItem {
    pub kind: FrameKind,
    #[allow(dead_code)]
    pub end_of_message: bool,
    pub payload: Vec<u8>,
}

/// Shared heart of a session: the lifecycle state machine, the current
/// transport, the queues and the event streams.
///
/// Worker tasks never mutate lifecycle state directly; everything funnels
/// through the operations on this type.
pub(crate) struct SessionCore {
    pub config: StdRwLock<SessionConfig>,
    pub connector: Arc<dyn Connector>,
    pub events: EventStreams,
    pub scopes: Scopes,

    transport: StdRwLock<Option<Arc<dyn Transport>>>,
    send_lock: Mutex<()>,
    reconnect_guard: Mutex<()>,

    is_started: AtomicBool,
    is_running: AtomicBool,
    is_disposing: AtomicBool,
    is_reconnecting: AtomicBool,
    is_stopping: AtomicBool,
    workers_started: AtomicBool,

    last_received: StdRwLock<Instant>,
    watchdog: StdMutex<Option<JoinHandle<()>>>,
    receive_task: StdMutex<Option<JoinHandle<()>>>,

    pub text_queue: WorkQueue<String>,
    pub binary_queue: WorkQueue<Vec<u8>>,
    receive_queue: WorkQueue<ReceiveItem>,
}

impl SessionCore {
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config: StdRwLock::new(config),
            connector,
            events: EventStreams::new(),
            scopes: Scopes::new(),
            transport: StdRwLock::new(None),
            send_lock: Mutex::new(()),
            reconnect_guard: Mutex::new(()),
            is_started: AtomicBool::new(false),
            is_running: AtomicBool::new(false),
            is_disposing: AtomicBool::new(false),
            is_reconnecting: AtomicBool::new(false),
            is_stopping: AtomicBool::new(false),
            workers_started: AtomicBool::new(false),
            last_received: StdRwLock::new(Instant::now()),
            watchdog: StdMutex::new(None),
            receive_task: StdMutex::new(None),
            text_queue: WorkQueue::new("send-text", QUEUE_CAPACITY),
            binary_queue: WorkQueue::new("send-binary", QUEUE_CAPACITY),
            receive_queue: WorkQueue::new("receive", QUEUE_CAPACITY),
        }
    }

    // --- Flag accessors ---

    pub fn is_started(&self) -> bool {
        self.is_started.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn is_disposing(&self) -> bool {
        self.is_disposing.load(Ordering::SeqCst)
    }

    pub fn is_stopping(&self) -> bool {
        self.is_stopping.load(Ordering::SeqCst)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.is_reconnecting.load(Ordering::SeqCst)
    }

    pub fn is_reconnection_enabled(&self) -> bool {
        read_lock(&self.config).is_reconnection_enabled
    }

    pub fn name(&self) -> String {
        read_lock(&self.config)
            .name
            .clone()
            .unwrap_or_else(|| "client".to_string())
    }

    pub fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        read_lock(&self.transport).clone()
    }

    fn is_current(&self, client: &Arc<dyn Transport>) -> bool {
        read_lock(&self.transport)
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, client))
    }

    /// Gates every reconnection trigger: a stale, concurrent or shutting-down
    /// caller must not reconnect.
    pub fn should_ignore_reconnection(&self, client: &Arc<dyn Transport>) -> bool {
        self.is_disposing()
            || self.is_reconnecting()
            || self.is_stopping()
            || !self.is_current(client)
    }

    fn touch_last_received(&self) {
        *write_lock(&self.last_received) = Instant::now();
    }

    fn last_received_elapsed(&self) -> Duration {
        read_lock(&self.last_received).elapsed()
    }

    fn lost_reconnect_timeout(&self) -> Option<Duration> {
        read_lock(&self.config).lost_reconnect_timeout
    }

    // --- Lifecycle operations ---

    pub async fn start(self: &Arc<Self>, fail_fast: bool) -> WsResult<()> {
        if self.is_disposing() {
            return Err(WsError::AlreadyDisposed);
        }
        if self.is_started.swap(true, Ordering::SeqCst) {
            debug!(target: "Session", name = %self.name(), "already started, ignoring start request");
            return Ok(());
        }
        info!(target: "Session", name = %self.name(), "starting");
        self.scopes.rotate_session();
        self.start_workers();
        self.start_client(ReconnectionKind::Initial, fail_fast).await
    }

    /// Connects, installs the transport and brings the session to running.
    ///
    /// The connect-failure path retries in place (type `Error`), honoring
    /// `cancel_reconnection`, `fail_fast` and `error_reconnect_timeout`.
    async fn start_client(
        self: &Arc<Self>,
        kind: ReconnectionKind,
        fail_fast: bool,
    ) -> WsResult<()> {
        let mut kind = kind;
        loop {
            self.deactivate_watchdog();
            let url = read_lock(&self.config).url.clone();
            let session = self.scopes.session();
            match self.connector.connect(&url, &session).await {
                Ok(client) => {
                    if !self.is_started() || self.is_disposing() {
                        // Stopped or disposed while the connect was in flight.
                        client.abort();
                        return Ok(());
                    }
                    if let Some(old) = write_lock(&self.transport).replace(Arc::clone(&client)) {
                        old.abort();
                    }
                    self.spawn_receive_loop(Arc::clone(&client), session);
                    self.is_running.store(true, Ordering::SeqCst);
                    self.touch_last_received();
                    self.events.publish_reconnection(ReconnectionInfo::new(kind));
                    self.activate_watchdog();
                    return Ok(());
                }
                Err(cause) => {
                    if self.is_disposing() || matches!(cause, TransportError::Cancelled) {
                        return Ok(());
                    }
                    error!(
                        target: "Session",
                        name = %self.name(), url = %url,
                        "failed to connect: {cause}"
                    );
                    let cause = Arc::new(cause);
                    let info = self.events.publish_disconnection(DisconnectionInfo::with_error(
                        DisconnectionKind::Error,
                        WsError::ConnectFailed(Arc::clone(&cause)),
                    ));
                    if info.reconnection_cancelled() {
                        debug!(target: "Session", name = %self.name(), "reconnection cancelled by subscriber");
                        return Ok(());
                    }
                    if fail_fast {
                        return Err(WsError::ConnectFailed(cause));
                    }
                    let Some(delay) = read_lock(&self.config).error_reconnect_timeout else {
                        return Ok(());
                    };
                    info!(
                        target: "Session",
                        name = %self.name(),
                        "waiting {delay:?} before next connection attempt"
                    );
                    tokio::select! {
                        _ = session.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    if !self.is_started() || self.is_disposing() {
                        return Ok(());
                    }
                    self.scopes.rotate_session();
                    kind = ReconnectionKind::Error;
                }
            }
        }
    }

    /// The reconnection body. Callers must hold the reconnect guard.
    async fn reconnect_core(
        self: &Arc<Self>,
        kind: ReconnectionKind,
        fail_fast: bool,
    ) -> WsResult<()> {
        self.is_reconnecting.store(true, Ordering::SeqCst);
        if let Some(old) = write_lock(&self.transport).take() {
            old.abort();
        }
        self.scopes.rotate_session();
        let result = self.start_client(kind, fail_fast).await;
        self.is_reconnecting.store(false, Ordering::SeqCst);
        result
    }

    /// Entry point for every network-initiated reconnection (stream loss,
    /// watchdog). Publishes the matching disconnection, honors subscriber
    /// cancellation and the master switch, then reconnects single-flight.
    pub async fn trigger_reconnect(
        self: &Arc<Self>,
        client: Arc<dyn Transport>,
        kind: ReconnectionKind,
        cause: Option<WsError>,
    ) {
        if self.should_ignore_reconnection(&client) {
            return;
        }
        let _guard = self.reconnect_guard.lock().await;
        if self.should_ignore_reconnection(&client) || !self.is_started() {
            return;
        }
        self.is_running.store(false, Ordering::SeqCst);
        let mut info = DisconnectionInfo::new(DisconnectionKind::from(kind));
        info.error = cause.map(Arc::new);
        let info = self.events.publish_disconnection(info);
        if info.reconnection_cancelled() {
            debug!(target: "Session", name = %self.name(), "reconnection cancelled by subscriber");
            return;
        }
        if !self.is_reconnection_enabled() {
            debug!(target: "Session", name = %self.name(), "reconnection disabled, going to stopped state");
            self.is_started.store(false, Ordering::SeqCst);
            self.deactivate_watchdog();
            if let Some(old) = write_lock(&self.transport).take() {
                old.abort();
            }
            return;
        }
        if let Err(err) = self.reconnect_core(kind, false).await {
            error!(target: "Session", name = %self.name(), "reconnection failed: {err}");
        }
    }

    /// Reconnects without publishing another disconnection; used after a
    /// server close whose `ByServer` event already went out.
    async fn reconnect_silently(self: &Arc<Self>, client: Arc<dyn Transport>) {
        if let Some(delay) = self.lost_reconnect_timeout() {
            let session = self.scopes.session();
            tokio::select! {
                _ = session.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if self.should_ignore_reconnection(&client) {
            return;
        }
        let _guard = self.reconnect_guard.lock().await;
        if self.should_ignore_reconnection(&client) || !self.is_started() {
            return;
        }
        self.is_running.store(false, Ordering::SeqCst);
        if let Err(err) = self.reconnect_core(ReconnectionKind::Lost, false).await {
            error!(target: "Session", name = %self.name(), "reconnection failed: {err}");
        }
    }

    /// User-requested reconnection.
    pub async fn reconnect_requested(self: &Arc<Self>, fail_fast: bool) -> WsResult<()> {
        if self.is_disposing() {
            return Err(WsError::AlreadyDisposed);
        }
        if !self.is_started() {
            debug!(target: "Session", name = %self.name(), "not started, ignoring reconnect request");
            return Ok(());
        }
        let _guard = self.reconnect_guard.lock().await;
        if self.is_disposing() || !self.is_started() {
            return Ok(());
        }
        self.is_running.store(false, Ordering::SeqCst);
        let info = self
            .events
            .publish_disconnection(DisconnectionInfo::new(DisconnectionKind::ByUser));
        if info.reconnection_cancelled() {
            return Ok(());
        }
        self.reconnect_core(ReconnectionKind::ByUser, fail_fast).await
    }

    /// Closes the given transport and settles the lifecycle flags.
    ///
    /// Returns `Ok(true)` when the close handshake ran successfully,
    /// `Ok(false)` when there was nothing to close or the error was
    /// swallowed.
    pub async fn stop_internal(
        &self,
        client: Option<Arc<dyn Transport>>,
        code: CloseCode,
        reason: &str,
        fail_fast: bool,
        by_server: bool,
    ) -> WsResult<bool> {
        if self.is_disposing() {
            return Err(WsError::AlreadyDisposed);
        }
        self.deactivate_watchdog();
        let Some(client) = client else {
            self.is_started.store(false, Ordering::SeqCst);
            self.is_running.store(false, Ordering::SeqCst);
            return Ok(false);
        };
        if !self.is_running() {
            info!(target: "Session", name = %self.name(), "client is already stopped");
            return Ok(false);
        }
        self.is_stopping.store(true, Ordering::SeqCst);
        let token = if by_server {
            self.scopes.session()
        } else {
            self.scopes.total()
        };
        let result = if by_server {
            client.close_output(code, reason, &token).await
        } else {
            client.close(code, reason, &token).await
        };
        self.is_running.store(false, Ordering::SeqCst);
        self.is_stopping.store(false, Ordering::SeqCst);
        if !by_server || !self.is_reconnection_enabled() {
            self.is_started.store(false, Ordering::SeqCst);
        }
        match result {
            Ok(()) => Ok(true),
            Err(cause) => {
                error!(target: "Session", name = %self.name(), "failed to close connection: {cause}");
                if fail_fast {
                    Err(WsError::CloseFailed(Arc::new(cause)))
                } else {
                    Ok(false)
                }
            }
        }
    }

    pub async fn stop(
        self: &Arc<Self>,
        code: CloseCode,
        reason: &str,
        fail_fast: bool,
    ) -> WsResult<bool> {
        let was_running = self.is_running();
        let result = self
            .stop_internal(self.current_transport(), code, reason, fail_fast, false)
            .await?;
        if was_running {
            self.events
                .publish_disconnection(DisconnectionInfo::new(DisconnectionKind::ByUser));
        }
        Ok(result)
    }

    /// Idempotent teardown. Queues flush under a bounded drain, both scopes
    /// are cancelled and every stream completes.
    pub async fn dispose(self: &Arc<Self>) {
        if self.is_disposing.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(target: "Session", name = %self.name(), "disposing");
        self.deactivate_watchdog();
        self.text_queue.dispose(QUEUE_DRAIN_TIMEOUT).await;
        self.binary_queue.dispose(QUEUE_DRAIN_TIMEOUT).await;
        self.receive_queue.dispose(QUEUE_DRAIN_TIMEOUT).await;
        self.scopes.cancel_all();
        if let Some(client) = write_lock(&self.transport).take() {
            client.abort();
        }
        if let Some(task) = lock(&self.receive_task).take() {
            task.abort();
        }
        let was_running = self.is_running.swap(false, Ordering::SeqCst);
        self.is_started.store(false, Ordering::SeqCst);
        if was_running {
            self.events
                .publish_disconnection(DisconnectionInfo::new(DisconnectionKind::Exit));
        }
        self.events.close();
    }

    // --- Send path ---

    /// Writes one frame under the send-lock. A disconnected client drops the
    /// payload with a log line instead of failing.
    pub async fn send_internal(&self, payload: &[u8], kind: FrameKind) -> WsResult<()> {
        let _lock = self.send_lock.lock().await;
        let client = self.current_transport();
        match client {
            Some(client) if client.state().is_open() => {
                let session = self.scopes.session();
                client
                    .send(payload, kind, true, &session)
                    .await
                    .map_err(|cause| WsError::SendFailed(Arc::new(cause)))
            }
            _ => {
                info!(
                    target: "SendWorker",
                    name = %self.name(),
                    "client is not connected, message dropped"
                );
                Ok(())
            }
        }
    }

    fn start_workers(self: &Arc<Self>) {
        if self.workers_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let core = Arc::clone(self);
        self.text_queue.start(move |text: String| {
            let core = Arc::clone(&core);
            async move {
                core.send_internal(text.as_bytes(), FrameKind::Text).await
            }
        });
        let core = Arc::clone(self);
        self.binary_queue.start(move |data: Vec<u8>| {
            let core = Arc::clone(&core);
            async move { core.send_internal(&data, FrameKind::Binary).await }
        });
        let core = Arc::clone(self);
        self.receive_queue.start(move |item: ReceiveItem| {
            let core = Arc::clone(&core);
            async move { core.handle_receive_item(item).await }
        });
    }

    // --- Receive path ---

    fn spawn_receive_loop(self: &Arc<Self>, client: Arc<dyn Transport>, session: CancellationToken) {
        let core = Arc::clone(self);
        let handle = tokio::spawn(async move {
            core.receive_loop(client, session).await;
        });
        if let Some(previous) = lock(&self.receive_task).replace(handle) {
            // Bound to an aborted transport and a cancelled scope; it is
            // already on its way out.
            drop(previous);
        }
    }

    async fn receive_loop(
        self: Arc<Self>,
        client: Arc<dyn Transport>,
        session: CancellationToken,
    ) {
        let mut buffer = vec![0u8; RECEIVE_BUFFER_SIZE];
        let mut cause: Option<WsError> = None;
        loop {
            if session.is_cancelled() || !client.state().is_open() {
                break;
            }
            match client.receive(&mut buffer, &session).await {
                Ok(frame) => {
                    let payload = buffer[..frame.count].to_vec();
                    self.touch_last_received();
                    let item = ReceiveItem {
                        kind: frame.kind,
                        end_of_message: frame.end_of_message,
                        payload,
                    };
                    if !self.receive_queue.add(item) {
                        warn!(target: "ReceiveLoop", name = %self.name(), "inbound frame dropped");
                    }
                }
                Err(TransportError::Cancelled | TransportError::ConnectionClosed) => break,
                Err(err) => {
                    if !session.is_cancelled() && !self.is_disposing() {
                        error!(target: "ReceiveLoop", name = %self.name(), "receive failed: {err}");
                        cause = Some(WsError::ReceiveFailed(Arc::new(err)));
                    }
                    break;
                }
            }
        }
        if session.is_cancelled() || self.is_disposing() || !self.is_started() {
            debug!(target: "ReceiveLoop", name = %self.name(), "exiting");
            return;
        }
        // A close frame from the server is the dispatcher's call, not ours.
        if cause.is_none() && client.close_info().is_some() {
            debug!(target: "ReceiveLoop", name = %self.name(), "exiting after server close");
            return;
        }
        if self.should_ignore_reconnection(&client) {
            return;
        }
        warn!(target: "ReceiveLoop", name = %self.name(), "stream lost");
        if let Some(delay) = self.lost_reconnect_timeout() {
            tokio::select! {
                _ = session.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.trigger_reconnect(client, ReconnectionKind::Lost, cause)
            .await;
    }

    // --- Inbound dispatcher ---

    async fn handle_receive_item(self: &Arc<Self>, item: ReceiveItem) -> WsResult<()> {
        match item.kind {
            FrameKind::Close => self.handle_server_close().await,
            FrameKind::Text | FrameKind::Binary => {
                if !self.is_running() {
                    return Ok(());
                }
                if item.payload.is_empty() {
                    // Zero-length data frames carry nothing worth publishing.
                    return Ok(());
                }
                let message = self.decode_data_frame(item);
                self.events.publish_message(message);
                Ok(())
            }
        }
    }

    async fn handle_server_close(self: &Arc<Self>) -> WsResult<()> {
        if !self.is_started() || self.is_stopping() {
            debug!(target: "Dispatcher", name = %self.name(), "close frame ignored");
            return Ok(());
        }
        let Some(client) = self.current_transport() else {
            return Ok(());
        };
        let (code, reason) = match client.close_info() {
            Some((code, reason)) => (Some(code), Some(reason)),
            None => (None, None),
        };
        info!(target: "Dispatcher", name = %self.name(), "connection closed by server");
        let info = self
            .events
            .publish_disconnection(DisconnectionInfo::by_server(code, reason));
        let reconnection_enabled = self.is_reconnection_enabled();
        if info.closing_cancelled() && reconnection_enabled {
            debug!(target: "Dispatcher", name = %self.name(), "closing cancelled by subscriber, aborting transport");
            client.abort();
        } else {
            let _ = self
                .stop_internal(
                    Some(Arc::clone(&client)),
                    CloseCode::Normal,
                    "Closing",
                    false,
                    true,
                )
                .await;
            if !reconnection_enabled {
                return Ok(());
            }
        }
        self.reconnect_silently(client).await;
        Ok(())
    }

    fn decode_data_frame(&self, item: ReceiveItem) -> ResponseMessage {
        let (conversion_enabled, encoding) = {
            let config = read_lock(&self.config);
            (
                config.is_text_message_conversion_enabled,
                config.message_encoding,
            )
        };
        if item.kind == FrameKind::Text && conversion_enabled {
            match encoding {
                MessageEncoding::Utf8 => match String::from_utf8(item.payload) {
                    Ok(text) => ResponseMessage::Text(text),
                    Err(err) => {
                        warn!(
                            target: "Dispatcher",
                            name = %self.name(),
                            "text frame is not valid UTF-8, delivering as binary"
                        );
                        ResponseMessage::Binary(err.into_bytes())
                    }
                },
                MessageEncoding::Utf8Lossy => {
                    ResponseMessage::Text(String::from_utf8_lossy(&item.payload).into_owned())
                }
            }
        } else {
            ResponseMessage::Binary(item.payload)
        }
    }

    // --- Watchdog ---

    /// Arms the no-message watchdog for the current connection.
    fn activate_watchdog(self: &Arc<Self>) {
        let Some(period) = read_lock(&self.config).reconnect_timeout else {
            return;
        };
        let Some(client) = self.current_transport() else {
            return;
        };
        let session = self.scopes.session();
        let core = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = session.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if !core.is_reconnection_enabled() {
                    continue;
                }
                if core.last_received_elapsed() <= period {
                    continue;
                }
                if core.should_ignore_reconnection(&client) {
                    continue;
                }
                warn!(
                    target: "Watchdog",
                    name = %core.name(),
                    "no message received within {period:?}, reconnecting"
                );
                let core = Arc::clone(&core);
                let client = Arc::clone(&client);
                // Reconnect on a fresh task: deactivate_watchdog aborts this
                // loop while the reconnection must keep going.
                tokio::spawn(async move {
                    core.trigger_reconnect(client, ReconnectionKind::NoMessageReceived, None)
                        .await;
                });
                break;
            }
        });
        if let Some(previous) = lock(&self.watchdog).replace(handle) {
            previous.abort();
        }
    }

    fn deactivate_watchdog(&self) {
        if let Some(handle) = lock(&self.watchdog).take() {
            handle.abort();
        }
    }
}
