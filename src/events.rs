use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::debug;

use crate::constants::{LIFECYCLE_EVENT_CAPACITY, MESSAGE_EVENT_CAPACITY};
use crate::error::WsError;
use crate::utils::lock;

/// A data frame delivered to `message_received` subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseMessage {
    Text(String),
    Binary(Vec<u8>),
    Close { code: Option<CloseCode>, reason: String },
}

/// Why a (re)connection was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconnectionKind {
    /// First connect after `start`.
    Initial,
    /// The previous stream ended unexpectedly.
    Lost,
    /// The no-message watchdog fired.
    NoMessageReceived,
    /// A connect attempt failed and was retried.
    Error,
    /// Explicitly requested through the facade.
    ByUser,
}

/// Why the connection went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectionKind {
    /// The session was disposed while running.
    Exit,
    NoMessageReceived,
    Error,
    Lost,
    ByServer,
    ByUser,
}

impl From<ReconnectionKind> for DisconnectionKind {
    fn from(kind: ReconnectionKind) -> Self {
        match kind {
            ReconnectionKind::Initial => DisconnectionKind::Exit,
            ReconnectionKind::Lost => DisconnectionKind::Lost,
            ReconnectionKind::NoMessageReceived => DisconnectionKind::NoMessageReceived,
            ReconnectionKind::Error => DisconnectionKind::Error,
            ReconnectionKind::ByUser => DisconnectionKind::ByUser,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectionInfo {
    pub kind: ReconnectionKind,
}

impl ReconnectionInfo {
    pub fn new(kind: ReconnectionKind) -> Self {
        Self { kind }
    }
}

/// Details of a disconnection, published on `disconnection_happened`.
///
/// The two cancel flags are shared between every clone of the same event, so
/// a flag written by a synchronous observer is visible to the controller
/// before it acts on the disconnection.
#[derive(Debug, Clone)]
pub struct DisconnectionInfo {
    pub kind: DisconnectionKind,
    pub close_status: Option<CloseCode>,
    pub close_description: Option<String>,
    /// The failure behind this disconnection, shared with the error a
    /// fail-fast call returned for the same event.
    pub error: Option<Arc<WsError>>,
    cancel_reconnection: Arc<AtomicBool>,
    cancel_closing: Arc<AtomicBool>,
}

impl DisconnectionInfo {
    pub fn new(kind: DisconnectionKind) -> Self {
        Self {
            kind,
            close_status: None,
            close_description: None,
            error: None,
            cancel_reconnection: Arc::new(AtomicBool::new(false)),
            cancel_closing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_error(kind: DisconnectionKind, error: WsError) -> Self {
        let mut info = Self::new(kind);
        info.error = Some(Arc::new(error));
        info
    }

    pub fn by_server(close_status: Option<CloseCode>, close_description: Option<String>) -> Self {
        let mut info = Self::new(DisconnectionKind::ByServer);
        info.close_status = close_status;
        info.close_description = close_description;
        info
    }

    /// When set, the controller skips the reconnection that would normally
    /// follow this disconnection.
    pub fn set_cancel_reconnection(&self, cancel: bool) {
        self.cancel_reconnection.store(cancel, Ordering::SeqCst);
    }

    pub fn reconnection_cancelled(&self) -> bool {
        self.cancel_reconnection.load(Ordering::SeqCst)
    }

    /// When set on a server-initiated close, the controller aborts the
    /// transport instead of completing the close handshake.
    pub fn set_cancel_closing(&self, cancel: bool) {
        self.cancel_closing.store(cancel, Ordering::SeqCst);
    }

    pub fn closing_cancelled(&self) -> bool {
        self.cancel_closing.load(Ordering::SeqCst)
    }
}

pub(crate) type DisconnectionObserver = Box<dyn FnMut(&DisconnectionInfo) + Send>;

/// The three fan-out streams of a session plus the synchronous observer
/// registry for disconnections.
///
/// Publication never blocks: slow broadcast subscribers observe
/// [`broadcast::error::RecvError::Lagged`] and lose the oldest items.
pub(crate) struct EventStreams {
    messages: Mutex<broadcast::Sender<ResponseMessage>>,
    reconnections: Mutex<broadcast::Sender<ReconnectionInfo>>,
    disconnections: Mutex<broadcast::Sender<DisconnectionInfo>>,
    observers: Mutex<Vec<DisconnectionObserver>>,
    closed: AtomicBool,
}

impl EventStreams {
    pub fn new() -> Self {
        let (messages, _) = broadcast::channel(MESSAGE_EVENT_CAPACITY);
        let (reconnections, _) = broadcast::channel(LIFECYCLE_EVENT_CAPACITY);
        let (disconnections, _) = broadcast::channel(LIFECYCLE_EVENT_CAPACITY);
        Self {
            messages: Mutex::new(messages),
            reconnections: Mutex::new(reconnections),
            disconnections: Mutex::new(disconnections),
            observers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn publish_message(&self, message: ResponseMessage) {
        if self.is_closed() {
            return;
        }
        // Err means no subscribers right now, which is fine.
        let _ = lock(&self.messages).send(message);
    }

    pub fn publish_reconnection(&self, info: ReconnectionInfo) {
        if self.is_closed() {
            return;
        }
        debug!(target: "Session", kind = ?info.kind, "reconnection happened");
        let _ = lock(&self.reconnections).send(info);
    }

    /// Runs the synchronous observers, then fans the event out.
    ///
    /// The returned info carries any cancel flags the observers wrote.
    pub fn publish_disconnection(&self, info: DisconnectionInfo) -> DisconnectionInfo {
        if self.is_closed() {
            return info;
        }
        debug!(target: "Session", kind = ?info.kind, "disconnection happened");
        {
            let mut observers = lock(&self.observers);
            for observer in observers.iter_mut() {
                observer(&info);
            }
        }
        let _ = lock(&self.disconnections).send(info.clone());
        info
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<ResponseMessage> {
        lock(&self.messages).subscribe()
    }

    pub fn subscribe_reconnections(&self) -> broadcast::Receiver<ReconnectionInfo> {
        lock(&self.reconnections).subscribe()
    }

    pub fn subscribe_disconnections(&self) -> broadcast::Receiver<DisconnectionInfo> {
        lock(&self.disconnections).subscribe()
    }

    pub fn add_disconnection_observer(&self, observer: DisconnectionObserver) {
        if self.is_closed() {
            return;
        }
        lock(&self.observers).push(observer);
    }

    /// Stops all publication and completes the subscriber streams.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.observers).clear();
        // Swapping the senders out drops the live ones, so every subscriber
        // sees its stream complete.
        *lock(&self.messages) = broadcast::channel(1).0;
        *lock(&self.reconnections) = broadcast::channel(1).0;
        *lock(&self.disconnections) = broadcast::channel(1).0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observer_writes_are_visible_to_the_publisher() {
        let events = EventStreams::new();
        events.add_disconnection_observer(Box::new(|info| {
            if info.kind == DisconnectionKind::ByServer {
                info.set_cancel_closing(true);
            }
        }));

        let info = events.publish_disconnection(DisconnectionInfo::by_server(None, None));
        assert!(info.closing_cancelled());
        assert!(!info.reconnection_cancelled());
    }

    #[test]
    fn cancel_flags_are_shared_between_clones() {
        let info = DisconnectionInfo::new(DisconnectionKind::Error);
        let clone = info.clone();
        clone.set_cancel_reconnection(true);
        assert!(info.reconnection_cancelled());
    }

    #[tokio::test]
    async fn closed_streams_publish_nothing() {
        let events = EventStreams::new();
        let mut rx = events.subscribe_messages();
        events.close();
        events.publish_message(ResponseMessage::Text("late".into()));
        // The live sender was dropped, so the stream completes.
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn messages_fan_out_to_every_subscriber() {
        let events = EventStreams::new();
        let mut a = events.subscribe_messages();
        let mut b = events.subscribe_messages();
        events.publish_message(ResponseMessage::Binary(vec![1, 2, 3]));
        assert_eq!(a.recv().await.unwrap(), ResponseMessage::Binary(vec![1, 2, 3]));
        assert_eq!(b.recv().await.unwrap(), ResponseMessage::Binary(vec![1, 2, 3]));
    }
}
