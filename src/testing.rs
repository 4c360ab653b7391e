//! Scripted transports for exercising a session without a network.
//!
//! [`MockTransport`] replays frames a test pushes through its
//! [`MockTransportHandle`] and records everything the session writes;
//! [`MockConnector`] hands out scripted connect outcomes in order.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use kanal::{AsyncReceiver, Sender, unbounded_async};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::connector::Connector;
use crate::transport::{
    FrameInfo, FrameKind, Transport, TransportError, TransportResult, TransportState,
};
use crate::utils::lock;

enum ScriptItem {
    Data(FrameKind, Vec<u8>),
    Close(CloseCode, String),
    Error(String),
}

/// One recorded outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub kind: FrameKind,
    pub payload: Vec<u8>,
    pub end_of_message: bool,
}

/// A scripted in-memory [`Transport`].
pub struct MockTransport {
    state: AtomicU8,
    script: Mutex<AsyncReceiver<ScriptItem>>,
    sent: StdMutex<Vec<SentFrame>>,
    closed_with: StdMutex<Option<(CloseCode, String, bool)>>,
    close_frame: StdMutex<Option<(CloseCode, String)>>,
    fail_next_close: AtomicBool,
    aborted: CancellationToken,
}

/// Test-side handle for feeding frames into a [`MockTransport`] and
/// inspecting what the session did with it.
#[derive(Clone)]
pub struct MockTransportHandle {
    tx: Sender<ScriptItem>,
    transport: Arc<MockTransport>,
}

impl MockTransport {
    pub fn pair() -> (Arc<Self>, MockTransportHandle) {
        let (tx, rx) = unbounded_async();
        let transport = Arc::new(Self {
            state: AtomicU8::new(TransportState::Open as u8),
            script: Mutex::new(rx),
            sent: StdMutex::new(Vec::new()),
            closed_with: StdMutex::new(None),
            close_frame: StdMutex::new(None),
            fail_next_close: AtomicBool::new(false),
            aborted: CancellationToken::new(),
        });
        let handle = MockTransportHandle {
            tx: tx.to_sync(),
            transport: Arc::clone(&transport),
        };
        (transport, handle)
    }

    fn set_state(&self, state: TransportState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

impl MockTransportHandle {
    pub fn transport(&self) -> Arc<MockTransport> {
        Arc::clone(&self.transport)
    }

    /// Queues an inbound text frame.
    pub fn push_text(&self, text: &str) {
        let _ = self
            .tx
            .try_send(ScriptItem::Data(FrameKind::Text, text.as_bytes().to_vec()));
    }

    /// Queues an inbound text-typed frame with a raw payload, which does not
    /// have to be valid UTF-8.
    pub fn push_text_bytes(&self, data: impl Into<Vec<u8>>) {
        let _ = self
            .tx
            .try_send(ScriptItem::Data(FrameKind::Text, data.into()));
    }

    /// Queues an inbound binary frame.
    pub fn push_binary(&self, data: impl Into<Vec<u8>>) {
        let _ = self
            .tx
            .try_send(ScriptItem::Data(FrameKind::Binary, data.into()));
    }

    /// Queues a server-initiated close frame.
    pub fn push_close(&self, code: CloseCode, reason: &str) {
        let _ = self
            .tx
            .try_send(ScriptItem::Close(code, reason.to_string()));
    }

    /// Queues a receive error, ending the stream.
    pub fn push_error(&self, message: &str) {
        let _ = self.tx.try_send(ScriptItem::Error(message.to_string()));
    }

    /// Makes the next `close`/`close_output` call fail.
    pub fn fail_next_close(&self) {
        self.transport.fail_next_close.store(true, Ordering::SeqCst);
    }

    /// Everything the session has written so far.
    pub fn sent(&self) -> Vec<SentFrame> {
        lock(&self.transport.sent).clone()
    }

    /// The close the session performed, if any: `(code, reason, output_only)`.
    pub fn closed_with(&self) -> Option<(CloseCode, String, bool)> {
        lock(&self.transport.closed_with).clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.transport.state() == TransportState::Aborted
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        payload: &[u8],
        kind: FrameKind,
        end_of_message: bool,
        _cancel: &CancellationToken,
    ) -> TransportResult<()> {
        if !self.state().is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        lock(&self.sent).push(SentFrame {
            kind,
            payload: payload.to_vec(),
            end_of_message,
        });
        Ok(())
    }

    async fn receive(
        &self,
        buffer: &mut [u8],
        cancel: &CancellationToken,
    ) -> TransportResult<FrameInfo> {
        let script = self.script.lock().await;
        let item = tokio::select! {
            biased;
            _ = self.aborted.cancelled() => return Err(TransportError::Cancelled),
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            item = script.recv() => item,
        };
        match item {
            Ok(ScriptItem::Data(kind, payload)) => {
                if payload.len() > buffer.len() {
                    return Err(TransportError::FrameTooLarge {
                        size: payload.len(),
                        max: buffer.len(),
                    });
                }
                buffer[..payload.len()].copy_from_slice(&payload);
                Ok(FrameInfo {
                    kind,
                    count: payload.len(),
                    end_of_message: true,
                })
            }
            Ok(ScriptItem::Close(code, reason)) => {
                *lock(&self.close_frame) = Some((code, reason));
                self.set_state(TransportState::CloseReceived);
                Ok(FrameInfo {
                    kind: FrameKind::Close,
                    count: 0,
                    end_of_message: true,
                })
            }
            Ok(ScriptItem::Error(message)) => {
                self.set_state(TransportState::Closed);
                Err(TransportError::Custom(message))
            }
            Err(_) => {
                self.set_state(TransportState::Closed);
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    async fn close(
        &self,
        code: CloseCode,
        reason: &str,
        _cancel: &CancellationToken,
    ) -> TransportResult<()> {
        if self.fail_next_close.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Custom("scripted close failure".to_string()));
        }
        *lock(&self.closed_with) = Some((code, reason.to_string(), false));
        self.set_state(TransportState::Closed);
        Ok(())
    }

    async fn close_output(
        &self,
        code: CloseCode,
        reason: &str,
        _cancel: &CancellationToken,
    ) -> TransportResult<()> {
        if self.fail_next_close.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Custom("scripted close failure".to_string()));
        }
        *lock(&self.closed_with) = Some((code, reason.to_string(), true));
        self.set_state(TransportState::Closed);
        Ok(())
    }

    fn abort(&self) {
        self.set_state(TransportState::Aborted);
        self.aborted.cancel();
    }

    fn state(&self) -> TransportState {
        TransportState::from(self.state.load(Ordering::SeqCst))
    }

    fn close_info(&self) -> Option<(CloseCode, String)> {
        lock(&self.close_frame).clone()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

enum ConnectOutcome {
    Transport(Arc<MockTransport>),
    Failure(String),
}

/// Hands out scripted connect outcomes in FIFO order and counts attempts.
/// An exhausted script fails every further attempt.
#[derive(Default)]
pub struct MockConnector {
    script: StdMutex<VecDeque<ConnectOutcome>>,
    attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_transport(&self, transport: Arc<MockTransport>) {
        lock(&self.script).push_back(ConnectOutcome::Transport(transport));
    }

    pub fn push_failure(&self, message: &str) {
        lock(&self.script).push_back(ConnectOutcome::Failure(message.to_string()));
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _url: &Url,
        cancel: &CancellationToken,
    ) -> TransportResult<Arc<dyn Transport>> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match lock(&self.script).pop_front() {
            Some(ConnectOutcome::Transport(transport)) => Ok(transport),
            Some(ConnectOutcome::Failure(message)) => Err(TransportError::Custom(message)),
            None => Err(TransportError::Custom("no scripted connection".to_string())),
        }
    }
}
