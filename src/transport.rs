use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("connection timeout")]
    Timeout,
    #[error("connection is closed")]
    ConnectionClosed,
    #[error("operation cancelled")]
    Cancelled,
    #[error("frame of {size} bytes exceeds the {max} byte receive buffer")]
    FrameTooLarge { size: usize, max: usize },
    #[error("invalid UTF-8 in text payload: {0}")]
    InvalidUtf8(String),
    #[error("url parsing error, {0} is not a valid url")]
    UrlParsing(String),
    #[error("custom: {0}")]
    Custom(String),
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Connection state of a transport, mirroring the RFC 6455 handshake phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
    None = 0,
    Connecting = 1,
    Open = 2,
    CloseSent = 3,
    CloseReceived = 4,
    Closed = 5,
    Aborted = 6,
}

impl TransportState {
    pub fn is_open(self) -> bool {
        self == TransportState::Open
    }
}

impl From<u8> for TransportState {
    fn from(value: u8) -> Self {
        match value {
            1 => TransportState::Connecting,
            2 => TransportState::Open,
            3 => TransportState::CloseSent,
            4 => TransportState::CloseReceived,
            5 => TransportState::Closed,
            6 => TransportState::Aborted,
            _ => TransportState::None,
        }
    }
}

/// Kind of a received or sent WebSocket frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
    Close,
}

/// Metadata describing a single received frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    pub kind: FrameKind,
    /// Number of valid bytes at the front of the receive buffer.
    pub count: usize,
    pub end_of_message: bool,
}

/// A full-duplex WebSocket frame channel, already connected.
///
/// The session manager drives exactly one reader (the receive loop) and
/// serializes writers through its send-lock; implementations only need to
/// keep `state`, `abort` and `close_info` safe for concurrent access.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Writes one frame. `end_of_message` marks the final fragment of a
    /// logical message.
    async fn send(
        &self,
        payload: &[u8],
        kind: FrameKind,
        end_of_message: bool,
        cancel: &CancellationToken,
    ) -> TransportResult<()>;

    /// Reads the next frame into `buffer` and describes it.
    ///
    /// Control frames (ping/pong) are absorbed internally and never surface.
    async fn receive(
        &self,
        buffer: &mut [u8],
        cancel: &CancellationToken,
    ) -> TransportResult<FrameInfo>;

    /// Initiates the close handshake.
    async fn close(
        &self,
        code: CloseCode,
        reason: &str,
        cancel: &CancellationToken,
    ) -> TransportResult<()>;

    /// Acknowledges a server-initiated close without waiting for more input.
    async fn close_output(
        &self,
        code: CloseCode,
        reason: &str,
        cancel: &CancellationToken,
    ) -> TransportResult<()>;

    /// Tears the connection down immediately, without a close handshake.
    fn abort(&self);

    fn state(&self) -> TransportState;

    /// The close frame received from the remote peer, if any.
    fn close_info(&self) -> Option<(CloseCode, String)>;

    /// Concrete-type escape hatch for [`Arc::downcast`].
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}
