use std::any::Any;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::transport::{
    FrameInfo, FrameKind, Transport, TransportError, TransportResult, TransportState,
};
use crate::utils::lock;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Factory for connected transports. The session manager invokes it on every
/// initial connect and on every reconnect.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> TransportResult<Arc<dyn Transport>>;
}

#[async_trait]
impl<C: Connector + ?Sized> Connector for Arc<C> {
    async fn connect(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> TransportResult<Arc<dyn Transport>> {
        (**self).connect(url, cancel).await
    }
}

/// Default connector backed by `tokio-tungstenite`.
#[derive(Debug, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> TransportResult<Arc<dyn Transport>> {
        debug!(target: "Transport", url = %url, "connecting");
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = tokio_tungstenite::connect_async(url.as_str()) => match result {
                Ok((stream, _response)) => stream,
                Err(err) => return Err(TransportError::ConnectionFailed(Box::new(err))),
            },
        };
        debug!(target: "Transport", url = %url, "connected");
        Ok(Arc::new(TungsteniteTransport::new(stream)))
    }
}

/// A connected tungstenite stream behind the [`Transport`] contract.
///
/// The sink and stream halves live behind independent async mutexes: the
/// session's send-lock serializes writers above us, and the receive loop is
/// the sole reader.
pub struct TungsteniteTransport {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    state: AtomicU8,
    close_frame: StdMutex<Option<(CloseCode, String)>>,
    aborted: CancellationToken,
}

impl TungsteniteTransport {
    pub fn new(stream: WsStream) -> Self {
        let (sink, stream) = stream.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            state: AtomicU8::new(TransportState::Open as u8),
            close_frame: StdMutex::new(None),
            aborted: CancellationToken::new(),
        }
    }

    fn set_state(&self, state: TransportState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn mark_close_sent(&self) {
        match self.state() {
            TransportState::CloseReceived => self.set_state(TransportState::Closed),
            TransportState::Open => self.set_state(TransportState::CloseSent),
            _ => {}
        }
    }

    fn mark_close_received(&self) {
        match self.state() {
            TransportState::CloseSent => self.set_state(TransportState::Closed),
            TransportState::Open => self.set_state(TransportState::CloseReceived),
            _ => {}
        }
    }

    async fn send_close_frame(
        &self,
        code: CloseCode,
        reason: &str,
        cancel: &CancellationToken,
    ) -> TransportResult<()> {
        let frame = CloseFrame {
            code,
            reason: Utf8Bytes::from(reason.to_string()),
        };
        let mut sink = tokio::select! {
            biased;
            _ = self.aborted.cancelled() => return Err(TransportError::Cancelled),
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            guard = self.sink.lock() => guard,
        };
        sink.send(Message::Close(Some(frame)))
            .await
            .map_err(|err| TransportError::ConnectionFailed(Box::new(err)))?;
        self.mark_close_sent();
        Ok(())
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn send(
        &self,
        payload: &[u8],
        kind: FrameKind,
        _end_of_message: bool,
        cancel: &CancellationToken,
    ) -> TransportResult<()> {
        // Sending stays legal while a server close is still being processed.
        if !matches!(
            self.state(),
            TransportState::Open | TransportState::CloseReceived
        ) {
            return Err(TransportError::ConnectionClosed);
        }
        let message = match kind {
            FrameKind::Text => {
                let text = std::str::from_utf8(payload)
                    .map_err(|err| TransportError::InvalidUtf8(err.to_string()))?;
                Message::text(text.to_string())
            }
            FrameKind::Binary => Message::binary(payload.to_vec()),
            FrameKind::Close => {
                return Err(TransportError::Custom(
                    "close frames go through close()".to_string(),
                ));
            }
        };
        let mut sink = tokio::select! {
            biased;
            _ = self.aborted.cancelled() => return Err(TransportError::Cancelled),
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            guard = self.sink.lock() => guard,
        };
        sink.send(message)
            .await
            .map_err(|err| TransportError::ConnectionFailed(Box::new(err)))
    }

    async fn receive(
        &self,
        buffer: &mut [u8],
        cancel: &CancellationToken,
    ) -> TransportResult<FrameInfo> {
        let mut stream = self.stream.lock().await;
        loop {
            let message = tokio::select! {
                biased;
                _ = self.aborted.cancelled() => return Err(TransportError::Cancelled),
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                message = stream.next() => message,
            };
            let payload: (&[u8], FrameKind) = match &message {
                Some(Ok(Message::Text(text))) => (text.as_str().as_bytes(), FrameKind::Text),
                Some(Ok(Message::Binary(data))) => (data.as_ref(), FrameKind::Binary),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // tungstenite queues the pong reply itself.
                    trace!(target: "Transport", "control frame absorbed");
                    continue;
                }
                Some(Ok(Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        debug!(target: "Transport", code = %frame.code, "close frame received");
                        *lock(&self.close_frame) =
                            Some((frame.code, frame.reason.as_str().to_string()));
                    } else {
                        debug!(target: "Transport", "close frame received (no payload)");
                        *lock(&self.close_frame) = Some((CloseCode::Normal, String::new()));
                    }
                    self.mark_close_received();
                    return Ok(FrameInfo {
                        kind: FrameKind::Close,
                        count: 0,
                        end_of_message: true,
                    });
                }
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(err)) => {
                    self.set_state(TransportState::Closed);
                    return Err(TransportError::Custom(err.to_string()));
                }
                None => {
                    self.set_state(TransportState::Closed);
                    return Err(TransportError::ConnectionClosed);
                }
            };
            let (bytes, kind) = payload;
            if bytes.len() > buffer.len() {
                warn!(target: "Transport", size = bytes.len(), "frame exceeds receive buffer");
                return Err(TransportError::FrameTooLarge {
                    size: bytes.len(),
                    max: buffer.len(),
                });
            }
            buffer[..bytes.len()].copy_from_slice(bytes);
            return Ok(FrameInfo {
                kind,
                count: bytes.len(),
                end_of_message: true,
            });
        }
    }

    async fn close(
        &self,
        code: CloseCode,
        reason: &str,
        cancel: &CancellationToken,
    ) -> TransportResult<()> {
        self.send_close_frame(code, reason, cancel).await?;
        // The peer's acknowledgement arrives on the read side, which the
        // receive loop owns; the handshake completes there.
        Ok(())
    }

    async fn close_output(
        &self,
        code: CloseCode,
        reason: &str,
        cancel: &CancellationToken,
    ) -> TransportResult<()> {
        self.send_close_frame(code, reason, cancel).await
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
