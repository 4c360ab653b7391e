use std::sync::Arc;
use std::time::Duration;

use crate::transport::TransportError;

/// Session-level error type.
///
/// The transport-sourced variants hold their cause behind an [`Arc`] because
/// the same failure travels to two places: the return value of a fail-fast
/// facade call and the published
/// [`DisconnectionInfo`](crate::events::DisconnectionInfo).
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("session has already been disposed")]
    AlreadyDisposed,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("connection failed: {0}")]
    ConnectFailed(Arc<TransportError>),

    #[error("send failed: {0}")]
    SendFailed(Arc<TransportError>),

    #[error("receive failed: {0}")]
    ReceiveFailed(Arc<TransportError>),

    #[error("close failed: {0}")]
    CloseFailed(Arc<TransportError>),

    /// The active transport is not of the concrete type the caller asked for.
    #[error("transport type mismatch: {0}")]
    InvalidCast(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("channel sender error: {0}")]
    ChannelSender(#[from] kanal::SendError),

    #[error("channel receiver error: {0}")]
    ChannelReceiver(#[from] kanal::ReceiveError),

    #[error("failed to join task: {0}")]
    JoinTask(#[from] tokio::task::JoinError),

    #[error("tracing error: {0}")]
    Tracing(String),

    #[error("failed to execute '{task}' before the maximum allowed time of '{duration:?}'")]
    Timeout { task: String, duration: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type WsResult<T> = std::result::Result<T, WsError>;
