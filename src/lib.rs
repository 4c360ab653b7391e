//! Resilient client-side WebSocket session manager.
//!
//! A [`WsSession`] maintains one logical connection to a remote endpoint:
//! it absorbs transient failures by reconnecting automatically, serializes
//! outbound traffic through bounded queues, and delivers inbound frames and
//! lifecycle changes through broadcast event streams.
//!
//! # Modules
//! - `builder`: assembling a session.
//! - `client`: the public facade.
//! - `config`: tunables and their defaults.
//! - `connector`: the transport factory and the tungstenite default.
//! - `error`: error types.
//! - `events`: event payloads and the fan-out streams.
//! - `queue`: the bounded single-consumer work queue.
//! - `session`: lifecycle controller, receive loop, dispatcher, watchdog.
//! - `testing`: scripted transports for tests.
//! - `transport`: the frame-level transport contract.
//! - `utils`: timeout, tracing and stream helpers.
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use ws_session::builder::SessionBuilder;
//!
//! # async fn run() -> ws_session::error::WsResult<()> {
//! let session = SessionBuilder::new("wss://example.com/feed").build()?;
//! let mut messages = session.message_stream().into_stream();
//! session.start().await?;
//! while let Some(Ok(message)) = messages.next().await {
//!     println!("{message:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod client;
pub mod config;
pub mod connector;
pub mod constants;
pub mod error;
pub mod events;
pub mod queue;
mod scopes;
mod session;
pub mod testing;
pub mod transport;
pub mod utils;

pub use builder::SessionBuilder;
pub use client::WsSession;
pub use config::{MessageEncoding, SessionConfig};
pub use connector::{Connector, TungsteniteConnector, TungsteniteTransport};
pub use error::{WsError, WsResult};
pub use events::{
    DisconnectionInfo, DisconnectionKind, ReconnectionInfo, ReconnectionKind, ResponseMessage,
};
pub use transport::{FrameInfo, FrameKind, Transport, TransportError, TransportState};

// The close code vocabulary of the underlying stack is part of our API.
pub use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
