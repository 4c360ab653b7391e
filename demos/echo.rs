//! Connects to a public echo server, sends a few messages and prints what
//! comes back.
//!
//! ```bash
//! cargo run --example echo
//! ```

use std::time::Duration;

use futures_util::StreamExt;
use tracing::level_filters::LevelFilter;
use ws_session::builder::SessionBuilder;
use ws_session::error::WsResult;
use ws_session::utils::tracing::init_tracing;

#[tokio::main]
async fn main() -> WsResult<()> {
    init_tracing(LevelFilter::DEBUG)?;

    let session = SessionBuilder::new("wss://echo.websocket.org")
        .with_name("echo-demo")
        .with_reconnect_timeout(Some(Duration::from_secs(30)))
        .build()?;

    let mut messages = session.message_stream().into_stream();
    session.start().await?;

    session.send_text("hello")?;
    session.send_text("from")?;
    session.send_text("ws-session")?;

    let mut received = 0;
    while let Some(Ok(message)) = messages.next().await {
        println!("<- {message:?}");
        received += 1;
        if received >= 3 {
            break;
        }
    }

    session.dispose().await;
    Ok(())
}
