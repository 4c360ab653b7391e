//! Watches the lifecycle streams of a session while it reconnects.
//!
//! ```bash
//! cargo run --example lifecycle
//! ```

use std::time::Duration;

use tracing::level_filters::LevelFilter;
use ws_session::builder::SessionBuilder;
use ws_session::error::WsResult;
use ws_session::utils::tracing::init_tracing;

#[tokio::main]
async fn main() -> WsResult<()> {
    init_tracing(LevelFilter::DEBUG)?;

    let session = SessionBuilder::new("wss://echo.websocket.org")
        .with_name("lifecycle-demo")
        // An aggressive watchdog so the reconnect shows up quickly.
        .with_reconnect_timeout(Some(Duration::from_secs(10)))
        .with_error_reconnect_timeout(Some(Duration::from_secs(5)))
        .build()?;

    let mut reconnections = session.reconnections();
    let mut disconnections = session.disconnections();

    tokio::spawn(async move {
        while let Ok(info) = reconnections.recv().await {
            println!("reconnected: {:?}", info.kind);
        }
    });
    tokio::spawn(async move {
        while let Ok(info) = disconnections.recv().await {
            println!("disconnected: {:?}", info.kind);
        }
    });

    session.start().await?;
    tokio::time::sleep(Duration::from_secs(30)).await;

    session.stop(ws_session::CloseCode::Normal, "done").await?;
    session.dispose().await;
    Ok(())
}
