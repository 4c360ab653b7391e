use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use ws_session::CloseCode;
use ws_session::builder::SessionBuilder;
use ws_session::client::WsSession;
use ws_session::error::WsError;
use ws_session::events::{
    DisconnectionInfo, DisconnectionKind, ReconnectionInfo, ReconnectionKind, ResponseMessage,
};
use ws_session::testing::{MockConnector, MockTransport, MockTransportHandle};
use ws_session::transport::FrameKind;

const WAIT: Duration = Duration::from_secs(2);

fn session_with(connector: &Arc<MockConnector>) -> WsSession {
    SessionBuilder::new("ws://127.0.0.1:1/test")
        .with_name("test")
        .with_connector(Arc::clone(connector))
        .with_reconnect_timeout(None)
        .with_error_reconnect_timeout(Some(Duration::from_millis(50)))
        .build()
        .expect("builder accepts a valid url")
}

async fn recv_reconnection(rx: &mut broadcast::Receiver<ReconnectionInfo>) -> ReconnectionInfo {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("no reconnection event arrived")
        .expect("reconnection stream closed")
}

async fn recv_disconnection(rx: &mut broadcast::Receiver<DisconnectionInfo>) -> DisconnectionInfo {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("no disconnection event arrived")
        .expect("disconnection stream closed")
}

async fn recv_message(rx: &mut broadcast::Receiver<ResponseMessage>) -> ResponseMessage {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("no message arrived")
        .expect("message stream closed")
}

/// Polls until the transport has recorded `count` outbound frames.
async fn wait_for_sends(handle: &MockTransportHandle, count: usize) {
    let deadline = Instant::now() + WAIT;
    while handle.sent().len() < count {
        assert!(Instant::now() < deadline, "expected {count} sends, got {:?}", handle.sent());
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn happy_path_delivers_frames_and_sends_text() {
    let connector = Arc::new(MockConnector::new());
    let (t1, h1) = MockTransport::pair();
    connector.push_transport(t1);

    let session = session_with(&connector);
    let mut messages = session.messages();
    let mut reconnections = session.reconnections();

    session.start().await.unwrap();
    assert_eq!(
        recv_reconnection(&mut reconnections).await.kind,
        ReconnectionKind::Initial
    );
    assert!(session.is_started());
    assert!(session.is_running());

    h1.push_binary(vec![0x01, 0x02, 0x03]);
    assert_eq!(
        recv_message(&mut messages).await,
        ResponseMessage::Binary(vec![0x01, 0x02, 0x03])
    );

    session.send_text("hi").unwrap();
    wait_for_sends(&h1, 1).await;
    let sent = h1.sent();
    assert_eq!(sent[0].kind, FrameKind::Text);
    assert_eq!(sent[0].payload, b"hi".to_vec());
    assert!(sent[0].end_of_message);

    session.dispose().await;
}

#[tokio::test]
async fn queued_sends_preserve_fifo_order() {
    let connector = Arc::new(MockConnector::new());
    let (t1, h1) = MockTransport::pair();
    connector.push_transport(t1);

    let session = session_with(&connector);
    session.start().await.unwrap();

    session.send_text("one").unwrap();
    session.send_text("two").unwrap();
    session.send_text("three").unwrap();
    wait_for_sends(&h1, 3).await;

    let payloads: Vec<Vec<u8>> = h1.sent().into_iter().map(|frame| frame.payload).collect();
    assert_eq!(payloads, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);

    session.dispose().await;
}

#[tokio::test]
async fn server_close_with_cancel_closing_reconnects_without_handshake() {
    let connector = Arc::new(MockConnector::new());
    let (t1, h1) = MockTransport::pair();
    let (t2, _h2) = MockTransport::pair();
    connector.push_transport(t1);
    connector.push_transport(t2);

    let session = session_with(&connector);
    session.on_disconnection(|info| {
        if info.kind == DisconnectionKind::ByServer {
            info.set_cancel_closing(true);
        }
    });
    let mut reconnections = session.reconnections();
    let mut disconnections = session.disconnections();

    session.start().await.unwrap();
    assert_eq!(
        recv_reconnection(&mut reconnections).await.kind,
        ReconnectionKind::Initial
    );

    h1.push_close(CloseCode::Normal, "bye");

    let info = recv_disconnection(&mut disconnections).await;
    assert_eq!(info.kind, DisconnectionKind::ByServer);
    assert_eq!(info.close_status, Some(CloseCode::Normal));
    assert_eq!(info.close_description.as_deref(), Some("bye"));

    assert_eq!(
        recv_reconnection(&mut reconnections).await.kind,
        ReconnectionKind::Lost
    );
    // The close handshake was cancelled: nothing was sent back, the old
    // transport was torn down hard.
    assert!(h1.closed_with().is_none());
    assert!(h1.is_aborted());

    // Exactly one reconnection follows.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(reconnections.try_recv().is_err());

    session.dispose().await;
}

#[tokio::test]
async fn server_close_completes_handshake_and_reconnects() {
    let connector = Arc::new(MockConnector::new());
    let (t1, h1) = MockTransport::pair();
    let (t2, _h2) = MockTransport::pair();
    connector.push_transport(t1);
    connector.push_transport(t2);

    let session = session_with(&connector);
    let mut reconnections = session.reconnections();
    let mut disconnections = session.disconnections();

    session.start().await.unwrap();
    assert_eq!(
        recv_reconnection(&mut reconnections).await.kind,
        ReconnectionKind::Initial
    );

    h1.push_close(CloseCode::Away, "maintenance");

    let info = recv_disconnection(&mut disconnections).await;
    assert_eq!(info.kind, DisconnectionKind::ByServer);
    assert_eq!(
        recv_reconnection(&mut reconnections).await.kind,
        ReconnectionKind::Lost
    );

    // The session acknowledged the close on the output side only.
    let (code, reason, output_only) = h1.closed_with().expect("close handshake ran");
    assert_eq!(code, CloseCode::Normal);
    assert_eq!(reason, "Closing");
    assert!(output_only);

    session.dispose().await;
}

#[tokio::test]
async fn cancel_closing_with_reconnection_disabled_stays_stopped() {
    let connector = Arc::new(MockConnector::new());
    let (t1, h1) = MockTransport::pair();
    connector.push_transport(t1);

    let session = SessionBuilder::new("ws://127.0.0.1:1/test")
        .with_connector(Arc::clone(&connector))
        .with_reconnection(false)
        .with_reconnect_timeout(None)
        .build()
        .unwrap();
    session.on_disconnection(|info| info.set_cancel_closing(true));
    let mut disconnections = session.disconnections();

    session.start().await.unwrap();
    h1.push_close(CloseCode::Normal, "bye");

    let info = recv_disconnection(&mut disconnections).await;
    assert_eq!(info.kind, DisconnectionKind::ByServer);

    // With reconnection disabled the cancel flag has no effect: the close
    // handshake completes and the session goes to stopped.
    let deadline = Instant::now() + WAIT;
    while session.is_started() {
        assert!(Instant::now() < deadline, "session never stopped");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!session.is_running());
    assert!(h1.closed_with().is_some());
    assert_eq!(connector.attempts(), 1);

    session.dispose().await;
}

#[tokio::test]
async fn watchdog_reconnects_when_no_message_arrives() {
    let connector = Arc::new(MockConnector::new());
    let (t1, _h1) = MockTransport::pair();
    let (t2, _h2) = MockTransport::pair();
    connector.push_transport(t1);
    connector.push_transport(t2);

    let session = SessionBuilder::new("ws://127.0.0.1:1/test")
        .with_connector(Arc::clone(&connector))
        .with_reconnect_timeout(Some(Duration::from_millis(100)))
        .build()
        .unwrap();
    let mut reconnections = session.reconnections();
    let mut disconnections = session.disconnections();

    session.start().await.unwrap();
    assert_eq!(
        recv_reconnection(&mut reconnections).await.kind,
        ReconnectionKind::Initial
    );

    // No inbound traffic: the watchdog must fire.
    let info = recv_disconnection(&mut disconnections).await;
    assert_eq!(info.kind, DisconnectionKind::NoMessageReceived);
    assert_eq!(
        recv_reconnection(&mut reconnections).await.kind,
        ReconnectionKind::NoMessageReceived
    );
    assert_eq!(connector.attempts(), 2);

    session.dispose().await;
}

#[tokio::test]
async fn connect_failure_retries_after_error_timeout() {
    let connector = Arc::new(MockConnector::new());
    let (t1, _h1) = MockTransport::pair();
    connector.push_failure("connection refused");
    connector.push_transport(t1);

    let session = session_with(&connector);
    let mut reconnections = session.reconnections();
    let mut disconnections = session.disconnections();

    let started = Instant::now();
    session.start().await.unwrap();

    let info = recv_disconnection(&mut disconnections).await;
    assert_eq!(info.kind, DisconnectionKind::Error);
    assert!(matches!(
        info.error.as_deref(),
        Some(WsError::ConnectFailed(_))
    ));

    assert_eq!(
        recv_reconnection(&mut reconnections).await.kind,
        ReconnectionKind::Error
    );
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(connector.attempts(), 2);
    assert!(session.is_running());

    session.dispose().await;
}

#[tokio::test]
async fn start_or_fail_propagates_the_first_connect_error() {
    let connector = Arc::new(MockConnector::new());
    connector.push_failure("connection refused");

    let session = session_with(&connector);
    let err = session.start_or_fail().await.unwrap_err();
    assert!(matches!(err, WsError::ConnectFailed(_)));
    assert_eq!(connector.attempts(), 1);

    session.dispose().await;
}

#[tokio::test]
async fn cancel_reconnection_stops_the_retry_loop() {
    let connector = Arc::new(MockConnector::new());
    connector.push_failure("connection refused");

    let session = session_with(&connector);
    session.on_disconnection(|info| info.set_cancel_reconnection(true));

    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // No retry happened and the session still counts as started.
    assert_eq!(connector.attempts(), 1);
    assert!(session.is_started());
    assert!(!session.is_running());

    session.dispose().await;
}

#[tokio::test]
async fn stop_or_fail_propagates_close_errors() {
    let connector = Arc::new(MockConnector::new());
    let (t1, h1) = MockTransport::pair();
    connector.push_transport(t1);

    let session = session_with(&connector);
    session.start().await.unwrap();

    h1.fail_next_close();
    let err = session
        .stop_or_fail(CloseCode::Normal, "done")
        .await
        .unwrap_err();
    assert!(matches!(err, WsError::CloseFailed(_)));
    assert!(!session.is_running());
    assert!(!session.is_started());

    session.dispose().await;
}

#[tokio::test]
async fn stop_is_observable_exactly_once() {
    let connector = Arc::new(MockConnector::new());
    let (t1, h1) = MockTransport::pair();
    connector.push_transport(t1);

    let session = session_with(&connector);
    let mut disconnections = session.disconnections();
    session.start().await.unwrap();

    assert!(session.stop(CloseCode::Normal, "done").await.unwrap());
    let info = recv_disconnection(&mut disconnections).await;
    assert_eq!(info.kind, DisconnectionKind::ByUser);
    let (_, _, output_only) = h1.closed_with().expect("close ran");
    assert!(!output_only);

    // A second stop finds nothing to do and publishes nothing.
    assert!(!session.stop(CloseCode::Normal, "again").await.unwrap());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(disconnections.try_recv().is_err());

    session.dispose().await;
}

#[tokio::test]
async fn restart_after_stop_connects_again() {
    let connector = Arc::new(MockConnector::new());
    let (t1, _h1) = MockTransport::pair();
    let (t2, _h2) = MockTransport::pair();
    connector.push_transport(t1);
    connector.push_transport(t2);

    let session = session_with(&connector);
    session.start().await.unwrap();
    session.stop(CloseCode::Normal, "break").await.unwrap();
    assert!(!session.is_started());

    session.start().await.unwrap();
    assert!(session.is_running());
    assert_eq!(connector.attempts(), 2);

    session.dispose().await;
}

#[tokio::test]
async fn start_twice_is_a_noop() {
    let connector = Arc::new(MockConnector::new());
    let (t1, _h1) = MockTransport::pair();
    connector.push_transport(t1);

    let session = session_with(&connector);
    session.start().await.unwrap();
    session.start().await.unwrap();
    assert_eq!(connector.attempts(), 1);

    session.dispose().await;
}

#[tokio::test]
async fn user_reconnect_cycles_the_connection() {
    let connector = Arc::new(MockConnector::new());
    let (t1, _h1) = MockTransport::pair();
    let (t2, _h2) = MockTransport::pair();
    connector.push_transport(t1);
    connector.push_transport(t2);

    let session = session_with(&connector);
    let mut reconnections = session.reconnections();
    let mut disconnections = session.disconnections();

    session.start().await.unwrap();
    assert_eq!(
        recv_reconnection(&mut reconnections).await.kind,
        ReconnectionKind::Initial
    );

    session.reconnect().await.unwrap();
    assert_eq!(
        recv_disconnection(&mut disconnections).await.kind,
        DisconnectionKind::ByUser
    );
    assert_eq!(
        recv_reconnection(&mut reconnections).await.kind,
        ReconnectionKind::ByUser
    );
    assert_eq!(connector.attempts(), 2);

    session.dispose().await;
}

#[tokio::test]
async fn lost_stream_reconnects_with_the_cause_attached() {
    let connector = Arc::new(MockConnector::new());
    let (t1, h1) = MockTransport::pair();
    let (t2, _h2) = MockTransport::pair();
    connector.push_transport(t1);
    connector.push_transport(t2);

    let session = session_with(&connector);
    let mut reconnections = session.reconnections();
    let mut disconnections = session.disconnections();

    session.start().await.unwrap();
    assert_eq!(
        recv_reconnection(&mut reconnections).await.kind,
        ReconnectionKind::Initial
    );

    h1.push_error("connection reset by peer");

    let info = recv_disconnection(&mut disconnections).await;
    assert_eq!(info.kind, DisconnectionKind::Lost);
    assert!(matches!(
        info.error.as_deref(),
        Some(WsError::ReceiveFailed(_))
    ));
    assert_eq!(
        recv_reconnection(&mut reconnections).await.kind,
        ReconnectionKind::Lost
    );

    session.dispose().await;
}

#[tokio::test]
async fn zero_length_frames_are_not_published() {
    let connector = Arc::new(MockConnector::new());
    let (t1, h1) = MockTransport::pair();
    connector.push_transport(t1);

    let session = session_with(&connector);
    let mut messages = session.messages();
    session.start().await.unwrap();

    h1.push_binary(Vec::new());
    h1.push_binary(vec![0x05]);

    // Only the non-empty frame surfaces.
    assert_eq!(
        recv_message(&mut messages).await,
        ResponseMessage::Binary(vec![0x05])
    );

    session.dispose().await;
}

#[tokio::test]
async fn text_frames_follow_the_conversion_settings() {
    let connector = Arc::new(MockConnector::new());
    let (t1, h1) = MockTransport::pair();
    connector.push_transport(t1);

    let session = session_with(&connector);
    let mut messages = session.messages();
    session.start().await.unwrap();

    h1.push_text("hello");
    assert_eq!(
        recv_message(&mut messages).await,
        ResponseMessage::Text("hello".to_string())
    );

    // Invalid UTF-8 in a text frame falls back to binary delivery.
    h1.push_text_bytes(vec![0xff, 0xfe]);
    assert_eq!(
        recv_message(&mut messages).await,
        ResponseMessage::Binary(vec![0xff, 0xfe])
    );

    // Conversion off: everything is binary.
    session.set_text_message_conversion_enabled(false);
    h1.push_text("raw");
    assert_eq!(
        recv_message(&mut messages).await,
        ResponseMessage::Binary(b"raw".to_vec())
    );

    session.dispose().await;
}

#[tokio::test]
async fn stream_fake_message_reaches_subscribers() {
    let connector = Arc::new(MockConnector::new());
    let session = session_with(&connector);
    let mut messages = session.messages();

    session.stream_fake_message(ResponseMessage::Text("fake".to_string()));
    assert_eq!(
        recv_message(&mut messages).await,
        ResponseMessage::Text("fake".to_string())
    );

    session.dispose().await;
}

#[tokio::test]
async fn dispose_is_idempotent_and_final() {
    let connector = Arc::new(MockConnector::new());
    let (t1, _h1) = MockTransport::pair();
    connector.push_transport(t1);

    let session = session_with(&connector);
    let mut disconnections = session.disconnections();
    let mut messages = session.messages();
    session.start().await.unwrap();

    session.send_text("racing the shutdown").unwrap();
    session.dispose().await;
    session.dispose().await;

    assert!(session.is_disposed());
    assert!(!session.is_running());
    assert!(!session.is_started());

    // A running session announces its exit, then every stream completes.
    let info = recv_disconnection(&mut disconnections).await;
    assert_eq!(info.kind, DisconnectionKind::Exit);
    assert!(matches!(
        disconnections.recv().await,
        Err(broadcast::error::RecvError::Closed)
    ));

    // Nothing is published after disposal.
    session.stream_fake_message(ResponseMessage::Text("late".to_string()));
    assert!(matches!(
        messages.recv().await,
        Err(broadcast::error::RecvError::Closed)
    ));

    // Further operations fail fast.
    assert!(matches!(
        session.start().await,
        Err(WsError::AlreadyDisposed)
    ));
    assert!(matches!(
        session.send_text("nope"),
        Err(WsError::AlreadyDisposed)
    ));
    assert!(matches!(
        session.stop(CloseCode::Normal, "nope").await,
        Err(WsError::AlreadyDisposed)
    ));
}

#[tokio::test]
async fn sends_target_the_current_transport_after_reconnect() {
    let connector = Arc::new(MockConnector::new());
    let (t1, h1) = MockTransport::pair();
    let (t2, h2) = MockTransport::pair();
    connector.push_transport(t1);
    connector.push_transport(t2);

    let session = session_with(&connector);
    let mut reconnections = session.reconnections();
    session.start().await.unwrap();
    assert_eq!(
        recv_reconnection(&mut reconnections).await.kind,
        ReconnectionKind::Initial
    );

    // Cut the stream, then enqueue while the session is between transports.
    h1.push_error("gone");
    assert_eq!(
        recv_reconnection(&mut reconnections).await.kind,
        ReconnectionKind::Lost
    );

    session.send_text("after reconnect").unwrap();
    wait_for_sends(&h2, 1).await;
    assert_eq!(h2.sent()[0].payload, b"after reconnect".to_vec());
    assert!(h1.sent().is_empty());

    session.dispose().await;
}

#[tokio::test]
async fn native_transport_downcast_reports_invalid_cast() {
    let connector = Arc::new(MockConnector::new());
    let (t1, _h1) = MockTransport::pair();
    connector.push_transport(t1);

    let session = session_with(&connector);

    // Not started yet: no transport at all.
    assert!(matches!(
        session.native_transport(),
        Err(WsError::InvalidInput(_))
    ));

    session.start().await.unwrap();
    // The mock is not the native tungstenite transport.
    assert!(matches!(
        session.native_transport(),
        Err(WsError::InvalidCast(_))
    ));

    session.dispose().await;
}
