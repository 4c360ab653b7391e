use std::time::Duration;

use futures_util::{Stream, stream::unfold};
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::{WsError, WsResult};
use crate::events::ResponseMessage;

/// Adapts a `message_received` subscription into a [`Stream`].
///
/// Lagged subscribers skip the frames they lost and keep going; the stream
/// ends when the session completes its event streams.
pub struct MessageStream {
    inner: broadcast::Receiver<ResponseMessage>,
    timeout: Option<Duration>,
}

impl MessageStream {
    pub fn new(inner: broadcast::Receiver<ResponseMessage>) -> Self {
        Self {
            inner,
            timeout: None,
        }
    }

    pub fn new_timed(
        inner: broadcast::Receiver<ResponseMessage>,
        timeout: Option<Duration>,
    ) -> Self {
        Self { inner, timeout }
    }

    async fn receive(&mut self) -> Option<WsResult<ResponseMessage>> {
        loop {
            let next = self.inner.recv();
            let result = match self.timeout {
                Some(duration) => match tokio::time::timeout(duration, next).await {
                    Ok(result) => result,
                    Err(_) => {
                        return Some(Err(WsError::Timeout {
                            task: "MessageStream".to_string(),
                            duration,
                        }));
                    }
                },
                None => next.await,
            };
            match result {
                Ok(message) => return Some(Ok(message)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "Session", skipped, "message stream lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = WsResult<ResponseMessage>> {
        Box::pin(unfold(self, |mut state| async move {
            let item = state.receive().await?;
            Some((item, state))
        }))
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;

    #[tokio::test]
    async fn delivers_published_messages_in_order() {
        let (tx, rx) = broadcast::channel(8);
        let mut stream = MessageStream::new(rx).into_stream();
        tx.send(ResponseMessage::Text("a".to_string())).unwrap();
        tx.send(ResponseMessage::Binary(vec![1, 2])).unwrap();

        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            ResponseMessage::Text("a".to_string())
        );
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            ResponseMessage::Binary(vec![1, 2])
        );
    }

    #[tokio::test]
    async fn ends_when_the_publisher_goes_away() {
        let (tx, rx) = broadcast::channel::<ResponseMessage>(8);
        let mut stream = MessageStream::new(rx).into_stream();
        drop(tx);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn reports_a_timeout_between_items() {
        let (tx, rx) = broadcast::channel::<ResponseMessage>(8);
        let mut stream =
            MessageStream::new_timed(rx, Some(Duration::from_millis(20))).into_stream();

        let item = stream.next().await.unwrap();
        assert!(matches!(item, Err(WsError::Timeout { .. })));
        drop(tx);
    }
}
