use std::time::Duration;

use core::future::Future;

use crate::error::{WsError, WsResult};

pub async fn timeout<F, T, E>(duration: Duration, future: F, task: String) -> WsResult<T>
where
    E: Into<WsError>,
    F: Future<Output = Result<T, E>>,
{
    tokio::select! {
        _ = tokio::time::sleep(duration) => Err(WsError::Timeout { task, duration }),
        result = future => match result {
            Ok(value) => Ok(value),
            Err(err) => Err(err.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_a_fast_future() {
        let res = timeout(
            Duration::from_secs(1),
            async { Ok::<_, WsError>(42) },
            "fast".to_string(),
        )
        .await;
        assert_eq!(res.unwrap(), 42);
    }

    #[tokio::test]
    async fn reports_the_task_name_on_expiry() {
        let res: WsResult<()> = timeout(
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, WsError>(())
            },
            "slow".to_string(),
        )
        .await;
        match res {
            Err(WsError::Timeout { task, .. }) => assert_eq!(task, "slow"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
