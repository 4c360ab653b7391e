use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ws_session::error::WsError;
use ws_session::queue::WorkQueue;

async fn wait_until(check: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(Instant::now() < deadline, "condition never became true");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn items_are_handled_in_fifo_order() {
    let queue: WorkQueue<u32> = WorkQueue::new("fifo", 32);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    queue.start(move |item| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().push(item);
            Ok(())
        }
    });

    for i in 0..10 {
        assert!(queue.add(i));
    }
    wait_until(|| seen.lock().unwrap().len() == 10).await;
    assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<u32>>());

    queue.dispose(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn handler_errors_do_not_kill_the_worker() {
    let queue: WorkQueue<u32> = WorkQueue::new("errors", 32);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    queue.start(move |item| {
        let sink = Arc::clone(&sink);
        async move {
            if item % 2 == 0 {
                return Err(WsError::InvalidInput("even items are broken".to_string()));
            }
            sink.lock().unwrap().push(item);
            Ok(())
        }
    });

    for i in 0..6 {
        assert!(queue.add(i));
    }
    wait_until(|| seen.lock().unwrap().len() == 3).await;
    assert_eq!(*seen.lock().unwrap(), vec![1, 3, 5]);

    queue.dispose(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn add_never_blocks_when_the_queue_is_full() {
    // Capacity one and a handler that never finishes.
    let queue: WorkQueue<u32> = WorkQueue::new("full", 1);
    queue.start(|_| async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    });

    // The first item goes to the stuck handler, the second fills the buffer.
    assert!(queue.add(1));
    let started = Instant::now();
    let mut accepted = 0;
    for i in 0..32 {
        if queue.add(i) {
            accepted += 1;
        }
    }
    // Some adds were rejected instead of blocking.
    assert!(accepted < 32);
    assert!(started.elapsed() < Duration::from_millis(500));

    // Dispose cannot wait for the stuck handler forever.
    let drain_started = Instant::now();
    queue.dispose(Duration::from_millis(100)).await;
    assert!(drain_started.elapsed() < Duration::from_secs(2));
}
