use std::sync::Mutex;
use std::time::Duration;

use kanal::{AsyncReceiver, Sender, bounded_async};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::WsResult;
use crate::utils::{lock, time::timeout};

/// A bounded FIFO queue drained by a single worker task.
///
/// `add` never blocks; items that do not fit are dropped with a warning.
/// Handler errors are logged and swallowed, the worker moves on to the next
/// item. `dispose` signals end-of-input, lets the worker drain what is
/// buffered and aborts it if the drain exceeds its bound.
pub struct WorkQueue<T> {
    name: &'static str,
    tx: Mutex<Option<Sender<T>>>,
    rx: Mutex<Option<AsyncReceiver<T>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> WorkQueue<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = bounded_async(capacity);
        Self {
            name,
            tx: Mutex::new(Some(tx.to_sync())),
            rx: Mutex::new(Some(rx)),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the single consumer. A second call is a no-op.
    pub fn start<F, Fut>(&self, handler: F)
    where
        F: Fn(T) -> Fut + Send + 'static,
        Fut: Future<Output = WsResult<()>> + Send + 'static,
    {
        let Some(rx) = lock(&self.rx).take() else {
            warn!(target: "Queue", queue = self.name, "worker already started");
            return;
        };
        let name = self.name;
        let handle = tokio::spawn(async move {
            while let Ok(item) = rx.recv().await {
                if let Err(err) = handler(item).await {
                    error!(target: "Queue", queue = name, "handler error: {err}");
                }
            }
            debug!(target: "Queue", queue = name, "worker exited");
        });
        *lock(&self.worker) = Some(handle);
    }

    /// Enqueues without blocking. Returns `false` when the queue is full or
    /// already disposed.
    pub fn add(&self, item: T) -> bool {
        match lock(&self.tx).as_ref() {
            Some(tx) => match tx.try_send(item) {
                Ok(true) => true,
                Ok(false) => {
                    warn!(target: "Queue", queue = self.name, "queue full, item dropped");
                    false
                }
                Err(_) => false,
            },
            None => false,
        }
    }

    /// Closes the input side and waits for the worker to finish draining,
    /// bounded by `drain`.
    pub async fn dispose(&self, drain: Duration) {
        // Dropping the sender lets the worker consume what is buffered and
        // then observe end-of-input.
        lock(&self.tx).take();
        let handle = lock(&self.worker).take();
        if let Some(mut handle) = handle
            && timeout(drain, &mut handle, format!("{} drain", self.name))
                .await
                .is_err()
        {
            warn!(target: "Queue", queue = self.name, "drain exceeded its bound, aborting worker");
            handle.abort();
        }
    }
}
