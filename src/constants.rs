use std::time::Duration;

/// Size of the reusable read buffer owned by the receive loop.
pub const RECEIVE_BUFFER_SIZE: usize = 50 * 1024 * 1024;

/// Capacity of the outbound text/binary queues and the inbound receive queue.
pub const QUEUE_CAPACITY: usize = 256;

/// Capacity of the `message_received` broadcast channel.
pub const MESSAGE_EVENT_CAPACITY: usize = 1024;

/// Capacity of the lifecycle (reconnection/disconnection) broadcast channels.
pub const LIFECYCLE_EVENT_CAPACITY: usize = 64;

/// Upper bound on how long `dispose` waits for a queue worker to drain.
pub const QUEUE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default no-message watchdog window.
pub const DEFAULT_RECONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default delay before retrying a failed connect.
pub const DEFAULT_ERROR_RECONNECT_TIMEOUT: Duration = Duration::from_secs(60);
