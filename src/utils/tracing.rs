use tracing::level_filters::LevelFilter;

use crate::error::{WsError, WsResult};

/// Installs a plain terminal subscriber at the given level.
///
/// The session itself only emits `tracing` events; embedding applications
/// bring their own subscriber and never call this. It exists for the demo
/// binaries and quick experiments.
pub fn init_tracing(level: LevelFilter) -> WsResult<()> {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .map_err(|err| WsError::Tracing(err.to_string()))
}
