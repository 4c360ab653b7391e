use std::sync::RwLock;

use tokio_util::sync::CancellationToken;

use crate::utils::write_lock;

/// The two nested cancellation lifetimes of a session.
///
/// The *session* token is a child of the *total* token and is rotated on
/// every stop/reconnect boundary; the total token is cancelled only on
/// dispose, which transitively cancels whichever session child is current.
#[derive(Debug)]
pub(crate) struct Scopes {
    total: CancellationToken,
    session: RwLock<CancellationToken>,
}

impl Scopes {
    pub fn new() -> Self {
        let total = CancellationToken::new();
        let session = RwLock::new(total.child_token());
        Self { total, session }
    }

    pub fn total(&self) -> CancellationToken {
        self.total.clone()
    }

    pub fn session(&self) -> CancellationToken {
        crate::utils::read_lock(&self.session).clone()
    }

    /// Cancels the current session scope and installs a fresh child.
    pub fn rotate_session(&self) {
        let mut guard = write_lock(&self.session);
        guard.cancel();
        *guard = self.total.child_token();
    }

    /// Cancels everything, session first.
    pub fn cancel_all(&self) {
        crate::utils::read_lock(&self.session).cancel();
        self.total.cancel();
    }
}
