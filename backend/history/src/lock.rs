use std::sync::Arc;

use tracing::warn;

use parley_core::ParleyError;

use crate::backend::{KvBackend, LockToken};

/// Exclusive hold on one owner's history key.
///
/// Must be released on every exit path of the critical section. Rust
/// has no async `Drop`, so a guard dropped while still held (task
/// cancellation, a crash mid-section) only logs a warning and leaves
/// the backend's lock TTL to free the key.
pub struct HistoryLock {
    backend: Arc<dyn KvBackend>,
    name: String,
    token: Option<LockToken>,
}

impl HistoryLock {
    pub(crate) fn new(backend: Arc<dyn KvBackend>, name: String, token: LockToken) -> Self {
        Self {
            backend,
            name,
            token: Some(token),
        }
    }

    /// The lock key this guard holds.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the lock. Consumes the guard; releasing twice is
    /// impossible by construction.
    pub async fn release(mut self) -> Result<(), ParleyError> {
        match self.token.take() {
            Some(token) => self.backend.release_lock(&self.name, &token).await,
            None => Ok(()),
        }
    }
}

impl Drop for HistoryLock {
    fn drop(&mut self) {
        if self.token.is_some() {
            warn!(
                lock = %self.name,
                "history lock dropped without release; backend TTL will expire it"
            );
        }
    }
}
