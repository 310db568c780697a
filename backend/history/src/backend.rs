use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;
use uuid::Uuid;

use parley_core::ParleyError;

/// Token proving ownership of a held lock.
pub type LockToken = String;

/// Abstract interface for the key-value store the history runs against.
///
/// `acquire_lock` blocks while the name is contended and errors only if
/// the backend itself fails; contention is never a fast-fail because a
/// history read-modify-write is neither idempotent nor mergeable.
/// `release_lock` errors if the token no longer holds the lock (never
/// held, or expired under the backend's staleness timeout).
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Fetch the bytes stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ParleyError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), ParleyError>;

    /// Block until the named lock is free, then take it.
    async fn acquire_lock(&self, name: &str) -> Result<LockToken, ParleyError>;

    /// Release the named lock held by `token`.
    async fn release_lock(&self, name: &str, token: &str) -> Result<(), ParleyError>;
}

/// In-memory backend for tests and single-process use.
#[derive(Default)]
pub struct InMemoryBackend {
    data: Mutex<HashMap<String, Vec<u8>>>,
    locks: Mutex<HashMap<String, LockToken>>,
    released: Notify,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ParleyError> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), ParleyError> {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn acquire_lock(&self, name: &str) -> Result<LockToken, ParleyError> {
        loop {
            // Subscribe before checking, so a release between the check
            // and the await is not missed.
            let released = self.released.notified();
            {
                let mut locks = self.locks.lock().unwrap();
                if !locks.contains_key(name) {
                    let token = Uuid::new_v4().to_string();
                    locks.insert(name.to_string(), token.clone());
                    return Ok(token);
                }
            }
            released.await;
        }
    }

    async fn release_lock(&self, name: &str, token: &str) -> Result<(), ParleyError> {
        {
            let mut locks = self.locks.lock().unwrap();
            match locks.get(name) {
                Some(held) if held == token => {
                    locks.remove(name);
                }
                _ => {
                    return Err(ParleyError::LockReleaseError(format!(
                        "lock {name} is not held by this token"
                    )));
                }
            }
        }
        self.released.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_get_returns_none_for_absent_key() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_then_get_roundtrip() {
        let backend = InMemoryBackend::new();
        backend.set("k", b"value").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"value".to_vec()));
    }

    #[tokio::test]
    async fn test_second_acquire_blocks_until_release() {
        let backend = Arc::new(InMemoryBackend::new());
        let token = backend.acquire_lock("the-lock").await.unwrap();

        let entered = Arc::new(AtomicBool::new(false));
        let waiter = {
            let backend = Arc::clone(&backend);
            let entered = Arc::clone(&entered);
            tokio::spawn(async move {
                let token = backend.acquire_lock("the-lock").await.unwrap();
                entered.store(true, Ordering::SeqCst);
                backend.release_lock("the-lock", &token).await.unwrap();
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!entered.load(Ordering::SeqCst));

        backend.release_lock("the-lock", &token).await.unwrap();
        waiter.await.unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_locks_for_different_names_are_independent() {
        let backend = InMemoryBackend::new();
        let a = backend.acquire_lock("lock-a").await.unwrap();
        let b = backend.acquire_lock("lock-b").await.unwrap();
        backend.release_lock("lock-a", &a).await.unwrap();
        backend.release_lock("lock-b", &b).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_with_foreign_token_fails() {
        let backend = InMemoryBackend::new();
        let _held = backend.acquire_lock("the-lock").await.unwrap();
        let err = backend
            .release_lock("the-lock", "not-the-token")
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::LockReleaseError(_)));
    }

    #[tokio::test]
    async fn test_release_of_unheld_lock_fails() {
        let backend = InMemoryBackend::new();
        let err = backend
            .release_lock("never-held", "token")
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::LockReleaseError(_)));
    }
}
