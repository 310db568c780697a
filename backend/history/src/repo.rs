//! Records, retrieves, and manipulates per-user conversation history.

use std::sync::Arc;

use tracing::{debug, warn};

use parley_core::{ConversationHistory, HistoryMessage, ParleyError, UsernamesMapper};

use crate::backend::KvBackend;
use crate::lock::HistoryLock;

/// Persistence and locking for conversation histories.
///
/// History is stored per interacting user; the bot's exchanges with
/// other users live under their own keys. Every read-modify-write span
/// on one user's history must run under that user's lock:
/// [`HistoryRepo::append_message`] does so internally, callers
/// composing longer critical sections take [`HistoryRepo::lock`]
/// themselves.
pub struct HistoryRepo {
    backend: Arc<dyn KvBackend>,
}

impl HistoryRepo {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// Data key for one owner's history record.
    fn history_key(owner_id: u64) -> String {
        format!("conversation-history:{owner_id}")
    }

    /// Lock key for one owner's history record. Deterministically
    /// suffixed from the data key, so lock and data keys never alias
    /// another owner's keys.
    fn lock_key(owner_id: u64) -> String {
        format!("conversation-history:{owner_id}:lock")
    }

    /// Load the stored history for `owner_id`, or a fresh empty history
    /// when none is stored. Absence is the normal initial state, not an
    /// error; malformed stored bytes surface as
    /// [`ParleyError::CorruptRecord`].
    pub async fn get_or_create_history(
        &self,
        owner_id: u64,
    ) -> Result<ConversationHistory, ParleyError> {
        match self.backend.get(&Self::history_key(owner_id)).await? {
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| ParleyError::CorruptRecord {
                    owner_id,
                    reason: e.to_string(),
                })
            }
            None => Ok(ConversationHistory::new(owner_id)),
        }
    }

    /// Persist `history` under its owner's key, replacing whatever was
    /// stored. Last-writer-wins: "last" is only meaningful while the
    /// caller holds the owner's lock across the whole
    /// read-modify-write span.
    pub async fn save_history(&self, history: &ConversationHistory) -> Result<(), ParleyError> {
        let bytes = serde_json::to_vec(history).map_err(anyhow::Error::from)?;
        self.backend
            .set(&Self::history_key(history.owner_id), &bytes)
            .await
    }

    /// Acquire the lock guarding `owner_id`'s history. Blocks while
    /// another holder has it.
    pub async fn lock(&self, owner_id: u64) -> Result<HistoryLock, ParleyError> {
        let name = Self::lock_key(owner_id);
        debug!(owner_id, lock = %name, "acquiring history lock");
        let token = self.backend.acquire_lock(&name).await?;
        debug!(owner_id, "history lock acquired");
        Ok(HistoryLock::new(Arc::clone(&self.backend), name, token))
    }

    /// Store a new message in `owner_id`'s conversation, evicting the
    /// oldest messages so the rendered transcript stays within
    /// `max_characters`.
    ///
    /// The whole load→append→trim→save span runs under the owner's
    /// lock, released on both the success and the error path. A failed
    /// release after a persisted save is logged and swallowed: the
    /// work is already durable and the lock TTL will clear the key.
    pub async fn append_message(
        &self,
        owner_id: u64,
        msg: HistoryMessage,
        max_characters: usize,
        mapper: &dyn UsernamesMapper,
    ) -> Result<ConversationHistory, ParleyError> {
        let lock = self.lock(owner_id).await?;
        let result = self
            .append_locked(owner_id, msg, max_characters, mapper)
            .await;
        if let Err(err) = lock.release().await {
            warn!(owner_id, error = %err, "history lock release failed");
        }
        result
    }

    async fn append_locked(
        &self,
        owner_id: u64,
        msg: HistoryMessage,
        max_characters: usize,
        mapper: &dyn UsernamesMapper,
    ) -> Result<ConversationHistory, ParleyError> {
        let mut history = self.get_or_create_history(owner_id).await?;
        history.append(msg);
        history.trim(max_characters, mapper).await?;
        self.save_history(&history).await?;
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::backend::{InMemoryBackend, LockToken};
    use parley_core::NoOpUsernamesMapper;

    fn repo() -> HistoryRepo {
        HistoryRepo::new(Arc::new(InMemoryBackend::new()))
    }

    #[tokio::test]
    async fn test_get_or_create_returns_empty_history_for_new_owner() {
        let repo = repo();
        let history = repo.get_or_create_history(42).await.unwrap();
        assert_eq!(history.owner_id, 42);
        assert!(history.messages.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrips_exactly() {
        let repo = repo();
        let mut history = ConversationHistory::new(42);
        history.append(HistoryMessage::new(1, "hi"));
        history.append(HistoryMessage::new(2, "hello there"));

        repo.save_history(&history).await.unwrap();
        let loaded = repo.get_or_create_history(42).await.unwrap();
        assert_eq!(loaded, history);
    }

    #[tokio::test]
    async fn test_corrupt_stored_bytes_surface_as_corrupt_record() {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .set("conversation-history:7", b"definitely not json")
            .await
            .unwrap();
        let repo = HistoryRepo::new(backend);

        let err = repo.get_or_create_history(7).await.unwrap_err();
        assert!(matches!(err, ParleyError::CorruptRecord { owner_id: 7, .. }));
    }

    #[tokio::test]
    async fn test_histories_are_isolated_per_owner() {
        let repo = repo();
        let mut a = ConversationHistory::new(1);
        a.append(HistoryMessage::new(1, "for owner one"));
        repo.save_history(&a).await.unwrap();

        let b = repo.get_or_create_history(2).await.unwrap();
        assert!(b.messages.is_empty());
    }

    #[tokio::test]
    async fn test_append_message_trims_to_budget() {
        let repo = repo();
        let mapper = NoOpUsernamesMapper;

        // Each message renders as ": 0123456789" = 12 chars.
        for _ in 0..4 {
            repo.append_message(42, HistoryMessage::new(1, "0123456789"), 30, &mapper)
                .await
                .unwrap();
        }

        let history = repo.get_or_create_history(42).await.unwrap();
        assert_eq!(history.messages.len(), 2);
        assert!(history.transcript_len(&mapper).await.unwrap() <= 30);
    }

    /// Wraps a backend and records data-key operations, to make lock
    /// interleaving observable.
    struct RecordingBackend {
        inner: InMemoryBackend,
        ops: Mutex<Vec<String>>,
    }

    impl RecordingBackend {
        fn new() -> Self {
            Self {
                inner: InMemoryBackend::new(),
                ops: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl KvBackend for RecordingBackend {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ParleyError> {
            self.ops.lock().unwrap().push(format!("get {key}"));
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &[u8]) -> Result<(), ParleyError> {
            self.ops.lock().unwrap().push(format!("set {key}"));
            self.inner.set(key, value).await
        }

        async fn acquire_lock(&self, name: &str) -> Result<LockToken, ParleyError> {
            self.inner.acquire_lock(name).await
        }

        async fn release_lock(&self, name: &str, token: &str) -> Result<(), ParleyError> {
            self.inner.release_lock(name, token).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_appends_for_one_owner_never_interleave() {
        const WRITERS: usize = 8;

        let backend = Arc::new(RecordingBackend::new());
        let repo = Arc::new(HistoryRepo::new(
            Arc::clone(&backend) as Arc<dyn KvBackend>
        ));

        let mut tasks = Vec::new();
        for i in 0..WRITERS {
            let repo = Arc::clone(&repo);
            tasks.push(tokio::spawn(async move {
                repo.append_message(
                    42,
                    HistoryMessage::new(1, format!("message {i}")),
                    10_000,
                    &NoOpUsernamesMapper,
                )
                .await
                .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // No lost updates: every writer's message survived.
        let history = repo.get_or_create_history(42).await.unwrap();
        assert_eq!(history.messages.len(), WRITERS);

        // Each critical section's load is paired with its own save
        // before the next section's load; interleaving would produce
        // consecutive gets.
        let ops = backend.ops.lock().unwrap();
        let data_ops: Vec<&String> = ops
            .iter()
            .filter(|op| op.ends_with("conversation-history:42"))
            .collect();
        assert_eq!(data_ops.len(), 2 * WRITERS + 1); // final verification get included
        for pair in data_ops[..2 * WRITERS].chunks(2) {
            assert_eq!(pair[0], "get conversation-history:42");
            assert_eq!(pair[1], "set conversation-history:42");
        }
    }

    #[tokio::test]
    async fn test_lock_released_when_critical_section_fails() {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .set("conversation-history:9", b"garbage")
            .await
            .unwrap();
        let repo = HistoryRepo::new(Arc::clone(&backend) as Arc<dyn KvBackend>);

        // The corrupt record makes the critical section fail...
        let err = repo
            .append_message(9, HistoryMessage::new(1, "hi"), 100, &NoOpUsernamesMapper)
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::CorruptRecord { .. }));

        // ...but the lock must still have been released.
        let lock = tokio::time::timeout(Duration::from_secs(1), repo.lock(9))
            .await
            .expect("lock was not released")
            .unwrap();
        lock.release().await.unwrap();
    }
}
