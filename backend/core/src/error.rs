use thiserror::Error;

/// Top-level error type for the parley runtime.
#[derive(Debug, Error)]
pub enum ParleyError {
    /// The key-value backend could not be reached.
    #[error("history store unreachable: {0}")]
    StoreUnavailable(String),

    /// Stored bytes could not be deserialized into a history.
    /// Surfaced, never auto-repaired: silently resetting a user's
    /// history is a data-loss decision the caller must make.
    #[error("stored history for user {owner_id} is corrupt: {reason}")]
    CorruptRecord { owner_id: u64, reason: String },

    /// The backend failed while a lock was being acquired. Contention
    /// is not an error; it blocks the caller instead.
    #[error("history lock acquisition failed: {0}")]
    LockUnavailable(String),

    /// A lock could not be released (never held, or already expired
    /// under the backend's staleness timeout).
    #[error("history lock release failed: {0}")]
    LockReleaseError(String),

    /// `replace_last_body` was called on an empty history.
    #[error("conversation history is empty")]
    EmptyHistory,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
