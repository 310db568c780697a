//! Persistence and locking for conversation histories.
//!
//! The [`HistoryRepo`] runs against any [`KvBackend`]: Redis in
//! production, [`InMemoryBackend`] in tests and single-process use.

pub mod backend;
pub mod lock;
pub mod redis_store;
pub mod repo;

pub use backend::{InMemoryBackend, KvBackend, LockToken};
pub use lock::HistoryLock;
pub use redis_store::RedisBackend;
pub use repo::HistoryRepo;
