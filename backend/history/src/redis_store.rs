//! Redis implementation of the key-value backend.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use uuid::Uuid;

use parley_core::ParleyError;

use crate::backend::{KvBackend, LockToken};

/// How long a held lock survives a holder that crashed without
/// releasing. The last line of defense against key starvation.
const LOCK_TTL: Duration = Duration::from_secs(30);

/// Delay between acquisition attempts while the lock is contended.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Compare-and-delete: the lock is deleted only if the caller's token
/// still holds it.
const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

/// Redis-backed [`KvBackend`].
///
/// Owns a single multiplexed connection, constructed once and shared by
/// clone. Locks are plain keys taken with `SET NX PX` and released
/// through [`RELEASE_SCRIPT`].
pub struct RedisBackend {
    conn: ConnectionManager,
    release_script: Script,
}

impl RedisBackend {
    /// Connect to the Redis server at `url`, e.g. `redis://host:6379/0`.
    pub async fn connect(url: &str) -> Result<Self, ParleyError> {
        let client = redis::Client::open(url)
            .map_err(|e| ParleyError::StoreUnavailable(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| ParleyError::StoreUnavailable(e.to_string()))?;
        Ok(Self {
            conn,
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ParleyError> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(|e| ParleyError::StoreUnavailable(e.to_string()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), ParleyError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| ParleyError::StoreUnavailable(e.to_string()))
    }

    async fn acquire_lock(&self, name: &str) -> Result<LockToken, ParleyError> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();
        loop {
            let taken: Option<String> = redis::cmd("SET")
                .arg(name)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(LOCK_TTL.as_millis() as u64)
                .query_async(&mut conn)
                .await
                .map_err(|e| ParleyError::LockUnavailable(e.to_string()))?;
            if taken.is_some() {
                return Ok(token);
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }

    async fn release_lock(&self, name: &str, token: &str) -> Result<(), ParleyError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release_script
            .key(name)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| ParleyError::LockReleaseError(e.to_string()))?;
        if deleted == 0 {
            return Err(ParleyError::LockReleaseError(format!(
                "lock {name} already expired or is held by another owner"
            )));
        }
        Ok(())
    }
}
