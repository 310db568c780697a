use anyhow::Result;
use async_trait::async_trait;

/// Maps speaker IDs to display names for transcript rendering.
///
/// Lookup failures are returned to the caller as-is; rendering does no
/// special handling for them. Implementations that cache do so
/// privately, outside the history locking contract.
#[async_trait]
pub trait UsernamesMapper: Send + Sync {
    /// Get a user's display name.
    async fn get_username(&self, user_id: u64) -> Result<String>;
}

/// Mapper for contexts without a platform identity lookup.
/// Resolves every ID to an empty name, so rendering never hard-fails.
pub struct NoOpUsernamesMapper;

#[async_trait]
impl UsernamesMapper for NoOpUsernamesMapper {
    async fn get_username(&self, _user_id: u64) -> Result<String> {
        Ok(String::new())
    }
}
