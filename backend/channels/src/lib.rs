use async_trait::async_trait;

pub mod discord;

pub use discord::{DiscordAdapter, DiscordUsernamesMapper};

/// All channel adapters implement this trait.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Human-readable adapter name for logging.
    fn name(&self) -> &str;

    /// Run the adapter's connection loop until it exits.
    async fn start(&self) -> anyhow::Result<()>;
}
