//! Environment-driven configuration for the parley runtime.

use std::collections::HashMap;

use serde::Deserialize;

/// Parley runtime configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address on which the Redis server is listening
    pub redis_host: String,
    /// Port on which the Redis server is listening
    pub redis_port: u16,
    /// Numeric identifier of the Redis database to access
    pub redis_db: u32,
    /// Discord API token
    pub discord_bot_token: Option<String>,
    /// If provided the bot only responds to messages in this channel
    pub discord_channel_id: Option<u64>,
    /// API key for OpenAI
    pub open_ai_api_key: Option<String>,
    /// Maximum rendered-transcript length kept per conversation, in characters
    pub max_conversation_characters: usize,
    /// Log level
    pub log_level: String,
    /// Directory for rolling log files
    pub log_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_host: "redis".to_string(),
            redis_port: 6379,
            redis_db: 0,
            discord_bot_token: None,
            discord_channel_id: None,
            open_ai_api_key: None,
            max_conversation_characters: 2000,
            log_level: "info".to_string(),
            log_dir: "logs".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Load configuration from a provided variable map (useful for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let defaults = Config::default();
        Self {
            redis_host: vars
                .get("REDIS_HOST")
                .cloned()
                .unwrap_or(defaults.redis_host),
            redis_port: vars
                .get("REDIS_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.redis_port),
            redis_db: vars
                .get("REDIS_DB")
                .and_then(|d| d.parse().ok())
                .unwrap_or(defaults.redis_db),
            discord_bot_token: vars.get("DISCORD_BOT_TOKEN").cloned(),
            discord_channel_id: vars
                .get("DISCORD_CHANNEL_ID")
                .and_then(|c| c.parse().ok()),
            open_ai_api_key: vars.get("OPEN_AI_API_KEY").cloned(),
            max_conversation_characters: vars
                .get("MAX_CONVERSATION_CHARACTERS")
                .and_then(|m| m.parse().ok())
                .unwrap_or(defaults.max_conversation_characters),
            log_level: vars.get("RUST_LOG").cloned().unwrap_or(defaults.log_level),
            log_dir: vars
                .get("PARLEY_LOG_DIR")
                .cloned()
                .unwrap_or(defaults.log_dir),
        }
    }

    /// Connection URL for the configured Redis server.
    pub fn redis_url(&self) -> String {
        format!(
            "redis://{}:{}/{}",
            self.redis_host, self.redis_port, self.redis_db
        )
    }
}
