use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use parley_channels::{ChannelAdapter, DiscordAdapter};
use parley_completion::OpenAiCompletions;
use parley_config::Config;
use parley_history::{HistoryRepo, RedisBackend};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "parley — Discord chat bot with Redis-backed conversation history")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Discord bot
    Serve,
    /// Print the stored conversation history for a user
    Show {
        /// ID of the user whose history to print
        owner_id: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    logging::init_logger(&config.log_dir, &config.log_level);

    let cli = Cli::parse();

    let backend = Arc::new(
        RedisBackend::connect(&config.redis_url())
            .await
            .with_context(|| format!("connecting to Redis at {}", config.redis_url()))?,
    );
    let repo = Arc::new(HistoryRepo::new(backend));

    match cli.command {
        Commands::Serve => serve(config, repo).await,
        Commands::Show { owner_id } => show(repo, owner_id).await,
    }
}

async fn serve(config: Config, repo: Arc<HistoryRepo>) -> Result<()> {
    let token = config
        .discord_bot_token
        .clone()
        .context("DISCORD_BOT_TOKEN is required")?;
    let api_key = config
        .open_ai_api_key
        .clone()
        .context("OPEN_AI_API_KEY is required")?;

    let adapter = DiscordAdapter::new(
        token,
        config.discord_channel_id,
        repo,
        OpenAiCompletions::new(api_key),
        config.max_conversation_characters,
    );

    info!(adapter = adapter.name(), "starting channel adapter");
    adapter.start().await
}

async fn show(repo: Arc<HistoryRepo>, owner_id: u64) -> Result<()> {
    let history = repo.get_or_create_history(owner_id).await?;
    if history.messages.is_empty() {
        println!("no stored history for user {owner_id}");
        return Ok(());
    }
    for msg in &history.messages {
        println!("[{}] {}", msg.speaker_id, msg.body);
    }
    Ok(())
}
