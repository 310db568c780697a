use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use serenity::client::{Client, Context, EventHandler};
use serenity::model::channel::Message as DiscordMessage;
use serenity::model::gateway::{GatewayIntents, Ready};
use serenity::model::id::UserId;
use tokio::sync::{OnceCell, RwLock};
use tracing::{error, info, warn};

use parley_completion::{CompletionError, OpenAiCompletions};
use parley_core::{HistoryMessage, UsernamesMapper};
use parley_history::HistoryRepo;

use crate::ChannelAdapter;

/// Reply used when the model produced no non-empty completion.
const NO_COMPLETION_REPLY: &str = "I have nothing to say to that.";

/// Reply used when an exchange failed; the real error goes to the log.
const EXCHANGE_FAILED_REPLY: &str = "Something went wrong, try again later.";

/// Resolves usernames through the Discord HTTP API, caching results for
/// the life of the adapter. The cache is private to this mapper and
/// plays no part in the history locking contract.
pub struct DiscordUsernamesMapper {
    http: Arc<serenity::http::Http>,
    cache: RwLock<HashMap<u64, String>>,
}

impl DiscordUsernamesMapper {
    pub fn new(http: Arc<serenity::http::Http>) -> Self {
        Self {
            http,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl UsernamesMapper for DiscordUsernamesMapper {
    async fn get_username(&self, user_id: u64) -> anyhow::Result<String> {
        if let Some(name) = self.cache.read().await.get(&user_id) {
            return Ok(name.clone());
        }

        let user = self
            .http
            .get_user(UserId::new(user_id))
            .await
            .with_context(|| format!("username of user with ID {user_id} could not be found"))?;
        let name = user.display_name().to_string();

        self.cache.write().await.insert(user_id, name.clone());
        Ok(name)
    }
}

struct Handler {
    repo: Arc<HistoryRepo>,
    completions: Arc<OpenAiCompletions>,
    max_characters: usize,
    allowed_channel: Option<u64>,
    bot_id: AtomicU64,
    mapper: OnceCell<Arc<DiscordUsernamesMapper>>,
}

impl Handler {
    /// Run one user→bot exchange under the owner's history lock: load,
    /// append the user's turn plus an empty placeholder for the bot,
    /// trim, complete, fill the placeholder, trim again, save.
    async fn run_exchange(
        &self,
        owner_id: u64,
        content: &str,
        mapper: &DiscordUsernamesMapper,
    ) -> anyhow::Result<String> {
        let lock = self.repo.lock(owner_id).await?;
        let result = self.exchange_locked(owner_id, content, mapper).await;
        if let Err(err) = lock.release().await {
            // The exchange outcome is already decided; a lost lock just
            // waits out the backend TTL.
            warn!(owner_id, error = %err, "history lock release failed");
        }
        result
    }

    async fn exchange_locked(
        &self,
        owner_id: u64,
        content: &str,
        mapper: &DiscordUsernamesMapper,
    ) -> anyhow::Result<String> {
        let bot_id = self.bot_id.load(Ordering::SeqCst);

        let mut history = self.repo.get_or_create_history(owner_id).await?;
        history.append(HistoryMessage::new(owner_id, content));
        history.append(HistoryMessage::new(bot_id, ""));
        history.trim(self.max_characters, mapper).await?;

        // The trailing placeholder renders as "BotName: ", cueing the
        // model to speak as the bot.
        let prompt = history.as_transcript_lines(mapper).await?.join("\n");
        let reply = match self.completions.create_completion(&prompt).await {
            Ok(Some(text)) => text.trim().to_string(),
            Ok(None) => NO_COMPLETION_REPLY.to_string(),
            Err(CompletionError::PromptTooLong) => {
                anyhow::bail!("prompt exceeded the completion model's token limit");
            }
            Err(err) => return Err(err.into()),
        };

        history.replace_last_body(reply.clone())?;
        history.trim(self.max_characters, mapper).await?;
        self.repo.save_history(&history).await?;

        Ok(reply)
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, ctx: Context, msg: DiscordMessage) {
        if msg.author.bot {
            return;
        }
        if let Some(allowed) = self.allowed_channel {
            if msg.channel_id.get() != allowed {
                return;
            }
        }

        let http = ctx.http.clone();
        let mapper = self
            .mapper
            .get_or_init(|| async move { Arc::new(DiscordUsernamesMapper::new(http)) })
            .await
            .clone();

        let owner_id = msg.author.id.get();
        info!(owner_id, channel = %msg.channel_id, "received chat message");

        let reply = match self.run_exchange(owner_id, &msg.content, &mapper).await {
            Ok(reply) => reply,
            Err(err) => {
                error!(owner_id, error = %err, "chat exchange failed");
                EXCHANGE_FAILED_REPLY.to_string()
            }
        };

        if let Err(e) = msg.channel_id.say(&ctx.http, reply).await {
            error!("Error sending message: {:?}", e);
        }
    }

    async fn ready(&self, _: Context, ready: Ready) {
        self.bot_id.store(ready.user.id.get(), Ordering::SeqCst);
        info!("{} is connected", ready.user.name);
    }
}

/// Discord channel adapter: receives messages, runs the locked history
/// exchange, and replies with the completion.
pub struct DiscordAdapter {
    token: String,
    allowed_channel: Option<u64>,
    repo: Arc<HistoryRepo>,
    completions: Arc<OpenAiCompletions>,
    max_characters: usize,
}

impl DiscordAdapter {
    pub fn new(
        token: String,
        allowed_channel: Option<u64>,
        repo: Arc<HistoryRepo>,
        completions: OpenAiCompletions,
        max_characters: usize,
    ) -> Self {
        Self {
            token,
            allowed_channel,
            repo,
            completions: Arc::new(completions),
            max_characters,
        }
    }
}

#[async_trait]
impl ChannelAdapter for DiscordAdapter {
    fn name(&self) -> &str {
        "discord"
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("Starting Discord adapter");

        let intents = GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let mut client = Client::builder(&self.token, intents)
            .event_handler(Handler {
                repo: Arc::clone(&self.repo),
                completions: Arc::clone(&self.completions),
                max_characters: self.max_characters,
                allowed_channel: self.allowed_channel,
                bot_id: AtomicU64::new(0),
                mapper: OnceCell::new(),
            })
            .await?;

        if let Err(why) = client.start().await {
            error!("Client error: {:?}", why);
            anyhow::bail!("Discord client error: {:?}", why);
        }

        Ok(())
    }
}
