//! Text-completion client for the parley bot.

pub mod openai;

pub use openai::{CompletionError, OpenAiCompletions, MAX_PROMPT_LENGTH};
