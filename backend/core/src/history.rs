use serde::{Deserialize, Serialize};

use crate::error::ParleyError;
use crate::usernames::UsernamesMapper;

/// One turn of a conversation: who spoke and what they said.
///
/// The body may be empty: an empty body is the placeholder appended
/// before a completion result exists, filled in later through
/// [`ConversationHistory::replace_last_body`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// ID of the user (or the bot) who sent the message.
    pub speaker_id: u64,
    /// The text sent in the message.
    pub body: String,
}

impl HistoryMessage {
    pub fn new(speaker_id: u64, body: impl Into<String>) -> Self {
        Self {
            speaker_id,
            body: body.into(),
        }
    }

    /// Render this message as a transcript line: `<username>: <body>`.
    ///
    /// Username resolution failures propagate to the caller.
    pub async fn as_transcript_line(
        &self,
        mapper: &dyn UsernamesMapper,
    ) -> Result<String, ParleyError> {
        let username = mapper.get_username(self.speaker_id).await?;
        Ok(format!("{}: {}", username, self.body))
    }
}

/// The conversation between the bot and one user, oldest message first.
///
/// Exactly one history exists per owner. The type itself is
/// lock-agnostic: callers mutate it only while holding the owner's
/// history lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHistory {
    /// ID of the user (not the bot) with which the conversation is had.
    pub owner_id: u64,
    /// Messages in chronological order, oldest first.
    pub messages: Vec<HistoryMessage>,
}

impl ConversationHistory {
    /// A fresh, empty history for `owner_id`.
    pub fn new(owner_id: u64) -> Self {
        Self {
            owner_id,
            messages: Vec::new(),
        }
    }

    /// Append a message as the newest entry.
    pub fn append(&mut self, msg: HistoryMessage) {
        self.messages.push(msg);
    }

    /// Fill the body of the newest message (a previously appended
    /// placeholder). All other messages are untouched.
    pub fn replace_last_body(&mut self, body: impl Into<String>) -> Result<(), ParleyError> {
        match self.messages.last_mut() {
            Some(last) => {
                last.body = body.into();
                Ok(())
            }
            None => Err(ParleyError::EmptyHistory),
        }
    }

    /// Render every message as a transcript line, in order.
    pub async fn as_transcript_lines(
        &self,
        mapper: &dyn UsernamesMapper,
    ) -> Result<Vec<String>, ParleyError> {
        let mut lines = Vec::with_capacity(self.messages.len());
        for msg in &self.messages {
            lines.push(msg.as_transcript_line(mapper).await?);
        }
        Ok(lines)
    }

    /// Total character count of the rendered transcript.
    ///
    /// A budget proxy only, not a token count; the completion client
    /// owns the stricter token-denominated limit.
    pub async fn transcript_len(
        &self,
        mapper: &dyn UsernamesMapper,
    ) -> Result<usize, ParleyError> {
        let lines = self.as_transcript_lines(mapper).await?;
        Ok(lines.iter().map(|line| line.chars().count()).sum())
    }

    /// Evict oldest messages until the rendered transcript fits within
    /// `budget` characters.
    ///
    /// The newest message is never evicted: if it alone exceeds the
    /// budget, the history keeps that single message rather than end up
    /// empty. The running total is maintained incrementally, so each
    /// message is rendered once per call.
    pub async fn trim(
        &mut self,
        budget: usize,
        mapper: &dyn UsernamesMapper,
    ) -> Result<(), ParleyError> {
        let mut line_lens = Vec::with_capacity(self.messages.len());
        let mut total = 0usize;
        for msg in &self.messages {
            let len = msg.as_transcript_line(mapper).await?.chars().count();
            total += len;
            line_lens.push(len);
        }

        let mut evict = 0;
        while total > budget && evict + 1 < self.messages.len() {
            total -= line_lens[evict];
            evict += 1;
        }
        self.messages.drain(..evict);

        Ok(())
    }
}
