pub mod gateway;
pub mod jitter;
pub mod model;
pub mod rest;

#[cfg(test)]
pub mod mock;

use std::fmt;

use async_trait::async_trait;
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::constants::MESSAGES_PER_PAGE;
pub use model::{
    ApplicationId, Author, ChannelId, Emoji, GuildId, InteractionId, Message, MessageId,
    Reaction, UserId,
};

pub type PlatformResult<T> = core::result::Result<T, PlatformError>;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<f64> },

    #[error("missing access or invalid token ({0})")]
    Forbidden(StatusCode),

    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    #[error("invalid request url: {0}")]
    InvalidUrl(String),

    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

/// Message, reaction and DM operations the points core needs from the chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync + fmt::Debug {
    /// Up to `limit` messages posted after `after` (from the start of the channel when `None`)
    async fn fetch_messages_page(
        &self,
        channel: ChannelId,
        after: Option<MessageId>,
        limit: u8,
    ) -> PlatformResult<Vec<Message>>;

    async fn fetch_message(&self, channel: ChannelId, message: MessageId)
    -> PlatformResult<Message>;

    /// Every user that reacted to `message` with `emoji`
    async fn fetch_reactors(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &Emoji,
    ) -> PlatformResult<Vec<UserId>>;

    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &Emoji,
    ) -> PlatformResult<()>;

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> PlatformResult<()>;

    async fn send_message(&self, channel: ChannelId, text: &str) -> PlatformResult<MessageId>;

    async fn send_direct_message(&self, user: UserId, text: &str) -> PlatformResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlashCommand {
    pub name: String,
    pub description: String,
}

impl SlashCommand {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

/// Slash command plumbing used by the bot loop.
#[async_trait]
pub trait CommandSurface: Send + Sync + fmt::Debug {
    async fn register_guild_commands(
        &self,
        application: ApplicationId,
        guild: GuildId,
        commands: &[SlashCommand],
    ) -> PlatformResult<()>;

    async fn reply_to_interaction(
        &self,
        interaction: InteractionId,
        token: &str,
        text: &str,
        ephemeral: bool,
    ) -> PlatformResult<()>;
}

/// Walks a channel's history oldest to newest, one page at a time.
///
/// Each page is sorted by id and the cursor advances to the largest id seen. Iteration ends on
/// the first empty page.
#[derive(Debug)]
pub struct MessageCursor {
    channel: ChannelId,
    after: Option<MessageId>,
}

impl MessageCursor {
    pub fn new(channel: ChannelId) -> Self {
        Self {
            channel,
            after: None,
        }
    }

    pub async fn next_page(
        &mut self,
        platform: &dyn ChatPlatform,
    ) -> PlatformResult<Option<Vec<Message>>> {
        let mut page = platform
            .fetch_messages_page(self.channel, self.after, MESSAGES_PER_PAGE)
            .await?;

        if page.is_empty() {
            return Ok(None);
        }

        page.sort_by_key(|m| m.id);
        if let Some(last) = page.last() {
            self.after = Some(self.after.map_or(last.id, |a| a.max(last.id)));
        }

        for message in page.iter_mut() {
            message.channel_id = self.channel;
        }

        Ok(Some(page))
    }
}
