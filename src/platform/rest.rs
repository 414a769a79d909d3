use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use http::header::{AUTHORIZATION, USER_AGENT};
use http::{HeaderMap, HeaderValue, StatusCode};
use leaky_bucket::RateLimiter;
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::instrument;

use crate::constants::{DISCORD_API_URL, REACTORS_PER_PAGE};

use super::{
    ApplicationId, Author, ChannelId, ChatPlatform, CommandSurface, Emoji, GuildId, InteractionId,
    Message, MessageId, PlatformError, PlatformResult, SlashCommand, UserId,
};

// global limit is 50/s; stay well under it
const REQUESTS_PER_INTERVAL: usize = 25;
const REQUEST_INTERVAL: Duration = Duration::from_secs(1);

// interaction callback type: CHANNEL_MESSAGE_WITH_SOURCE
const CALLBACK_CHANNEL_MESSAGE: u8 = 4;
const EPHEMERAL_FLAG: u64 = 1 << 6;

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    #[serde(default)]
    retry_after: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DmChannel {
    id: ChannelId,
}

/// Discord v10 HTTP client.
pub struct DiscordRest {
    client: reqwest::Client,
    base: Url,
    limiter: RateLimiter,
}

impl fmt::Debug for DiscordRest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordRest")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

fn auth_headers(token: &str) -> PlatformResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    let mut auth = HeaderValue::from_str(&format!("Bot {token}"))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!(
            "DiscordBot (https://discord.com, ",
            env!("CARGO_PKG_VERSION"),
            ")"
        )),
    );
    Ok(headers)
}

impl DiscordRest {
    pub fn new(token: &str) -> PlatformResult<Self> {
        Self::with_base_url(token, DISCORD_API_URL)
    }

    pub fn with_base_url(token: &str, base: &str) -> PlatformResult<Self> {
        let base = Url::parse(base).map_err(|e| PlatformError::InvalidUrl(e.to_string()))?;
        let client = reqwest::Client::builder()
            .default_headers(auth_headers(token)?)
            .build()?;

        let limiter = RateLimiter::builder()
            .initial(REQUESTS_PER_INTERVAL)
            .max(REQUESTS_PER_INTERVAL)
            .refill(REQUESTS_PER_INTERVAL)
            .interval(REQUEST_INTERVAL)
            .build();

        Ok(Self {
            client,
            base,
            limiter,
        })
    }

    fn url(&self, segments: &[&str]) -> PlatformResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| PlatformError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> PlatformResult<RequestBuilder> {
        Ok(self.client.request(method, self.url(segments)?))
    }

    /// Waits for a slot in the local bucket, sends, and maps failure statuses
    async fn send(&self, request: RequestBuilder) -> PlatformResult<Response> {
        self.limiter.acquire_one().await;
        let res = request.send().await?;
        let status = res.status();

        if let Some(remaining) = res.headers().get("x-ratelimit-remaining")
            && let Some(bucket) = res.headers().get("x-ratelimit-bucket")
        {
            tracing::trace!(ratelimit_remaining = ?remaining, ratelimit_bucket = ?bucket, "rate-limit bucket");
        }

        if status.is_success() {
            return Ok(res);
        }

        tracing::error!(code = %status, url = %res.url().path(), "non-success response");
        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = res
                    .json::<RateLimitBody>()
                    .await
                    .ok()
                    .and_then(|b| b.retry_after);
                Err(PlatformError::RateLimited { retry_after })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(PlatformError::Forbidden(status))
            }
            s if s.is_server_error() => Err(PlatformError::Unavailable(s.to_string())),
            _ => {
                let body = res.text().await.unwrap_or_default();
                Err(PlatformError::Status { status, body })
            }
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> PlatformResult<T> {
        Ok(self.send(request).await?.json::<T>().await?)
    }

    async fn reactors_page(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &str,
        after: Option<UserId>,
    ) -> PlatformResult<Vec<Author>> {
        let channel = channel.to_string();
        let message = message.to_string();
        let mut query = vec![("limit", REACTORS_PER_PAGE.to_string())];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }

        let request = self
            .request(
                Method::GET,
                &["channels", &channel, "messages", &message, "reactions", emoji],
            )?
            .query(&query);
        self.send_json(request).await
    }
}

#[async_trait]
impl ChatPlatform for DiscordRest {
    #[instrument(skip(self))]
    async fn fetch_messages_page(
        &self,
        channel: ChannelId,
        after: Option<MessageId>,
        limit: u8,
    ) -> PlatformResult<Vec<Message>> {
        let after = after.unwrap_or_default().to_string();
        let request = self
            .request(Method::GET, &["channels", &channel.to_string(), "messages"])?
            .query(&[("after", after), ("limit", limit.to_string())]);

        let page: Vec<Message> = self.send_json(request).await?;
        tracing::debug!(count = page.len(), "fetched message page");
        Ok(page)
    }

    async fn fetch_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> PlatformResult<Message> {
        let request = self.request(
            Method::GET,
            &[
                "channels",
                &channel.to_string(),
                "messages",
                &message.to_string(),
            ],
        )?;
        let mut message: Message = self.send_json(request).await?;
        message.channel_id = channel;
        Ok(message)
    }

    #[instrument(skip(self, emoji), fields(emoji = emoji.name()))]
    async fn fetch_reactors(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &Emoji,
    ) -> PlatformResult<Vec<UserId>> {
        let emoji = emoji.request_form();
        let mut users = Vec::new();
        let mut after = None;

        loop {
            let page = self.reactors_page(channel, message, &emoji, after).await?;
            let Some(last) = page.iter().map(|u| u.id).max() else {
                break;
            };
            let short = page.len() < REACTORS_PER_PAGE as usize;
            after = Some(last);
            users.extend(page.into_iter().map(|u| u.id));
            if short {
                break;
            }
        }

        Ok(users)
    }

    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &Emoji,
    ) -> PlatformResult<()> {
        let request = self.request(
            Method::PUT,
            &[
                "channels",
                &channel.to_string(),
                "messages",
                &message.to_string(),
                "reactions",
                &emoji.request_form(),
                "@me",
            ],
        )?;
        self.send(request).await?;
        Ok(())
    }

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> PlatformResult<()> {
        let request = self.request(
            Method::DELETE,
            &[
                "channels",
                &channel.to_string(),
                "messages",
                &message.to_string(),
            ],
        )?;
        self.send(request).await?;
        Ok(())
    }

    #[instrument(skip(self, text), fields(len = text.len()))]
    async fn send_message(&self, channel: ChannelId, text: &str) -> PlatformResult<MessageId> {
        let request = self
            .request(Method::POST, &["channels", &channel.to_string(), "messages"])?
            .json(&json!({ "content": text }));
        let message: Message = self.send_json(request).await?;
        Ok(message.id)
    }

    #[instrument(skip(self, text), fields(len = text.len()))]
    async fn send_direct_message(&self, user: UserId, text: &str) -> PlatformResult<()> {
        let request = self
            .request(Method::POST, &["users", "@me", "channels"])?
            .json(&json!({ "recipient_id": user }));
        let dm: DmChannel = self.send_json(request).await?;
        self.send_message(dm.id, text).await?;
        Ok(())
    }
}

#[async_trait]
impl CommandSurface for DiscordRest {
    #[instrument(skip(self, commands), fields(count = commands.len()))]
    async fn register_guild_commands(
        &self,
        application: ApplicationId,
        guild: GuildId,
        commands: &[SlashCommand],
    ) -> PlatformResult<()> {
        let request = self
            .request(
                Method::PUT,
                &[
                    "applications",
                    &application.to_string(),
                    "guilds",
                    &guild.to_string(),
                    "commands",
                ],
            )?
            .json(commands);
        let registered: Vec<Value> = self.send_json(request).await?;
        tracing::info!(registered = registered.len(), "slash commands deployed");
        Ok(())
    }

    async fn reply_to_interaction(
        &self,
        interaction: InteractionId,
        token: &str,
        text: &str,
        ephemeral: bool,
    ) -> PlatformResult<()> {
        let flags = if ephemeral { EPHEMERAL_FLAG } else { 0 };
        let request = self
            .request(
                Method::POST,
                &["interactions", &interaction.to_string(), token, "callback"],
            )?
            .json(&json!({
                "type": CALLBACK_CHANNEL_MESSAGE,
                "data": { "content": text, "flags": flags },
            }));
        self.send(request).await?;
        Ok(())
    }
}
