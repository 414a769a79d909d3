use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::constants::PERMALINK_BASE_URL;
use crate::platform::{ChannelId, GuildId, MessageId, UserId};

pub type SettingsResult<T> = core::result::Result<T, SettingsError>;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("no submission channels configured")]
    NoSubmissionChannels,

    #[error("submission channel {0} is configured more than once")]
    DuplicateChannel(ChannelId),

    #[error("reward '{0}' is configured more than once")]
    DuplicateReward(String),

    #[error("reward '{key}' costs {price} points, less than the {previous} of the tier before it")]
    DecreasingPrice {
        key: String,
        price: u64,
        previous: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubmissionChannel {
    pub key: String,
    pub name: String,
    pub id: ChannelId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RewardTier {
    pub key: String,
    pub name: String,
    pub price: u64,
}

fn default_leaderboard_title() -> String {
    String::from("Prestige")
}

/// Static bot configuration. Built once at startup and shared behind an `Arc`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_id: GuildId,
    pub bot_user_id: UserId,
    /// The only user whose rating reactions count
    pub rater_user_id: UserId,
    /// Receives a notice whenever someone unlocks a reward
    pub moderator_user_id: UserId,
    /// Receives the startup status message
    pub operator_user_id: UserId,
    pub leaderboard_channel_id: ChannelId,
    #[serde(default = "default_leaderboard_title")]
    pub leaderboard_title: String,
    pub submission_channels: Vec<SubmissionChannel>,
    /// Ascending by price
    #[serde(default)]
    pub rewards: Vec<RewardTier>,
}

impl Settings {
    pub fn load(path: &Path) -> SettingsResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let settings = Self::from_json(&raw)?;
        tracing::info!(
            path = %path.display(),
            channels = settings.submission_channels.len(),
            rewards = settings.rewards.len(),
            "settings loaded"
        );
        Ok(settings)
    }

    pub fn from_json(raw: &str) -> SettingsResult<Self> {
        let settings: Settings = serde_json::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> SettingsResult<()> {
        if self.submission_channels.is_empty() {
            return Err(SettingsError::NoSubmissionChannels);
        }

        let mut channels = HashSet::new();
        for channel in &self.submission_channels {
            if !channels.insert(channel.id) {
                return Err(SettingsError::DuplicateChannel(channel.id));
            }
        }

        let mut keys = HashSet::new();
        let mut previous = 0;
        for tier in &self.rewards {
            if !keys.insert(tier.key.as_str()) {
                return Err(SettingsError::DuplicateReward(tier.key.clone()));
            }
            if tier.price < previous {
                return Err(SettingsError::DecreasingPrice {
                    key: tier.key.clone(),
                    price: tier.price,
                    previous,
                });
            }
            previous = tier.price;
        }

        Ok(())
    }

    pub fn submission_channel(&self, id: ChannelId) -> Option<&SubmissionChannel> {
        self.submission_channels.iter().find(|c| c.id == id)
    }

    pub fn is_submission_channel(&self, id: ChannelId) -> bool {
        self.submission_channel(id).is_some()
    }

    pub fn permalink(&self, channel: ChannelId, message: MessageId) -> String {
        format!(
            "{}/{}/{}/{}",
            PERMALINK_BASE_URL, self.server_id, channel, message
        )
    }
}
