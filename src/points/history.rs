use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use crate::constants::MAX_MESSAGE_LENGTH;
use crate::platform::{ChatPlatform, MessageCursor, PlatformError, UserId};
use crate::settings::{Settings, SubmissionChannel};

use super::publisher::{paginate, points_label};
use super::rating::RatingEmojiTable;
use super::reconcile::rated_score;

pub type HistoryResult<T> = core::result::Result<T, HistoryError>;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelHistory {
    pub total: u64,
    pub lines: Vec<String>,
}

/// DMs a contributor every submission they made along with its rating.
///
/// Reads reaction history straight from the platform; the ledger is never consulted.
#[derive(Debug)]
pub struct PointsHistoryReporter {
    platform: Arc<dyn ChatPlatform>,
    settings: Arc<Settings>,
    table: RatingEmojiTable,
}

impl PointsHistoryReporter {
    pub fn new(platform: Arc<dyn ChatPlatform>, settings: Arc<Settings>) -> Self {
        Self {
            platform,
            settings,
            table: RatingEmojiTable,
        }
    }

    /// Returns how many channels were reported. A channel that fails is logged and skipped.
    #[instrument(skip(self))]
    pub async fn send_history(&self, contributor: UserId) -> usize {
        let mut reported = 0;
        for channel in &self.settings.submission_channels {
            match self.send_channel_history(channel, contributor).await {
                Ok(()) => reported += 1,
                Err(e) => {
                    tracing::error!(channel = %channel.id, error = ?e, "failed to send points history for channel")
                }
            }
        }
        reported
    }

    async fn send_channel_history(
        &self,
        channel: &SubmissionChannel,
        contributor: UserId,
    ) -> HistoryResult<()> {
        let history = self.collect(channel, contributor).await?;
        let header = format!(
            "**{} for submissions in {}:**\n",
            points_label(history.total),
            channel.name
        );

        for page in paginate(&header, history.lines, MAX_MESSAGE_LENGTH) {
            self.platform.send_direct_message(contributor, &page).await?;
        }
        Ok(())
    }

    pub async fn collect(
        &self,
        channel: &SubmissionChannel,
        contributor: UserId,
    ) -> HistoryResult<ChannelHistory> {
        let rater = self.settings.rater_user_id;
        let mut history = ChannelHistory::default();
        let mut cursor = MessageCursor::new(channel.id);

        while let Some(page) = cursor.next_page(self.platform.as_ref()).await? {
            for message in page.iter().filter(|m| m.author.id == contributor) {
                let link = self.settings.permalink(channel.id, message.id);
                let line = match rated_score(self.platform.as_ref(), &self.table, rater, message)
                    .await?
                {
                    Some(score) => {
                        history.total += score.points();
                        format!("{}: {link} - ID: {}\n", points_label(score.points()), message.id)
                    }
                    None => format!("Not rated: {link} - ID: {}\n", message.id),
                };
                history.lines.push(line);
            }
        }

        Ok(history)
    }
}
