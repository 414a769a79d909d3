use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use crate::platform::{
    ChannelId, ChatPlatform, Message, MessageCursor, PlatformError, PlatformResult, UserId,
};
use crate::settings::Settings;

use super::processor::{ProcessError, RatingOutcome, RatingProcessor};
use super::publisher::LeaderboardPublisher;
use super::rating::{RatingEmojiTable, Score};

pub type ReconcileResult<T> = core::result::Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncMode {
    /// Recount every rated message, processed or not
    Full,
    /// Only pick up rated messages that were never marked processed
    Missed,
}

impl ResyncMode {
    fn skip_processed(self) -> bool {
        matches!(self, ResyncMode::Missed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncReport {
    pub scanned: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub abandoned_channels: Vec<ChannelId>,
    pub published: bool,
}

/// The score `rater` gave `message`: taken from the first rating reaction on it, and only if
/// the rater is among the users who reacted with that symbol.
pub async fn rated_score(
    platform: &dyn ChatPlatform,
    table: &RatingEmojiTable,
    rater: UserId,
    message: &Message,
) -> PlatformResult<Option<Score>> {
    let Some((reaction, score)) = table.first_rating(&message.reactions) else {
        return Ok(None);
    };

    let reactors = platform
        .fetch_reactors(message.channel_id, message.id, &reaction.emoji)
        .await?;
    Ok(reactors.contains(&rater).then_some(score))
}

/// Re-derives ratings from reaction history and feeds them through the processor.
#[derive(Debug)]
pub struct ReconciliationEngine {
    platform: Arc<dyn ChatPlatform>,
    settings: Arc<Settings>,
    processor: Arc<RatingProcessor>,
    publisher: Arc<LeaderboardPublisher>,
    table: RatingEmojiTable,
}

impl ReconciliationEngine {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        settings: Arc<Settings>,
        processor: Arc<RatingProcessor>,
        publisher: Arc<LeaderboardPublisher>,
    ) -> Self {
        Self {
            platform,
            settings,
            processor,
            publisher,
            table: RatingEmojiTable,
        }
    }

    /// Walks every submission channel, then republishes the leaderboard regardless of how the
    /// walk went. Failures are logged and counted in the report.
    #[instrument(skip(self))]
    pub async fn resync(&self, mode: ResyncMode) -> ResyncReport {
        let mut report = ResyncReport::default();

        for channel in &self.settings.submission_channels {
            if let Err(e) = self.resync_channel(channel.id, mode, &mut report).await {
                tracing::error!(channel = %channel.id, name = %channel.name, error = ?e, "resync abandoned channel");
                report.abandoned_channels.push(channel.id);
            }
        }

        match self.publisher.publish().await {
            Ok(_) => report.published = true,
            Err(e) => tracing::error!(error = ?e, "failed to publish leaderboard after resync"),
        }

        tracing::info!(
            scanned = report.scanned,
            applied = report.applied,
            skipped = report.skipped,
            failed = report.failed,
            abandoned = report.abandoned_channels.len(),
            "resync finished"
        );
        report
    }

    async fn resync_channel(
        &self,
        channel: ChannelId,
        mode: ResyncMode,
        report: &mut ResyncReport,
    ) -> ReconcileResult<()> {
        let mut cursor = MessageCursor::new(channel);

        while let Some(page) = cursor.next_page(self.platform.as_ref()).await? {
            for message in &page {
                report.scanned += 1;
                match self.resync_message(message, mode).await {
                    Ok(None) => {}
                    Ok(Some(RatingOutcome::Skipped)) => report.skipped += 1,
                    Ok(Some(RatingOutcome::Applied(_))) => report.applied += 1,
                    Err(e) => {
                        tracing::warn!(message = %message.id, error = ?e, "failed to resync message");
                        report.failed += 1;
                    }
                }
            }
        }

        Ok(())
    }

    async fn resync_message(
        &self,
        message: &Message,
        mode: ResyncMode,
    ) -> ReconcileResult<Option<RatingOutcome>> {
        let rater = self.settings.rater_user_id;
        let Some(score) = rated_score(self.platform.as_ref(), &self.table, rater, message).await?
        else {
            return Ok(None);
        };

        let outcome = self
            .processor
            .process(message, score, mode.skip_processed())
            .await?;
        Ok(Some(outcome))
    }
}
