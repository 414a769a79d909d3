pub mod clock;
pub mod history;
pub mod ledger;
pub mod processor;
pub mod publisher;
pub mod rating;
pub mod reconcile;
pub mod rewards;
pub mod store;
pub mod tasks;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::platform::{ChannelId, ChatPlatform, MessageId, UserId};
use crate::settings::Settings;

use clock::MonthClock;
use history::PointsHistoryReporter;
use processor::RatingProcessor;
#[cfg(test)]
use processor::StandingsSnapshot;
use publisher::LeaderboardPublisher;
use rating::RatingEmojiTable;
use reconcile::{ReconciliationEngine, ResyncMode};
use rewards::{RewardUnlockTracker, UnlockRecord};
use store::RewardStore;
use tasks::{TaskError, TaskKind, TaskQueue, TaskTicket};

pub type PrestigeResult<T> = core::result::Result<T, PrestigeError>;

#[derive(Debug, Error)]
pub enum PrestigeError {
    #[error("'{0}' is not a rating symbol")]
    NotARating(String),

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Entry point for everything the bot can ask of the points system.
///
/// Every operation hands its work to the task queue and returns straight away.
#[derive(Debug)]
pub struct Prestige {
    settings: Arc<Settings>,
    table: RatingEmojiTable,
    processor: Arc<RatingProcessor>,
    publisher: Arc<LeaderboardPublisher>,
    reconciler: Arc<ReconciliationEngine>,
    reporter: Arc<PointsHistoryReporter>,
    tasks: TaskQueue,
}

impl Prestige {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        settings: Arc<Settings>,
        clock: Arc<dyn MonthClock>,
        store: Arc<dyn RewardStore>,
        unlocks: HashMap<UserId, UnlockRecord>,
        tasks: TaskQueue,
    ) -> Self {
        let processor = Arc::new(RatingProcessor::new(
            platform.clone(),
            settings.clone(),
            clock,
            RewardUnlockTracker::new(unlocks, store),
        ));
        let publisher = Arc::new(LeaderboardPublisher::new(
            platform.clone(),
            settings.clone(),
            processor.clone(),
        ));
        let reconciler = Arc::new(ReconciliationEngine::new(
            platform.clone(),
            settings.clone(),
            processor.clone(),
            publisher.clone(),
        ));
        let reporter = Arc::new(PointsHistoryReporter::new(platform, settings.clone()));

        Self {
            settings,
            table: RatingEmojiTable,
            processor,
            publisher,
            reconciler,
            reporter,
            tasks,
        }
    }

    /// True when a reaction should be treated as a rating: a rating symbol, from the rater,
    /// in a submission channel
    pub fn is_rating_reaction(&self, channel: ChannelId, user: UserId, symbol: &str) -> bool {
        self.settings.is_submission_channel(channel)
            && user == self.settings.rater_user_id
            && self.table.is_rating(symbol)
    }

    pub fn add_rating(
        &self,
        channel: ChannelId,
        message: MessageId,
        symbol: &str,
    ) -> PrestigeResult<TaskTicket> {
        let score = self
            .table
            .score(symbol)
            .ok_or_else(|| PrestigeError::NotARating(symbol.to_string()))?;

        let processor = self.processor.clone();
        let publisher = self.publisher.clone();
        let ticket = self.tasks.submit(TaskKind::AddRating, async move {
            let outcome = match processor.process_live(channel, message, score).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(channel = %channel, message = %message, error = ?e, "failed to add rating");
                    return;
                }
            };

            if outcome.changes_leaderboard() {
                if let Err(e) = publisher.publish().await {
                    tracing::error!(error = ?e, "failed to publish leaderboard after rating");
                }
            }
        })?;
        Ok(ticket)
    }

    pub fn send_points_history(&self, contributor: UserId) -> PrestigeResult<TaskTicket> {
        let reporter = self.reporter.clone();
        let ticket = self.tasks.submit(TaskKind::PointsHistory, async move {
            reporter.send_history(contributor).await;
        })?;
        Ok(ticket)
    }

    pub fn resync_missed_points(&self) -> PrestigeResult<TaskTicket> {
        self.resync(TaskKind::ResyncMissed, ResyncMode::Missed)
    }

    pub fn resync_all(&self) -> PrestigeResult<TaskTicket> {
        self.resync(TaskKind::ResyncAll, ResyncMode::Full)
    }

    fn resync(&self, kind: TaskKind, mode: ResyncMode) -> PrestigeResult<TaskTicket> {
        let reconciler = self.reconciler.clone();
        let ticket = self.tasks.submit(kind, async move {
            reconciler.resync(mode).await;
        })?;
        Ok(ticket)
    }

    #[cfg(test)]
    pub async fn standings(&self) -> StandingsSnapshot {
        self.processor.snapshot().await
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        self.tasks.in_flight()
    }

    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
    }
}
