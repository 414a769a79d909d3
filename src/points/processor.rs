use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::constants::PROCESSED_MARKER;
use crate::platform::{ChannelId, ChatPlatform, Emoji, Message, MessageId, PlatformError, UserId};
use crate::settings::{RewardTier, Settings};

use super::clock::{ClockError, MonthClock, Period};
use super::ledger::{LedgerEntry, PointsLedger};
use super::rating::Score;
use super::rewards::RewardUnlockTracker;

pub type ProcessResult<T> = core::result::Result<T, ProcessError>;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Clock(#[from] ClockError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedRating {
    pub contributor: UserId,
    pub score: Score,
    pub lifetime: u64,
    pub monthly: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RatingOutcome {
    /// The message already carried the processed marker
    Skipped,
    Applied(AppliedRating),
}

impl RatingOutcome {
    /// Zero-score ratings never change what the leaderboard shows
    pub fn changes_leaderboard(&self) -> bool {
        matches!(self, RatingOutcome::Applied(a) if !a.score.is_zero())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandingsSnapshot {
    pub period: Option<Period>,
    pub lifetime: Vec<LedgerEntry>,
    pub monthly: Vec<LedgerEntry>,
}

#[derive(Debug)]
struct Standings {
    ledger: PointsLedger,
    unlocks: RewardUnlockTracker,
}

/// Applies ratings to the ledger and reward tracker.
///
/// All ledger, period and unlock state lives behind one lock that is held for the whole of a
/// rating, from the rollover check through to the processed marker being written. Two ratings
/// never interleave, even for different contributors.
#[derive(Debug)]
pub struct RatingProcessor {
    platform: Arc<dyn ChatPlatform>,
    settings: Arc<Settings>,
    clock: Arc<dyn MonthClock>,
    standings: Mutex<Standings>,
}

impl RatingProcessor {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        settings: Arc<Settings>,
        clock: Arc<dyn MonthClock>,
        unlocks: RewardUnlockTracker,
    ) -> Self {
        Self {
            platform,
            settings,
            clock,
            standings: Mutex::new(Standings {
                ledger: PointsLedger::default(),
                unlocks,
            }),
        }
    }

    pub fn clock(&self) -> &dyn MonthClock {
        self.clock.as_ref()
    }

    /// Fetches the message fresh from the platform and applies a live rating to it
    #[instrument(skip(self))]
    pub async fn process_live(
        &self,
        channel: ChannelId,
        message: MessageId,
        score: Score,
    ) -> ProcessResult<RatingOutcome> {
        let message = self.platform.fetch_message(channel, message).await?;
        self.process(&message, score, true).await
    }

    #[instrument(skip(self, message), fields(message = %message.id, contributor = %message.author.id))]
    pub async fn process(
        &self,
        message: &Message,
        score: Score,
        skip_if_processed: bool,
    ) -> ProcessResult<RatingOutcome> {
        let contributor = message.author.id;
        let current = self.clock.current_period();
        let submitted = self.clock.period_of_millis(message.id.created_at_ms())?;

        let mut standings = self.standings.lock().await;

        if standings.ledger.roll_over(current) {
            tracing::info!(period = %current, "monthly leaderboard reset");
        }

        if skip_if_processed && self.is_processed(message).await? {
            tracing::debug!("already processed, skipping");
            return Ok(RatingOutcome::Skipped);
        }

        let counted_this_month = submitted == current;
        let lifetime = standings
            .ledger
            .credit(contributor, score, counted_this_month);

        let tiers = &self.settings.rewards;
        standings.unlocks.ensure_record(contributor, tiers).await;

        let crossed: Vec<RewardTier> = standings
            .unlocks
            .crossed(contributor, lifetime, tiers)
            .into_iter()
            .cloned()
            .collect();
        for tier in &crossed {
            standings.unlocks.unlock(contributor, tier).await;
            self.announce_unlock(contributor, tier).await;
        }

        self.platform
            .add_reaction(
                message.channel_id,
                message.id,
                &Emoji::unicode(PROCESSED_MARKER),
            )
            .await?;

        let monthly = standings.ledger.monthly(contributor);
        tracing::info!(
            score = %score,
            lifetime,
            monthly,
            counted_this_month,
            unlocked = crossed.len(),
            "rating applied"
        );

        Ok(RatingOutcome::Applied(AppliedRating {
            contributor,
            score,
            lifetime,
            monthly,
        }))
    }

    pub async fn snapshot(&self) -> StandingsSnapshot {
        let standings = self.standings.lock().await;
        StandingsSnapshot {
            period: standings.ledger.period(),
            lifetime: standings.ledger.lifetime_standings(),
            monthly: standings.ledger.monthly_standings(),
        }
    }

    /// (lifetime, monthly) totals for one contributor
    #[cfg(test)]
    pub async fn totals(&self, contributor: UserId) -> (u64, u64) {
        let standings = self.standings.lock().await;
        (
            standings.ledger.lifetime(contributor),
            standings.ledger.monthly(contributor),
        )
    }

    #[cfg(test)]
    pub async fn is_unlocked(&self, contributor: UserId, key: &str) -> bool {
        let standings = self.standings.lock().await;
        standings
            .unlocks
            .record(contributor)
            .is_some_and(|r| r.is_unlocked(key))
    }

    async fn is_processed(&self, message: &Message) -> ProcessResult<bool> {
        let reactors = self
            .platform
            .fetch_reactors(
                message.channel_id,
                message.id,
                &Emoji::unicode(PROCESSED_MARKER),
            )
            .await?;
        Ok(reactors.contains(&self.settings.bot_user_id))
    }

    async fn announce_unlock(&self, contributor: UserId, tier: &RewardTier) {
        let notices = [
            (
                self.settings.moderator_user_id,
                format!(
                    "User {} has unlocked **{}**",
                    contributor.mention(),
                    tier.name
                ),
            ),
            (contributor, format!("You have unlocked **{}**", tier.name)),
        ];

        for (recipient, text) in notices {
            if let Err(e) = self.platform.send_direct_message(recipient, &text).await {
                tracing::warn!(recipient = %recipient, reward = %tier.key, error = ?e, "unlock notice not delivered");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;
    use crate::platform::mock::MockPlatform;
    use crate::points::clock::FixedClock;
    use crate::points::store::{MemoryRewardStore, RewardStore};
    use crate::settings::fixture::{self, BOT, FANARTS, MODERATOR, RATER};

    struct Harness {
        platform: Arc<MockPlatform>,
        clock: Arc<FixedClock>,
        store: Arc<MemoryRewardStore>,
        processor: RatingProcessor,
    }

    fn harness() -> Harness {
        let platform = Arc::new(MockPlatform::new(BOT));
        let clock = Arc::new(FixedClock::at(2024, 3, 20));
        let store = Arc::new(MemoryRewardStore::default());
        let processor = RatingProcessor::new(
            platform.clone(),
            Arc::new(fixture::settings()),
            clock.clone(),
            RewardUnlockTracker::new(HashMap::new(), store.clone()),
        );
        Harness {
            platform,
            clock,
            store,
            processor,
        }
    }

    fn score(v: u8) -> Score {
        Score::new(v).unwrap()
    }

    impl Harness {
        fn submission(&self, year: i32, month: u32, day: u32, author: UserId) -> Message {
            let id = MessageId::from_datetime(FixedClock::date(year, month, day)).0 + author.0;
            let id = self.platform.post(FANARTS, MessageId(id), author);
            self.platform.message(FANARTS, id).unwrap()
        }
    }

    #[tokio::test]
    async fn rollover_scenario() {
        let h = harness();
        let a = UserId(1);

        let first = h.submission(2024, 3, 2, a);
        let second = h.submission(2024, 3, 5, a);
        h.processor.process(&first, score(5), true).await.unwrap();
        h.processor.process(&second, score(3), true).await.unwrap();
        assert_eq!(h.processor.totals(a).await, (8, 8));

        h.clock.set(2024, 4, 2);
        let third = h.submission(2024, 4, 1, a);
        h.processor.process(&third, score(3), true).await.unwrap();
        assert_eq!(h.processor.totals(a).await, (11, 3));
    }

    #[tokio::test]
    async fn second_pass_with_skip_is_a_no_op() {
        let h = harness();
        let a = UserId(1);
        let message = h.submission(2024, 3, 2, a);

        let first = h.processor.process(&message, score(4), true).await.unwrap();
        assert!(first.changes_leaderboard());
        assert!(h.platform.is_marked(FANARTS, message.id, PROCESSED_MARKER));

        let again = h.processor.process(&message, score(4), true).await.unwrap();
        assert_eq!(again, RatingOutcome::Skipped);
        assert_eq!(h.processor.totals(a).await, (4, 4));

        // a full recount re-applies
        let forced = h.processor.process(&message, score(4), false).await.unwrap();
        assert!(matches!(forced, RatingOutcome::Applied(_)));
        assert_eq!(h.processor.totals(a).await, (8, 8));
    }

    #[tokio::test]
    async fn zero_score_marks_without_crediting() {
        let h = harness();
        let a = UserId(1);
        let message = h.submission(2024, 3, 2, a);

        let outcome = h.processor.process(&message, Score::ZERO, true).await.unwrap();
        assert!(!outcome.changes_leaderboard());
        assert!(h.platform.is_marked(FANARTS, message.id, PROCESSED_MARKER));

        let snapshot = h.processor.snapshot().await;
        assert!(snapshot.lifetime.is_empty());
        assert!(snapshot.monthly.is_empty());
        // the contributor still gets a record on first rating
        assert!(h.store.saved(a).is_some());
    }

    #[tokio::test]
    async fn old_submission_counts_towards_lifetime_only() {
        let h = harness();
        let a = UserId(1);
        let old = h.submission(2024, 1, 15, a);

        let outcome = h.processor.process(&old, score(6), true).await.unwrap();
        let RatingOutcome::Applied(applied) = outcome else {
            panic!("expected the rating to apply");
        };
        assert_eq!((applied.lifetime, applied.monthly), (6, 0));
        assert_eq!(h.processor.totals(a).await, (6, 0));
    }

    #[tokio::test]
    async fn tier_unlocks_exactly_at_its_price() {
        let h = harness();
        let a = UserId(1);

        let first = h.submission(2024, 3, 1, a);
        let second = h.submission(2024, 3, 2, a);
        h.processor.process(&first, score(9), true).await.unwrap();
        assert!(!h.processor.is_unlocked(a, "special_discord_role").await);
        assert!(h.platform.direct_to(a).is_empty());

        let outcome = h.processor.process(&second, score(1), true).await.unwrap();
        assert!(outcome.changes_leaderboard());
        assert!(h.processor.is_unlocked(a, "special_discord_role").await);
        assert!(
            h.store
                .saved(a)
                .unwrap()
                .is_unlocked("special_discord_role")
        );
        assert_eq!(
            h.platform.direct_to(MODERATOR),
            vec!["User <@1> has unlocked **Special Discord Role**".to_string()]
        );
        assert_eq!(
            h.platform.direct_to(a),
            vec!["You have unlocked **Special Discord Role**".to_string()]
        );
    }

    #[tokio::test]
    async fn tiers_unlocked_before_a_restart_stay_quiet() {
        let platform = Arc::new(MockPlatform::new(BOT));
        let store = Arc::new(MemoryRewardStore::default());
        let a = UserId(1);

        let mut earlier = crate::points::rewards::UnlockRecord::default();
        earlier.unlock("special_discord_role");
        store.save(a, &earlier).await.unwrap();
        let saves_before = store.save_count();

        let processor = RatingProcessor::new(
            platform.clone(),
            Arc::new(fixture::settings()),
            Arc::new(FixedClock::at(2024, 3, 20)),
            RewardUnlockTracker::new(store.load_all().await.unwrap(), store.clone()),
        );

        for day in 1..=2 {
            let id = MessageId::from_datetime(FixedClock::date(2024, 3, day));
            let id = platform.post(FANARTS, id, a);
            let message = platform.message(FANARTS, id).unwrap();
            processor.process(&message, score(6), true).await.unwrap();
        }

        assert_eq!(processor.totals(a).await, (12, 12));
        assert!(processor.is_unlocked(a, "special_discord_role").await);
        assert!(platform.direct_to(MODERATOR).is_empty());
        assert!(platform.direct_to(a).is_empty());
        assert_eq!(store.save_count(), saves_before);
    }

    #[tokio::test]
    async fn failed_notice_does_not_block_unlocking() {
        let h = harness();
        let a = UserId(1);
        h.platform.fail_direct_messages_to(MODERATOR);

        for day in 1..=3 {
            let message = h.submission(2024, 3, day, a);
            h.processor.process(&message, score(9), true).await.unwrap();
        }

        assert!(h.processor.is_unlocked(a, "special_discord_role").await);
        assert!(h.processor.is_unlocked(a, "chaos_cat_doodle").await);
        assert_eq!(h.platform.direct_to(a).len(), 2);
    }

    #[tokio::test]
    async fn platform_failure_leaves_ledger_untouched() {
        let h = harness();
        let a = UserId(1);
        let message = h.submission(2024, 3, 2, a);
        h.platform.fail_message(message.id);

        let err = h.processor.process(&message, score(5), true).await;
        assert!(matches!(err, Err(ProcessError::Platform(_))));
        assert_eq!(h.processor.totals(a).await, (0, 0));
    }

    #[tokio::test]
    async fn rater_reaction_does_not_count_as_marker() {
        let h = harness();
        let a = UserId(1);
        let message = h.submission(2024, 3, 2, a);
        h.platform.react(FANARTS, message.id, PROCESSED_MARKER, RATER);
        let message = h.platform.message(FANARTS, message.id).unwrap();

        let outcome = h.processor.process(&message, score(2), true).await.unwrap();
        assert!(matches!(outcome, RatingOutcome::Applied(_)));
    }

    #[tokio::test]
    async fn concurrent_ratings_are_serialised() {
        let h = Arc::new(harness());
        let a = UserId(1);
        let mut messages = Vec::new();
        for day in 1..=20 {
            messages.push(h.submission(2024, 3, day, a));
        }

        let mut set = tokio::task::JoinSet::new();
        for message in messages {
            let h = h.clone();
            set.spawn(async move { h.processor.process(&message, score(1), true).await });
        }
        while let Some(joined) = set.join_next().await {
            joined.unwrap().unwrap();
        }

        assert_eq!(h.processor.totals(a).await, (20, 20));
    }
}
