use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::platform::UserId;
use crate::settings::RewardTier;

use super::store::RewardStore;

/// Which reward tiers a contributor has unlocked. Unlocks never revert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnlockRecord {
    unlocked: BTreeMap<String, bool>,
}

impl UnlockRecord {
    pub fn is_unlocked(&self, key: &str) -> bool {
        self.unlocked.get(key).copied().unwrap_or(false)
    }

    /// Returns true if the tier was not unlocked before
    pub fn unlock(&mut self, key: &str) -> bool {
        let previous = self.unlocked.insert(key.to_string(), true);
        previous != Some(true)
    }

    pub fn to_map(&self) -> BTreeMap<String, bool> {
        self.unlocked.clone()
    }
}

impl From<BTreeMap<String, bool>> for UnlockRecord {
    fn from(unlocked: BTreeMap<String, bool>) -> Self {
        Self { unlocked }
    }
}

/// In-memory unlock records, written through to the store on every change.
///
/// Persistence failures are logged and the in-memory state is kept, so a tier that was
/// announced stays unlocked for the rest of the run.
#[derive(Debug)]
pub struct RewardUnlockTracker {
    records: HashMap<UserId, UnlockRecord>,
    store: Arc<dyn RewardStore>,
}

impl RewardUnlockTracker {
    pub fn new(records: HashMap<UserId, UnlockRecord>, store: Arc<dyn RewardStore>) -> Self {
        Self { records, store }
    }

    #[cfg(test)]
    pub fn record(&self, contributor: UserId) -> Option<&UnlockRecord> {
        self.records.get(&contributor)
    }

    /// Creates and persists an all-locked record the first time a contributor is rated
    pub async fn ensure_record(&mut self, contributor: UserId, tiers: &[RewardTier]) {
        if self.records.contains_key(&contributor) {
            return;
        }

        let record = UnlockRecord::from(
            tiers
                .iter()
                .map(|t| (t.key.clone(), false))
                .collect::<BTreeMap<_, _>>(),
        );
        self.persist(contributor, &record).await;
        self.records.insert(contributor, record);
    }

    /// Tiers priced at or below `cumulative` that the contributor has not unlocked yet,
    /// in declaration (ascending price) order
    pub fn crossed<'t>(
        &self,
        contributor: UserId,
        cumulative: u64,
        tiers: &'t [RewardTier],
    ) -> Vec<&'t RewardTier> {
        let record = self.records.get(&contributor);
        tiers
            .iter()
            .filter(|t| t.price <= cumulative)
            .filter(|t| !record.is_some_and(|r| r.is_unlocked(&t.key)))
            .collect()
    }

    pub async fn unlock(&mut self, contributor: UserId, tier: &RewardTier) {
        let record = self.records.entry(contributor).or_default();
        if !record.unlock(&tier.key) {
            return;
        }

        let snapshot = record.clone();
        tracing::info!(contributor = %contributor, reward = %tier.key, "reward unlocked");
        self.persist(contributor, &snapshot).await;
    }

    async fn persist(&self, contributor: UserId, record: &UnlockRecord) {
        if let Err(e) = self.store.save(contributor, record).await {
            tracing::error!(contributor = %contributor, error = ?e, "failed to persist unlock record");
        }
    }
}
