use crate::platform::UserId;

use super::clock::Period;
use super::rating::Score;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub contributor: UserId,
    pub points: u64,
}

/// Lifetime and current-month point totals per contributor.
///
/// Entries keep the order in which contributors were first credited, so a stable sort by points
/// breaks ties by seniority. Monthly totals are only ever credited together with lifetime totals,
/// which keeps `monthly <= lifetime` for every contributor.
#[derive(Debug, Default)]
pub struct PointsLedger {
    lifetime: Vec<LedgerEntry>,
    monthly: Vec<LedgerEntry>,
    period: Option<Period>,
}

impl PointsLedger {
    pub fn period(&self) -> Option<Period> {
        self.period
    }

    /// Clears the monthly totals if `current` differs from the stored period.
    /// Returns true when a reset happened.
    pub fn roll_over(&mut self, current: Period) -> bool {
        if self.period == Some(current) {
            return false;
        }

        let had_period = self.period.is_some();
        self.monthly.clear();
        self.period = Some(current);
        had_period
    }

    /// Adds `score` to the contributor's lifetime total and, when `in_current_period`, to the
    /// monthly total as well. A zero score creates no entries. Returns the new lifetime total.
    pub fn credit(&mut self, contributor: UserId, score: Score, in_current_period: bool) -> u64 {
        if score.is_zero() {
            return self.lifetime(contributor);
        }

        if in_current_period {
            increment(&mut self.monthly, contributor, score.points());
        }
        increment(&mut self.lifetime, contributor, score.points())
    }

    pub fn lifetime(&self, contributor: UserId) -> u64 {
        total(&self.lifetime, contributor)
    }

    pub fn monthly(&self, contributor: UserId) -> u64 {
        total(&self.monthly, contributor)
    }

    /// Lifetime entries, ascending by points
    pub fn lifetime_standings(&self) -> Vec<LedgerEntry> {
        ascending(&self.lifetime)
    }

    /// Monthly entries, ascending by points
    pub fn monthly_standings(&self) -> Vec<LedgerEntry> {
        ascending(&self.monthly)
    }
}

fn increment(entries: &mut Vec<LedgerEntry>, contributor: UserId, points: u64) -> u64 {
    match entries.iter_mut().find(|e| e.contributor == contributor) {
        Some(entry) => {
            entry.points += points;
            entry.points
        }
        None => {
            entries.push(LedgerEntry {
                contributor,
                points,
            });
            points
        }
    }
}

fn total(entries: &[LedgerEntry], contributor: UserId) -> u64 {
    entries
        .iter()
        .find(|e| e.contributor == contributor)
        .map_or(0, |e| e.points)
}

fn ascending(entries: &[LedgerEntry]) -> Vec<LedgerEntry> {
    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|e| e.points);
    sorted
}
