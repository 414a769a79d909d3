use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::constants::{MAX_MESSAGE_LENGTH, NO_ENTRIES};
use crate::platform::{ChatPlatform, MessageCursor, PlatformError};
use crate::settings::Settings;

use super::clock::Period;
use super::ledger::LedgerEntry;
use super::processor::{RatingProcessor, StandingsSnapshot};

pub type PublishResult<T> = core::result::Result<T, PublishError>;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// `"1 point"`, `"7 points"`
pub fn points_label(points: u64) -> String {
    let suffix = if points == 1 { "" } else { "s" };
    format!("{points} point{suffix}")
}

/// Greedily packs `entries` into messages of at most `cap` bytes.
///
/// The first message starts with `header`. An entry is never split across two messages; one that
/// cannot fit even on its own is cut down to `cap` bytes on a char boundary.
pub fn paginate<I>(header: &str, entries: I, cap: usize) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut pages = Vec::new();
    let mut current = String::from(header);
    let mut any = false;

    for entry in entries {
        any = true;
        if current.len() + entry.len() > cap && !current.is_empty() {
            pages.push(std::mem::take(&mut current));
        }

        if entry.len() > cap {
            tracing::warn!(len = entry.len(), cap, "entry longer than a whole message, truncating");
            current.push_str(truncate(&entry, cap));
        } else {
            current.push_str(&entry);
        }
    }

    if !any {
        current.push_str(NO_ENTRIES);
    }
    if !current.is_empty() {
        pages.push(current);
    }
    pages
}

fn truncate(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn leaderboard_lines(entries: &[LedgerEntry]) -> impl Iterator<Item = String> + '_ {
    entries
        .iter()
        .map(|e| format!("{}: {}\n", points_label(e.points), e.contributor.mention()))
}

/// Both leaderboards, lifetime first, as ready-to-send messages
pub fn render_leaderboards(
    title: &str,
    period: Period,
    snapshot: &StandingsSnapshot,
) -> Vec<String> {
    let full_header = format!("**Full {title} Leaderboard:**\n");
    let monthly_header = format!(
        "**Monthly {title} Leaderboard - {}:**\n",
        period.month_name()
    );

    let mut pages = paginate(
        &full_header,
        leaderboard_lines(&snapshot.lifetime),
        MAX_MESSAGE_LENGTH,
    );
    pages.extend(paginate(
        &monthly_header,
        leaderboard_lines(&snapshot.monthly),
        MAX_MESSAGE_LENGTH,
    ));
    pages
}

/// Replaces the bot's messages in the leaderboard channel with freshly rendered standings.
#[derive(Debug)]
pub struct LeaderboardPublisher {
    platform: Arc<dyn ChatPlatform>,
    settings: Arc<Settings>,
    processor: Arc<RatingProcessor>,
    publishing: Mutex<()>,
}

impl LeaderboardPublisher {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        settings: Arc<Settings>,
        processor: Arc<RatingProcessor>,
    ) -> Self {
        Self {
            platform,
            settings,
            processor,
            publishing: Mutex::new(()),
        }
    }

    /// Returns the number of messages sent
    #[instrument(skip(self))]
    pub async fn publish(&self) -> PublishResult<usize> {
        let _serial = self.publishing.lock().await;

        let removed = self.clear().await?;

        let snapshot = self.processor.snapshot().await;
        let period = snapshot
            .period
            .unwrap_or_else(|| self.processor.clock().current_period());
        let pages = render_leaderboards(&self.settings.leaderboard_title, period, &snapshot);

        let channel = self.settings.leaderboard_channel_id;
        for page in &pages {
            self.platform.send_message(channel, page).await?;
        }

        tracing::info!(removed, sent = pages.len(), "leaderboard published");
        Ok(pages.len())
    }

    async fn clear(&self) -> PublishResult<usize> {
        let channel = self.settings.leaderboard_channel_id;
        let mut cursor = MessageCursor::new(channel);
        let mut removed = 0;

        while let Some(page) = cursor.next_page(self.platform.as_ref()).await? {
            for message in page
                .iter()
                .filter(|m| m.author.id == self.settings.bot_user_id)
            {
                self.platform.delete_message(channel, message.id).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}
