use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::rewards::UnlockRecord;
use crate::platform::UserId;

pub type StoreResult<T> = core::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("malformed unlock record {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("{0} exists but is not a directory")]
    NotADirectory(PathBuf),
}

/// Persistence for per-contributor reward unlocks.
#[async_trait]
pub trait RewardStore: Send + Sync + fmt::Debug {
    /// Every stored record. Any unreadable record fails the whole load.
    async fn load_all(&self) -> StoreResult<HashMap<UserId, UnlockRecord>>;

    async fn save(&self, contributor: UserId, record: &UnlockRecord) -> StoreResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredUnlocks {
    unlocked_rewards: BTreeMap<String, bool>,
}

/// One `<user id>.json` file per contributor under `dir`.
#[derive(Debug, Clone)]
pub struct JsonRewardStore {
    dir: PathBuf,
}

impl JsonRewardStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, contributor: UserId) -> PathBuf {
        self.dir.join(format!("{contributor}.json"))
    }

    async fn load_file(path: &Path) -> StoreResult<(UserId, UnlockRecord)> {
        let malformed = |reason: String| StoreError::Malformed {
            path: path.to_path_buf(),
            reason,
        };

        let contributor = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| malformed("file name is not valid utf-8".into()))?
            .parse::<UserId>()
            .map_err(|e| malformed(format!("file name is not a user id: {e}")))?;

        let raw = tokio::fs::read_to_string(path).await?;
        let stored: StoredUnlocks =
            serde_json::from_str(&raw).map_err(|e| malformed(e.to_string()))?;

        Ok((contributor, UnlockRecord::from(stored.unlocked_rewards)))
    }
}

#[async_trait]
impl RewardStore for JsonRewardStore {
    #[tracing::instrument(skip(self), fields(dir = %self.dir.display()))]
    async fn load_all(&self) -> StoreResult<HashMap<UserId, UnlockRecord>> {
        match tokio::fs::metadata(&self.dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(StoreError::NotADirectory(self.dir.clone())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&self.dir).await?;
                tracing::info!("created empty reward data directory");
                return Ok(HashMap::new());
            }
            Err(e) => return Err(e.into()),
        }

        let mut records = HashMap::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                tracing::warn!(path = %path.display(), "ignoring interrupted write");
                continue;
            }

            let (contributor, record) = Self::load_file(&path).await?;
            records.insert(contributor, record);
        }

        tracing::info!(records = records.len(), "reward unlocks loaded");
        Ok(records)
    }

    async fn save(&self, contributor: UserId, record: &UnlockRecord) -> StoreResult<()> {
        let stored = StoredUnlocks {
            unlocked_rewards: record.to_map(),
        };
        let raw = serde_json::to_string_pretty(&stored)?;

        let path = self.record_path(contributor);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(contributor = %contributor, path = %path.display(), "unlock record saved");
        Ok(())
    }
}

#[cfg(test)]
pub use memory::MemoryRewardStore;
