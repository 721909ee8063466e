//! Durable identity mapping (external loan id -> local deal id) and the
//! per-loan sync lock registry.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use loanbridge_core::DealId;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "loanbridge-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reading identity store {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("identity store {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Write(#[from] anyhow::Error),
}

/// Durable table of external-loan-id -> local-deal-id.
///
/// Archived deals are invisible to the destination's list and search
/// endpoints, so this mapping is consulted before any remote search to keep
/// re-syncs of archived loans from creating duplicates. The whole file is
/// read on each access and rewritten on each mutation; writes go through a
/// temp file and rename so a crash never leaves a torn table.
#[derive(Debug)]
pub struct IdentityStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, external_id: &str) -> Result<Option<DealId>, StoreError> {
        let mappings = self.load_all().await?;
        Ok(mappings.get(external_id).copied().map(DealId))
    }

    pub async fn put(&self, external_id: &str, deal_id: DealId) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut mappings = self.load_all().await?;
        mappings.insert(external_id.to_string(), deal_id.0);
        self.save_all(&mappings).await?;
        debug!(external_id, %deal_id, "stored identity mapping");
        Ok(())
    }

    pub async fn remove(&self, external_id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut mappings = self.load_all().await?;
        if mappings.remove(external_id).is_some() {
            self.save_all(&mappings).await?;
            debug!(external_id, "removed identity mapping");
        }
        Ok(())
    }

    async fn load_all(&self) -> Result<BTreeMap<String, i64>, StoreError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source: err,
                })
            }
        };
        serde_json::from_str(&raw).map_err(|err| StoreError::Parse {
            path: self.path.clone(),
            source: err,
        })
    }

    async fn save_all(&self, mappings: &BTreeMap<String, i64>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating store directory {}", parent.display()))?;
            }
        }

        let body =
            serde_json::to_vec_pretty(mappings).context("serializing identity mappings")?;
        let temp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4()));

        let mut file = fs::File::create(&temp_path)
            .await
            .with_context(|| format!("creating temp store file {}", temp_path.display()))?;
        file.write_all(&body)
            .await
            .with_context(|| format!("writing temp store file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp store file {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &self.path).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(StoreError::Write(anyhow::Error::new(err).context(format!(
                    "atomically renaming {} -> {}",
                    temp_path.display(),
                    self.path.display()
                ))))
            }
        }
    }
}

/// In-process lock registry keyed by external loan id. A guard is held for
/// the duration of a whole resolve call so two simultaneous first-syncs of
/// the same loan cannot both create a deal. Entries nobody holds are pruned
/// on the next acquire, so the map stays bounded by concurrency, not by the
/// number of distinct loans ever seen.
#[derive(Debug, Default)]
pub struct SyncLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SyncLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, external_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().await;
            // A strong count of one means the map holds the only reference:
            // no guard is held and nobody is waiting on the entry.
            map.retain(|key, lock| key == external_id || Arc::strong_count(lock) > 1);
            map.entry(external_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}
