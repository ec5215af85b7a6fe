//! LMDB-backed persistent tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped local
//! store that survives restarts and keeps serving when the shared tier is
//! unreachable.
//!
//! # Layout
//!
//! One unnamed database. Keys are rendered [`KpiCacheKey`] strings, so the
//! keys of one tenant (or one tenant area) are a contiguous prefix range.
//! Values are [`TierEntry::encode`] bytes.
//!
//! Write transactions run on the blocking pool. LMDB serialises writers, and
//! a caller bounded by a timeout must be able to give up on a stalled one.
//! Reads never wait on writers and stay inline.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use stratix_core::{CacheError, Timestamp};
use tracing::debug;

use super::key::{KeyPattern, KpiCacheKey};
use super::tier::{CacheTier, TierEntry, TierKind};

/// Error type for LMDB tier operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbTierError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// The blocking task running a write was cancelled or panicked.
    #[error("Blocking task failed: {0}")]
    Blocking(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbTierError> for CacheError {
    fn from(e: LmdbTierError) -> Self {
        CacheError::TierUnavailable {
            tier: TierKind::Persistent.to_string(),
            reason: e.to_string(),
        }
    }
}

fn txn_error(e: heed::Error) -> LmdbTierError {
    LmdbTierError::Transaction(e.to_string())
}

struct LmdbStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    entry_count: AtomicU64,
}

impl LmdbStore {
    fn get(&self, key: &[u8]) -> Result<Option<TierEntry>, CacheError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        match self.db.get(&rtxn, key).map_err(txn_error)? {
            Some(bytes) => Ok(Some(TierEntry::decode(bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &[u8], bytes: &[u8]) -> Result<(), LmdbTierError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let is_new = self.db.get(&wtxn, key).map_err(txn_error)?.is_none();
        self.db.put(&mut wtxn, key, bytes).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        if is_new {
            self.entry_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn purge_expired(&self, now: Timestamp) -> Result<u64, LmdbTierError> {
        let expired = {
            let rtxn = self.env.read_txn().map_err(txn_error)?;
            let mut keys = Vec::new();
            for result in self.db.iter(&rtxn).map_err(txn_error)? {
                let Ok((key, value)) = result else { continue };
                match TierEntry::decode(value) {
                    Ok(entry) if !entry.is_expired(now) => {}
                    // Undecodable entries are garbage as well.
                    _ => keys.push(key.to_vec()),
                }
            }
            keys
        };
        self.delete_keys(&expired)
    }

    fn invalidate_prefix(&self, prefix: &[u8]) -> Result<u64, LmdbTierError> {
        let keys = self.collect_keys_with_prefix(prefix)?;
        self.delete_keys(&keys)
    }

    fn collect_keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, LmdbTierError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let mut keys = Vec::new();
        for result in self.db.iter(&rtxn).map_err(txn_error)? {
            match result {
                Ok((key, _)) if key.starts_with(prefix) => keys.push(key.to_vec()),
                Ok(_) | Err(_) => continue,
            }
        }
        Ok(keys)
    }

    fn delete_keys(&self, keys: &[Vec<u8>]) -> Result<u64, LmdbTierError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut deleted = 0u64;
        for key in keys {
            if self.db.delete(&mut wtxn, key).map_err(txn_error)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;

        let _ = self
            .entry_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(deleted))
            });
        Ok(deleted)
    }
}

/// Persistent local fallback tier.
pub struct LmdbTier {
    store: Arc<LmdbStore>,
}

impl LmdbTier {
    /// Open (or create) the tier under `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbTierError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbTierError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbTierError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        let entry_count = {
            let rtxn = env.read_txn().map_err(txn_error)?;
            db.len(&rtxn).map_err(txn_error)?
        };

        Ok(Self {
            store: Arc::new(LmdbStore {
                env,
                db,
                entry_count: AtomicU64::new(entry_count),
            }),
        })
    }

    /// Number of stored entries, expired ones included.
    pub fn entry_count(&self) -> u64 {
        self.store.entry_count.load(Ordering::Relaxed)
    }

    /// Run `op` against the store on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T, LmdbTierError>
    where
        T: Send + 'static,
        F: FnOnce(&LmdbStore) -> Result<T, LmdbTierError> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| LmdbTierError::Blocking(e.to_string()))?
    }
}

#[async_trait]
impl CacheTier for LmdbTier {
    fn kind(&self) -> TierKind {
        TierKind::Persistent
    }

    async fn get(&self, key: &KpiCacheKey) -> Result<Option<TierEntry>, CacheError> {
        self.store.get(key.render().as_bytes())
    }

    async fn set(&self, key: &KpiCacheKey, entry: TierEntry) -> Result<(), CacheError> {
        let encoded_key = key.render();
        let bytes = entry.encode();
        Ok(self
            .blocking(move |store| store.put(encoded_key.as_bytes(), &bytes))
            .await?)
    }

    async fn invalidate(&self, pattern: &KeyPattern) -> Result<u64, CacheError> {
        let prefix = pattern.prefix();
        Ok(self
            .blocking(move |store| store.invalidate_prefix(prefix.as_bytes()))
            .await?)
    }

    async fn purge_expired(&self, now: Timestamp) -> Result<u64, CacheError> {
        let purged = self.blocking(move |store| store.purge_expired(now)).await?;
        debug!(purged, remaining = self.entry_count(), "Purged expired LMDB entries");
        Ok(purged)
    }
}
