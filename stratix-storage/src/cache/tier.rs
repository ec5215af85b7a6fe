//! Cache tier abstraction.
//!
//! A tier stores opaque [`TierEntry`] values under [`KpiCacheKey`]s. Tiers
//! know nothing about expiry policy or generations beyond storing them; the
//! manager decides whether an entry may be served.

use std::fmt;

use async_trait::async_trait;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use stratix_core::{CacheError, Timestamp};

use super::journal::Generation;
use super::key::{KeyPattern, KpiCacheKey};

/// Position of a tier in the hierarchy, fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    InProcess,
    Distributed,
    Persistent,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::InProcess => "in_process",
            TierKind::Distributed => "distributed",
            TierKind::Persistent => "persistent",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored value with its cache metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierEntry {
    /// Serialized value (JSON).
    pub payload: Vec<u8>,
    pub cached_at: Timestamp,
    pub expires_at: Timestamp,
    /// Journal generation current when the value's computation started.
    pub generation: Generation,
}

/// Header: cached_at millis, expires_at millis, generation.
const HEADER_LEN: usize = 24;

impl TierEntry {
    /// Whether the entry has outlived its TTL at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Encode for byte-oriented tiers.
    ///
    /// Format: [cached_at: 8 bytes][expires_at: 8 bytes][generation: 8 bytes][payload]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len());
        bytes.extend_from_slice(&self.cached_at.timestamp_millis().to_le_bytes());
        bytes.extend_from_slice(&self.expires_at.timestamp_millis().to_le_bytes());
        bytes.extend_from_slice(&self.generation.get().to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Decode bytes produced by [`TierEntry::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        if bytes.len() < HEADER_LEN {
            return Err(CacheError::Serialization {
                reason: format!("entry too short: {} bytes", bytes.len()),
            });
        }

        let cached_at = decode_millis(&bytes[0..8], "cached_at")?;
        let expires_at = decode_millis(&bytes[8..16], "expires_at")?;
        let generation = Generation(u64::from_le_bytes(read_word(&bytes[16..24])?));

        Ok(Self {
            payload: bytes[HEADER_LEN..].to_vec(),
            cached_at,
            expires_at,
            generation,
        })
    }
}

fn read_word(bytes: &[u8]) -> Result<[u8; 8], CacheError> {
    bytes.try_into().map_err(|_| CacheError::Serialization {
        reason: "truncated header".to_string(),
    })
}

fn decode_millis(bytes: &[u8], field: &str) -> Result<Timestamp, CacheError> {
    let millis = i64::from_le_bytes(read_word(bytes)?);
    DateTime::from_timestamp_millis(millis).ok_or_else(|| CacheError::Serialization {
        reason: format!("invalid {} timestamp: {}", field, millis),
    })
}

/// One layer of the cache hierarchy.
///
/// Implementations must be safe for concurrent use; the manager never adds
/// locking of its own around tier calls.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Which layer this tier occupies.
    fn kind(&self) -> TierKind;

    /// Look up an entry, expired or not.
    async fn get(&self, key: &KpiCacheKey) -> Result<Option<TierEntry>, CacheError>;

    /// Store an entry, replacing any previous one.
    async fn set(&self, key: &KpiCacheKey, entry: TierEntry) -> Result<(), CacheError>;

    /// Drop every entry matching `pattern`. Returns how many were dropped.
    async fn invalidate(&self, pattern: &KeyPattern) -> Result<u64, CacheError>;

    /// Drop entries that expired before `now`. Returns how many.
    ///
    /// Tiers whose backend expires keys on its own keep the default.
    async fn purge_expired(&self, _now: Timestamp) -> Result<u64, CacheError> {
        Ok(0)
    }
}
