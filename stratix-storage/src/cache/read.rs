//! Read results carrying their origin.
//!
//! The read path never fails, so callers need another way to tell a fresh
//! value from a degraded one. Every read is wrapped in [`CacheRead`], which
//! records where the value came from and when it was produced.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stratix_core::Timestamp;

use super::tier::TierKind;

/// Where a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "tier")]
pub enum ReadOrigin {
    /// A live entry of this tier.
    Tier(TierKind),
    /// Recomputed from storage on this read.
    Computed,
    /// Recompute failed; an expired or superseded entry of this tier was
    /// served instead.
    Stale(TierKind),
    /// Recompute failed and nothing was cached; the value is a placeholder.
    Unavailable,
}

impl ReadOrigin {
    pub fn is_cache_hit(&self) -> bool {
        matches!(self, ReadOrigin::Tier(_))
    }

    /// Whether the value may not reflect the latest committed data.
    pub fn is_degraded(&self) -> bool {
        matches!(self, ReadOrigin::Stale(_) | ReadOrigin::Unavailable)
    }
}

/// Result of a cache read, carrying freshness metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    value: T,
    /// When the value was produced (cached or computed).
    cached_at: Timestamp,
    origin: ReadOrigin,
}

impl<T> CacheRead<T> {
    /// A live hit from `tier`.
    pub fn from_tier(value: T, cached_at: Timestamp, tier: TierKind) -> Self {
        Self {
            value,
            cached_at,
            origin: ReadOrigin::Tier(tier),
        }
    }

    /// A value recomputed at `computed_at`.
    pub fn computed(value: T, computed_at: Timestamp) -> Self {
        Self {
            value,
            cached_at: computed_at,
            origin: ReadOrigin::Computed,
        }
    }

    /// A stale fallback from `tier`.
    pub fn stale(value: T, cached_at: Timestamp, tier: TierKind) -> Self {
        Self {
            value,
            cached_at,
            origin: ReadOrigin::Stale(tier),
        }
    }

    /// A placeholder produced when nothing better exists.
    pub fn unavailable(value: T, at: Timestamp) -> Self {
        Self {
            value,
            cached_at: at,
            origin: ReadOrigin::Unavailable,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn cached_at(&self) -> Timestamp {
        self.cached_at
    }

    pub fn origin(&self) -> ReadOrigin {
        self.origin
    }

    pub fn was_cache_hit(&self) -> bool {
        self.origin.is_cache_hit()
    }

    pub fn is_degraded(&self) -> bool {
        self.origin.is_degraded()
    }

    /// Age of the value as of `now`.
    pub fn staleness(&self, now: Timestamp) -> Duration {
        (now - self.cached_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
            origin: self.origin,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
