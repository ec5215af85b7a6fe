//! Configuration types

use crate::{ConfigError, StratixError, StratixResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-tier cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTierConfig {
    /// In-process tier TTL in milliseconds
    #[serde(with = "duration_millis")]
    pub in_process_ttl: Duration,
    /// Distributed tier TTL in milliseconds
    #[serde(with = "duration_millis")]
    pub distributed_ttl: Duration,
    /// Persistent tier TTL in milliseconds
    #[serde(with = "duration_millis")]
    pub persistent_ttl: Duration,
    /// Upper bound on any single tier call, in milliseconds
    #[serde(with = "duration_millis")]
    pub tier_timeout: Duration,
    pub in_process_capacity: usize,
    /// Period of the expired-entry purge, in milliseconds
    #[serde(with = "duration_millis")]
    pub maintenance_interval: Duration,
}

impl Default for CacheTierConfig {
    fn default() -> Self {
        Self {
            in_process_ttl: Duration::from_secs(30),
            distributed_ttl: Duration::from_secs(300),
            persistent_ttl: Duration::from_secs(3600),
            tier_timeout: Duration::from_millis(250),
            in_process_capacity: 10_000,
            maintenance_interval: Duration::from_secs(60),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tolerance for weight-sum comparisons.
    pub weight_epsilon: f64,
    /// Minimum configured weight (percent) before hybrid uses subtasks.
    pub hybrid_threshold: f64,
    /// Optimistic commit attempts before surfacing a conflict.
    pub max_commit_retries: u32,
    /// Minimum spacing between background refreshes of one tenant, in milliseconds
    #[serde(with = "duration_millis")]
    pub refresh_throttle: Duration,
    pub cache: CacheTierConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weight_epsilon: 0.01,
            hybrid_threshold: 80.0,
            max_commit_retries: 3,
            refresh_throttle: Duration::from_secs(5),
            cache: CacheTierConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment.
    ///
    /// Missing or unparsable variables keep their default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let weight_epsilon = env_parse("STRATIX_WEIGHT_EPSILON").unwrap_or(defaults.weight_epsilon);
        let hybrid_threshold =
            env_parse("STRATIX_HYBRID_THRESHOLD").unwrap_or(defaults.hybrid_threshold);
        let max_commit_retries =
            env_parse("STRATIX_MAX_COMMIT_RETRIES").unwrap_or(defaults.max_commit_retries);

        let in_process_ttl = env_parse("STRATIX_CACHE_IN_PROCESS_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.cache.in_process_ttl);
        let distributed_ttl = env_parse("STRATIX_CACHE_DISTRIBUTED_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.cache.distributed_ttl);
        let persistent_ttl = env_parse("STRATIX_CACHE_PERSISTENT_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.cache.persistent_ttl);
        let tier_timeout = env_parse("STRATIX_CACHE_TIER_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.cache.tier_timeout);
        let in_process_capacity = env_parse("STRATIX_CACHE_IN_PROCESS_CAPACITY")
            .unwrap_or(defaults.cache.in_process_capacity);
        let maintenance_interval = env_parse("STRATIX_CACHE_MAINTENANCE_INTERVAL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.cache.maintenance_interval);

        let refresh_throttle = env_parse("STRATIX_REFRESH_THROTTLE_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.refresh_throttle);

        Self {
            weight_epsilon,
            hybrid_threshold,
            max_commit_retries,
            refresh_throttle,
            cache: CacheTierConfig {
                in_process_ttl,
                distributed_ttl,
                persistent_ttl,
                tier_timeout,
                in_process_capacity,
                maintenance_interval,
            },
        }
    }

    /// Parse a TOML document. Omitted fields keep their default; durations
    /// are in milliseconds.
    pub fn from_toml_str(source: &str) -> StratixResult<Self> {
        toml::from_str(source).map_err(|e| {
            StratixError::Config(ConfigError::InvalidValue {
                field: "toml".to_string(),
                value: source.lines().next().unwrap_or_default().to_string(),
                reason: e.message().to_string(),
            })
        })
    }

    /// Validate the configuration.
    ///
    /// Checks:
    /// - weight_epsilon is within [0, 1)
    /// - hybrid_threshold is within (0, 100]
    /// - every TTL is positive and in-process <= distributed <= persistent
    /// - tier_timeout, in_process_capacity and maintenance_interval are
    ///   positive
    pub fn validate(&self) -> StratixResult<()> {
        if !(0.0..1.0).contains(&self.weight_epsilon) {
            return Err(invalid(
                "weight_epsilon",
                self.weight_epsilon,
                "weight_epsilon must be within [0, 1)",
            ));
        }

        if !(self.hybrid_threshold > 0.0 && self.hybrid_threshold <= 100.0) {
            return Err(invalid(
                "hybrid_threshold",
                self.hybrid_threshold,
                "hybrid_threshold must be within (0, 100]",
            ));
        }

        let cache = &self.cache;
        for (field, ttl) in [
            ("cache.in_process_ttl", cache.in_process_ttl),
            ("cache.distributed_ttl", cache.distributed_ttl),
            ("cache.persistent_ttl", cache.persistent_ttl),
        ] {
            if ttl.is_zero() {
                return Err(invalid(field, format!("{:?}", ttl), "TTL must be positive"));
            }
        }

        if cache.in_process_ttl > cache.distributed_ttl {
            return Err(invalid(
                "cache.in_process_ttl",
                format!("{:?}", cache.in_process_ttl),
                "in-process TTL must not exceed the distributed TTL",
            ));
        }

        if cache.distributed_ttl > cache.persistent_ttl {
            return Err(invalid(
                "cache.distributed_ttl",
                format!("{:?}", cache.distributed_ttl),
                "distributed TTL must not exceed the persistent TTL",
            ));
        }

        if cache.tier_timeout.is_zero() {
            return Err(invalid(
                "cache.tier_timeout",
                format!("{:?}", cache.tier_timeout),
                "tier_timeout must be positive",
            ));
        }

        if cache.in_process_capacity == 0 {
            return Err(invalid(
                "cache.in_process_capacity",
                cache.in_process_capacity,
                "in_process_capacity must be greater than 0",
            ));
        }

        if cache.maintenance_interval.is_zero() {
            return Err(invalid(
                "cache.maintenance_interval",
                format!("{:?}", cache.maintenance_interval),
                "maintenance_interval must be positive",
            ));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> StratixError {
    StratixError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

// ============================================================================
// SERDE HELPERS
// ============================================================================

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
