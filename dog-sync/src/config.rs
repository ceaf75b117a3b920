use std::collections::BTreeSet;
use std::time::Duration;

use dog_tenancy::RateLimitConfig;
use tracing::debug;

use crate::{CollectionName, SyncError, SyncResult};

/// Configuration for the sync engine and its reconcilers
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Poll interval for remote deltas while idle
    pub sync_interval: Duration,
    /// Upper bound on a single sync round
    pub round_timeout: Duration,
    /// Base retry backoff
    pub base_backoff: Duration,
    /// Maximum retry backoff
    pub max_backoff: Duration,
    /// Failed rounds tolerated before entering `Error`
    pub max_retries: u32,
    /// Time spent in `Error` before reconnecting
    pub error_cooldown: Duration,
    /// Mutations pushed / changes pulled per remote call batch
    pub batch_size: usize,
    pub lease_ttl: Duration,
    /// Capacity of the sync event broadcast channel
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(1),
            round_timeout: Duration::from_secs(10),
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
            max_retries: 5,
            error_cooldown: Duration::from_secs(5),
            batch_size: 100,
            lease_ttl: Duration::from_secs(30),
            event_capacity: 1024,
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_error_cooldown(mut self, cooldown: Duration) -> Self {
        self.error_cooldown = cooldown;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Exponential backoff before retry `attempt` (1-based), capped at `max_backoff`
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        std::cmp::min(self.base_backoff.saturating_mul(factor), self.max_backoff)
    }

    /// Defaults overridden by `PREFIX__KEY` environment variables.
    ///
    /// ```bash
    /// export DOGSYNC__SYNC_INTERVAL_MS=250
    /// export DOGSYNC__MAX_RETRIES=8
    /// ```
    pub fn from_env(prefix: &str) -> SyncResult<Self> {
        Self::from_vars(prefix, std::env::vars())
    }

    /// Same as [`from_env`](Self::from_env) over an explicit variable list
    pub fn from_vars<I>(prefix: &str, vars: I) -> SyncResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::default();
        let prefix = format!("{}__", prefix.to_uppercase());
        for (key, value) in vars {
            let Some(stripped) = key.strip_prefix(&prefix) else {
                continue;
            };
            let normalized = stripped.to_lowercase().replace("__", ".");
            config.set(&normalized, value.trim())?;
            debug!("sync config override {} = {}", normalized, value);
        }
        Ok(config)
    }

    fn set(&mut self, key: &str, value: &str) -> SyncResult<()> {
        match key {
            "sync_interval_ms" => self.sync_interval = millis(key, value)?,
            "round_timeout_ms" => self.round_timeout = millis(key, value)?,
            "base_backoff_ms" => self.base_backoff = millis(key, value)?,
            "max_backoff_ms" => self.max_backoff = millis(key, value)?,
            "max_retries" => self.max_retries = number(key, value)?,
            "error_cooldown_ms" => self.error_cooldown = millis(key, value)?,
            "batch_size" => self.batch_size = number::<usize>(key, value)?.max(1),
            "lease_ttl_ms" => self.lease_ttl = millis(key, value)?,
            "event_capacity" => self.event_capacity = number::<usize>(key, value)?.max(1),
            _ => debug!("ignoring unknown sync config key {}", key),
        }
        Ok(())
    }
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> SyncResult<T> {
    value
        .parse()
        .map_err(|_| SyncError::InvalidConfig(format!("{key}: expected a number, got {value:?}")))
}

fn millis(key: &str, value: &str) -> SyncResult<Duration> {
    number::<u64>(key, value).map(Duration::from_millis)
}

/// Configuration for the mutation gateway
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// Collections whose reads and writes require the admin role
    pub admin_collections: BTreeSet<CollectionName>,
    /// Per-user write rate limit; unlimited when `None`
    pub write_limit: Option<RateLimitConfig>,
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_admin_collection(mut self, collection: impl Into<CollectionName>) -> Self {
        self.admin_collections.insert(collection.into());
        self
    }

    pub fn with_write_limit(mut self, limit: RateLimitConfig) -> Self {
        self.write_limit = Some(limit);
        self
    }

    pub fn is_admin_restricted(&self, collection: &CollectionName) -> bool {
        self.admin_collections.contains(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn env_overrides_apply() {
        let config = SyncConfig::from_vars(
            "dogsync",
            vars(&[
                ("DOGSYNC__SYNC_INTERVAL_MS", "250"),
                ("DOGSYNC__MAX_RETRIES", "8"),
                ("OTHER__MAX_RETRIES", "1"),
                ("DOGSYNC__UNKNOWN", "x"),
            ]),
        )
        .unwrap();

        assert_eq!(config.sync_interval, Duration::from_millis(250));
        assert_eq!(config.max_retries, 8);
        assert_eq!(config.batch_size, SyncConfig::default().batch_size);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = SyncConfig::from_vars("DOGSYNC", vars(&[("DOGSYNC__BATCH_SIZE", "lots")])).unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(msg) if msg.contains("batch_size")));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = SyncConfig::default().with_backoff(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(config.backoff_for(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(350));
        assert_eq!(config.backoff_for(40), Duration::from_millis(350));
    }

    #[test]
    fn admin_collections() {
        let config = GatewayConfig::new().with_admin_collection("finances");
        assert!(config.is_admin_restricted(&"finances".into()));
        assert!(!config.is_admin_restricted(&"events".into()));
    }
}
