//! Record cache configuration.
//!
//! Reads from environment variables when built with [`CacheConfig::from_env`]:
//! - `TABLECACHE_REFRESH_SECS`: seconds between refresh cycles (default: 60)
//! - `TABLECACHE_EXPIRY_SECS`: seconds a snapshot stays fresh without being
//!   read (default: 300)

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

pub const REFRESH_ENV: &str = "TABLECACHE_REFRESH_SECS";
pub const EXPIRY_ENV: &str = "TABLECACHE_EXPIRY_SECS";

/// Timing knobs for one record cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Delay between the start of consecutive refresh cycles.
    pub refresh_interval: Duration,
    /// Sliding lifetime of a snapshot, measured from its last access.
    pub expiry: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            refresh_interval: Duration::from_secs(60),
            expiry: Duration::from_secs(5 * 60),
        }
    }
}

impl CacheConfig {
    /// Defaults overridden by any `TABLECACHE_*` variables that are set.
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServiceError> {
        let mut config = CacheConfig::default();
        if let Some(secs) = seconds(REFRESH_ENV, &lookup)? {
            config.refresh_interval = secs;
        }
        if let Some(secs) = seconds(EXPIRY_ENV, &lookup)? {
            config.expiry = secs;
        }
        Ok(config)
    }

    /// Rejects settings the refresh loop cannot run with.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.refresh_interval.is_zero() {
            return Err(ServiceError::InvalidConfig {
                key: "refresh_interval",
                value: format!("{:?}", self.refresh_interval),
            });
        }
        Ok(())
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }
}

fn seconds(
    key: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<Option<Duration>, ServiceError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        // tokio intervals panic on a zero period
        Ok(secs) if secs > 0 => Ok(Some(Duration::from_secs(secs))),
        _ => Err(ServiceError::InvalidConfig { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_defaults() {
        let config = CacheConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CacheConfig::default());
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.expiry, Duration::from_secs(300));
    }

    #[test]
    fn test_overrides() {
        let config =
            CacheConfig::from_lookup(lookup(&[(REFRESH_ENV, "5"), (EXPIRY_ENV, " 30 ")])).unwrap();
        assert_eq!(config.refresh_interval, Duration::from_secs(5));
        assert_eq!(config.expiry, Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_garbage_and_zero() {
        let err = CacheConfig::from_lookup(lookup(&[(REFRESH_ENV, "soon")])).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidConfig { key: REFRESH_ENV, .. }));

        let err = CacheConfig::from_lookup(lookup(&[(EXPIRY_ENV, "0")])).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidConfig { key: EXPIRY_ENV, .. }));
    }

    #[test]
    fn test_zero_refresh_interval_is_invalid() {
        assert!(CacheConfig::default().validate().is_ok());
        let config = CacheConfig::default().with_refresh_interval(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ServiceError::InvalidConfig { key: "refresh_interval", .. })
        ));
        assert!(CacheConfig::default().with_expiry(Duration::ZERO).validate().is_ok());
    }
}
