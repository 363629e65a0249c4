//! Scheduler configuration (TOML).
//!
//! ```toml
//! address = "10.0.0.5"
//! port = 6000
//! lease_ttl_ms = 30000
//!
//! [retry]
//! charge_lease_expiry = false
//!
//! [backoff]
//! base_delay_ms = 50
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Result, SpiderError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Address this scheduler registers with; matched against data locality.
    pub address: String,
    pub port: u16,
    pub lease_ttl_ms: u64,
    pub poll_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Ready tasks fetched per poll.
    pub batch_size: usize,
    /// Leases held at once by one scheduler.
    pub max_in_flight: usize,
    pub retry: RetryConfig,
    pub backoff: BackoffConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".into(),
            port: 6000,
            lease_ttl_ms: 30_000,
            poll_interval_ms: 500,
            heartbeat_interval_ms: 5_000,
            batch_size: 16,
            max_in_flight: 8,
            retry: RetryConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Count a reclaimed lease against the task's retry budget.
    pub charge_lease_expiry: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 50,
            multiplier: 2.0,
            max_delay_ms: 5_000,
        }
    }
}

impl SchedulerConfig {
    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.lease_ttl_ms as i64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Renew cadence for held leases: a third of the TTL.
    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis((self.lease_ttl_ms / 3).max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(SpiderError::Config("address must not be empty".into()));
        }
        if self.lease_ttl_ms == 0 {
            return Err(SpiderError::Config("lease_ttl_ms must be positive".into()));
        }
        if self.lease_ttl_ms > i64::MAX as u64 {
            return Err(SpiderError::Config("lease_ttl_ms is out of range".into()));
        }
        if self.batch_size == 0 {
            return Err(SpiderError::Config("batch_size must be positive".into()));
        }
        if self.max_in_flight == 0 {
            return Err(SpiderError::Config("max_in_flight must be positive".into()));
        }
        if self.heartbeat_interval_ms >= self.lease_ttl_ms {
            return Err(SpiderError::Config(format!(
                "heartbeat_interval_ms ({}) must be shorter than lease_ttl_ms ({})",
                self.heartbeat_interval_ms, self.lease_ttl_ms
            )));
        }
        let backoff = &self.backoff;
        if !(backoff.multiplier.is_finite() && backoff.multiplier >= 1.0) {
            return Err(SpiderError::Config(
                "backoff.multiplier must be a finite number >= 1".into(),
            ));
        }
        if backoff.max_delay_ms < backoff.base_delay_ms {
            return Err(SpiderError::Config(
                "backoff.max_delay_ms must not be below base_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Read and parse a TOML file without semantic checks.
pub fn load_from_path<T>(path: impl AsRef<Path>) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .map_err(|e| SpiderError::Config(format!("reading {}: {e}", path.display())))?;
    Ok(toml::from_str(&contents)?)
}

/// Load and validate a scheduler config.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<SchedulerConfig> {
    let config: SchedulerConfig = load_from_path(path)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = SchedulerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.lease_ttl(), chrono::Duration::seconds(30));
        assert_eq!(config.renew_interval(), Duration::from_millis(10_000));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "address = \"10.1.1.1\"\nlease_ttl_ms = 9000\n[retry]\ncharge_lease_expiry = true"
        )
        .unwrap();

        let config = load_and_validate(file.path()).unwrap();
        assert_eq!(config.address, "10.1.1.1");
        assert_eq!(config.lease_ttl_ms, 9000);
        assert!(config.retry.charge_lease_expiry);
        assert_eq!(config.batch_size, 16);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = toml::from_str::<SchedulerConfig>("lease_ttl = 5").unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_and_validate("/nonexistent/spider.toml").unwrap_err();
        assert!(matches!(err, SpiderError::Config(_)));
    }

    #[rstest]
    #[case::zero_ttl(|c: &mut SchedulerConfig| c.lease_ttl_ms = 0)]
    #[case::zero_batch(|c: &mut SchedulerConfig| c.batch_size = 0)]
    #[case::zero_in_flight(|c: &mut SchedulerConfig| c.max_in_flight = 0)]
    #[case::slow_heartbeat(|c: &mut SchedulerConfig| c.heartbeat_interval_ms = c.lease_ttl_ms)]
    #[case::shrinking_backoff(|c: &mut SchedulerConfig| c.backoff.multiplier = 0.5)]
    fn invalid_configs_are_rejected(#[case] mutate: fn(&mut SchedulerConfig)) {
        let mut config = SchedulerConfig::default();
        mutate(&mut config);
        assert!(matches!(config.validate(), Err(SpiderError::Config(_))));
    }
}
