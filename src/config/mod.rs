//! Configuration module
//!
//! Application settings loaded from a config file, overridden by
//! `AUTOTESTER_*` environment variables and finally by command line flags.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig};
pub use file::{default_config_path, ConfigFile};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::executor::DEFAULT_MAX_CONCURRENT;
use crate::poller::PollConfig;
use crate::probes::ProbeSettings;
use crate::results::FileJobStore;

/// Application configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Endpoint tasks running at once per job
    pub max_concurrent: usize,

    /// Per-request probe timeout in seconds
    pub probe_timeout_secs: u64,

    /// Extra attempts after a transport failure
    pub probe_retries: u32,

    /// Average response time above which the response-time probe fails
    pub max_response_time_ms: Option<f64>,

    /// Status polling
    pub poll: PollSettings,

    /// Finished jobs older than this are pruned; unset keeps them forever
    pub retention_hours: Option<u64>,

    /// Address the HTTP API listens on
    pub bind: String,

    /// Job store directory; defaults to the platform data directory
    pub store_dir: Option<PathBuf>,

    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            probe_timeout_secs: 10,
            probe_retries: 0,
            max_response_time_ms: None,
            poll: PollSettings::default(),
            retention_hours: None,
            bind: "127.0.0.1:5000".to_string(),
            store_dir: None,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Apply environment overrides on top of file values
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(n) = env.concurrent {
            self.max_concurrent = n;
        }
        if let Some(secs) = env.timeout {
            self.probe_timeout_secs = secs;
        }
        if let Some(dir) = &env.store_dir {
            self.store_dir = Some(PathBuf::from(dir));
        }
        if let Some(bind) = &env.bind {
            self.bind = bind.clone();
        }
        if let Some(hours) = env.retention_hours {
            self.retention_hours = Some(hours);
        }
        if let Some(level) = &env.log_level {
            self.log_level = level.clone();
        }
    }

    pub fn store_dir(&self) -> PathBuf {
        self.store_dir
            .clone()
            .unwrap_or_else(FileJobStore::default_dir)
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention_hours
            .map(|hours| Duration::from_secs(hours * 3600))
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            max_response_time_ms: self.max_response_time_ms,
            retries: self.probe_retries,
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig::new()
            .interval(Duration::from_millis(self.poll.interval_ms))
            .max_attempts(self.poll.max_attempts)
            .grace_delay(Duration::from_millis(self.poll.grace_delay_ms))
    }
}

/// Poller timing in config-file units
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub interval_ms: u64,
    pub max_attempts: u32,
    pub grace_delay_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_attempts: 60,
            grace_delay_ms: 3000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.probe_timeout_secs, 10);
        assert_eq!(config.probe_retries, 0);
        assert!(config.retention().is_none());

        let poll = config.poll_config();
        assert_eq!(poll.interval, Duration::from_secs(1));
        assert_eq!(poll.max_attempts, 60);
        assert_eq!(poll.grace_delay, Duration::from_secs(3));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config.apply_env(&EnvConfig {
            concurrent: Some(8),
            retention_hours: Some(24),
            bind: Some("0.0.0.0:8080".to_string()),
            ..Default::default()
        });

        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.retention(), Some(Duration::from_secs(86_400)));
        assert_eq!(config.probe_timeout_secs, 10);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: AppConfig = serde_yaml::from_str("max_concurrent: 2\npoll:\n  max_attempts: 5\n").unwrap();
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.poll.max_attempts, 5);
        assert_eq!(config.poll.interval_ms, 1000);
        assert_eq!(config.bind, "127.0.0.1:5000");
    }
}
