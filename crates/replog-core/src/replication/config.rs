//! Replication configuration

use crate::replication::DEFAULT_SERVICE_NAME;
use crate::retry::{RetryPolicy, duration_millis};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Node role in the replication topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Accepts appends, assigns ids and replicates them
    Master,
    /// Receives entries from the master and serves reads
    Secondary,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Master => write!(f, "master"),
            NodeRole::Secondary => write!(f, "secondary"),
        }
    }
}

/// How the health monitor probes a secondary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HeartbeatMode {
    /// A successful `GetLastContiguousId` call is the liveness signal
    LastContiguousId,
    /// `Heartbeat` must report SERVING, then the id is fetched
    HealthCheck {
        /// Service name sent with the heartbeat
        service_name: String,
    },
}

impl Default for HeartbeatMode {
    fn default() -> Self {
        Self::LastContiguousId
    }
}

impl HeartbeatMode {
    /// Health-check mode for the default service name
    pub fn health_check() -> Self {
        Self::HealthCheck {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

/// Settings for the quorum append path and single-target sync
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Deadline for one append attempt to one secondary
    #[serde(with = "duration_millis")]
    pub attempt_deadline: Duration,

    /// Longest the quorum wait blocks before re-scanning attempts
    #[serde(with = "duration_millis")]
    pub quorum_poll_interval: Duration,

    /// Bound on waiting for cancelled attempts to finish
    #[serde(with = "duration_millis")]
    pub drain_timeout: Duration,

    /// Delay strategy between attempts to a failing secondary
    pub retry: RetryPolicy,

    /// Deadline for a catch-up `sync_one` call
    #[serde(with = "duration_millis")]
    pub sync_deadline: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            attempt_deadline: Duration::from_secs(2),
            quorum_poll_interval: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            sync_deadline: Duration::from_secs(2),
        }
    }
}

impl ReplicationConfig {
    /// Set per-attempt deadline
    pub fn with_attempt_deadline(mut self, deadline: Duration) -> Self {
        self.attempt_deadline = deadline;
        self
    }

    /// Set quorum poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.quorum_poll_interval = interval;
        self
    }

    /// Set retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.attempt_deadline.is_zero() {
            return Err("attempt_deadline must be non-zero".into());
        }
        if self.quorum_poll_interval.is_zero() {
            return Err("quorum_poll_interval must be non-zero".into());
        }
        if self.sync_deadline.is_zero() {
            return Err("sync_deadline must be non-zero".into());
        }
        self.retry.validate()
    }
}

/// Settings for the heartbeat loop and catch-up
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Time between heartbeat rounds
    #[serde(with = "duration_millis")]
    pub interval: Duration,

    /// Deadline for a single probe
    #[serde(with = "duration_millis")]
    pub probe_timeout: Duration,

    /// Failures tolerated while SUSPECTED before going UNHEALTHY
    pub suspect_threshold: i64,

    /// Liveness probe flavour
    pub heartbeat: HeartbeatMode,

    /// Entries pushed per catch-up event
    pub catch_up_batch: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(crate::replication::DEFAULT_HEARTBEAT_SECS),
            probe_timeout: Duration::from_secs(2),
            suspect_threshold: crate::replication::SUSPECT_THRESHOLD,
            heartbeat: HeartbeatMode::LastContiguousId,
            catch_up_batch: 1,
        }
    }
}

impl MonitorConfig {
    /// Set heartbeat interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set probe flavour
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatMode) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Set catch-up batch size
    pub fn with_catch_up_batch(mut self, batch: usize) -> Self {
        self.catch_up_batch = batch;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.interval.is_zero() {
            return Err("heartbeat interval must be non-zero".into());
        }
        if self.probe_timeout.is_zero() {
            return Err("probe_timeout must be non-zero".into());
        }
        if self.suspect_threshold < 0 {
            return Err("suspect_threshold must not be negative".into());
        }
        if self.catch_up_batch == 0 {
            return Err("catch_up_batch must be at least 1".into());
        }
        if let HeartbeatMode::HealthCheck { service_name } = &self.heartbeat {
            if service_name.is_empty() {
                return Err("health check service name must not be empty".into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs_validate() {
        assert!(ReplicationConfig::default().validate().is_ok());
        assert!(MonitorConfig::default().validate().is_ok());
        assert_eq!(MonitorConfig::default().catch_up_batch, 1);
        assert_eq!(MonitorConfig::default().suspect_threshold, 5);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = MonitorConfig::default().with_interval(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = ReplicationConfig::default().with_poll_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_service_name_rejected() {
        let config = MonitorConfig::default().with_heartbeat(HeartbeatMode::HealthCheck {
            service_name: String::new(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(NodeRole::Master.to_string(), "master");
        assert_eq!(NodeRole::Secondary.to_string(), "secondary");
    }
}
