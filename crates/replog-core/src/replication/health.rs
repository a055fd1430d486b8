//! Secondary health monitoring
//!
//! A single background task probes every secondary once per interval and
//! runs each result through a small state machine:
//!
//! ```text
//!   HEALTHY --fail--> SUSPECTED --fail x N--> UNHEALTHY
//!      ^                  |                       |
//!      +------success-----+-----------success-----+
//! ```
//!
//! SUSPECTED is quiet: entering it does not wake the consumer. Any other
//! status change, or a HEALTHY secondary whose contiguous id differs from
//! the master's, is queued as a change and handed to the single consumer
//! blocked in [`HealthMonitor::wait_for_changes`].

use crate::replication::config::{HeartbeatMode, MonitorConfig};
use crate::replication::protocol::ServingStatus;
use crate::replication::transport::Transport;
use crate::store::MessageStore;
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Sentinel for an inactive count that no longer counts anything
pub const INACTIVE_SENTINEL: i64 = -1;

/// Sentinel for a contiguous id never observed
pub const UNKNOWN_ID: i64 = -1;

/// Health classification of a secondary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Last heartbeat succeeded
    Healthy,
    /// Recent heartbeats failed, not yet given up on
    Suspected,
    /// Too many consecutive failures
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Suspected => write!(f, "SUSPECTED"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

/// Last known state of one secondary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecondaryState {
    /// Secondary RPC address (`host:port`)
    pub hostname: String,
    /// Current classification
    pub health_status: HealthStatus,
    /// Consecutive failed heartbeats, or [`INACTIVE_SENTINEL`]
    pub inactive_count: i64,
    /// Highest contiguous id reported, or [`UNKNOWN_ID`]
    pub last_contiguous_id: i64,
}

/// What a single heartbeat did to a secondary's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Status before the heartbeat
    pub previous: HealthStatus,
    /// Status after the heartbeat
    pub current: HealthStatus,
    /// Reported id went backwards
    pub regressed: bool,
}

impl SecondaryState {
    /// Fresh state: unhealthy until the first successful heartbeat
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            health_status: HealthStatus::Unhealthy,
            inactive_count: INACTIVE_SENTINEL,
            last_contiguous_id: UNKNOWN_ID,
        }
    }

    /// Apply one heartbeat result.
    ///
    /// `probe` is the reported contiguous id on success, `None` on failure.
    /// A SUSPECTED secondary goes UNHEALTHY on the first failure that finds
    /// `inactive_count` above `suspect_threshold`.
    pub fn apply_heartbeat(&mut self, probe: Option<u64>, suspect_threshold: i64) -> Transition {
        let previous = self.health_status;
        let mut regressed = false;

        match probe {
            Some(id) => {
                let id = id as i64;
                regressed = self.last_contiguous_id != UNKNOWN_ID && id < self.last_contiguous_id;
                self.health_status = HealthStatus::Healthy;
                self.inactive_count = 0;
                self.last_contiguous_id = id;
            }
            None => match self.health_status {
                HealthStatus::Healthy => {
                    self.health_status = HealthStatus::Suspected;
                    self.inactive_count = 1;
                }
                HealthStatus::Suspected if self.inactive_count > suspect_threshold => {
                    self.health_status = HealthStatus::Unhealthy;
                    self.inactive_count = INACTIVE_SENTINEL;
                }
                HealthStatus::Suspected => {
                    self.inactive_count += 1;
                }
                HealthStatus::Unhealthy => {}
            },
        }

        Transition {
            previous,
            current: self.health_status,
            regressed,
        }
    }

    /// Whether a transition must be handed to the consumer.
    ///
    /// `master_id` is the master's contiguous prefix at the time of the
    /// heartbeat round.
    pub fn needs_notification(&self, transition: &Transition, master_id: u64) -> bool {
        let status_changed = transition.previous != transition.current
            && transition.current != HealthStatus::Suspected;
        let lagging = self.health_status == HealthStatus::Healthy
            && self.last_contiguous_id != master_id as i64;

        status_changed || lagging || transition.regressed
    }
}

#[derive(Debug, Default)]
struct MonitorInner {
    secondaries: Vec<SecondaryState>,
    /// Changed secondaries since the consumer last drained
    pending: Vec<SecondaryState>,
}

/// Heartbeat-driven health monitor for the configured secondaries
pub struct HealthMonitor {
    config: MonitorConfig,
    transport: Arc<dyn Transport>,
    /// Master store, source of the comparison baseline
    store: Arc<MessageStore>,
    inner: Mutex<MonitorInner>,
    changed: Notify,
    running: AtomicBool,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Create a monitor for `secondaries`; nothing is probed until [`HealthMonitor::start`]
    pub fn new(
        secondaries: &[String],
        config: MonitorConfig,
        transport: Arc<dyn Transport>,
        store: Arc<MessageStore>,
    ) -> Self {
        let inner = MonitorInner {
            secondaries: secondaries.iter().map(SecondaryState::new).collect(),
            pending: Vec::new(),
        };

        Self {
            config,
            transport,
            store,
            inner: Mutex::new(inner),
            changed: Notify::new(),
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Spawn the polling loop
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.inner.lock().secondaries.is_empty() {
            return Err(Error::config(
                "list of monitored hosts is empty, cannot start health checking",
            ));
        }
        if self.shutdown.is_cancelled() {
            return Err(Error::internal("Health monitor already stopped"));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::internal("Health monitor already running"));
        }

        let monitor = self.clone();
        let handle = tokio::spawn(async move { monitor.monitor_secondaries().await });
        *self.task.lock() = Some(handle);

        tracing::info!(
            interval = ?self.config.interval,
            secondaries = self.inner.lock().secondaries.len(),
            "Health monitor started"
        );
        Ok(())
    }

    /// Stop polling, release the consumer and join the polling task
    pub async fn stop(&self) {
        tracing::info!("Stopping health monitor");
        self.shutdown.cancel();
        self.changed.notify_waiters();

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Health monitor task ended abnormally: {}", e);
            }
        }
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Health monitor joined");
    }

    /// Whether the polling loop is active
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }

    /// Token cancelled when the monitor stops
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Copy of every secondary's state
    pub fn snapshot(&self) -> Vec<SecondaryState> {
        self.inner.lock().secondaries.clone()
    }

    /// State of one secondary
    pub fn secondary(&self, hostname: &str) -> Option<SecondaryState> {
        self.inner
            .lock()
            .secondaries
            .iter()
            .find(|s| s.hostname == hostname)
            .cloned()
    }

    /// Status of one secondary
    pub fn status_of(&self, hostname: &str) -> Option<HealthStatus> {
        self.secondary(hostname).map(|s| s.health_status)
    }

    /// Master's contiguous id, the baseline secondaries are compared against
    pub fn master_last_id(&self) -> u64 {
        self.store.contiguous_prefix()
    }

    /// Block until at least one change is pending, then drain the batch.
    ///
    /// Returns an empty batch once the monitor is stopped, without draining.
    pub async fn wait_for_changes(&self) -> Vec<SecondaryState> {
        loop {
            if self.shutdown.is_cancelled() {
                return Vec::new();
            }
            {
                let mut inner = self.inner.lock();
                if !inner.pending.is_empty() {
                    return std::mem::take(&mut inner.pending);
                }
            }

            tokio::select! {
                _ = self.changed.notified() => {}
                _ = self.shutdown.cancelled() => return Vec::new(),
            }
        }
    }

    async fn monitor_secondaries(&self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.cancelled() => break,
            }
            self.send_heartbeats().await;
        }
        tracing::info!("Health monitor loop stopped");
    }

    /// Probe every secondary once and fold the results into their states
    pub async fn send_heartbeats(&self) {
        let hosts: Vec<String> = self
            .inner
            .lock()
            .secondaries
            .iter()
            .map(|s| s.hostname.clone())
            .collect();

        // Probes run concurrently; a slow host does not hold up the others
        let results =
            futures::future::join_all(hosts.iter().map(|host| self.probe(host.as_str()))).await;
        self.record_round(&hosts, &results);
    }

    fn record_round(&self, hosts: &[String], results: &[Option<u64>]) {
        let master_id = self.master_last_id();
        let threshold = self.config.suspect_threshold;
        let mut notify = false;

        let mut inner = self.inner.lock();
        let MonitorInner {
            secondaries,
            pending,
        } = &mut *inner;

        for (host, result) in hosts.iter().zip(results) {
            let Some(state) = secondaries.iter_mut().find(|s| &s.hostname == host) else {
                continue;
            };
            let transition = state.apply_heartbeat(*result, threshold);

            if transition.regressed {
                tracing::warn!(
                    secondary = %host,
                    reported = state.last_contiguous_id,
                    "Secondary contiguous id went backwards, resyncing from reported id"
                );
            }
            if transition.previous != transition.current {
                tracing::info!(
                    secondary = %host,
                    from = %transition.previous,
                    to = %transition.current,
                    "Secondary status changed"
                );
            }

            if state.needs_notification(&transition, master_id) {
                match pending.iter_mut().find(|p| &p.hostname == host) {
                    Some(existing) => *existing = state.clone(),
                    None => pending.push(state.clone()),
                }
                notify = true;
            }
        }
        drop(inner);

        if notify {
            self.changed.notify_one();
        }
    }

    async fn probe(&self, host: &str) -> Option<u64> {
        let timeout = self.config.probe_timeout;

        if let HeartbeatMode::HealthCheck { service_name } = &self.config.heartbeat {
            match self.transport.heartbeat(host, service_name, timeout).await {
                Ok(ServingStatus::Serving) => {}
                Ok(ServingStatus::NotServing) => {
                    tracing::debug!(secondary = %host, "Secondary reports NOT_SERVING");
                    return None;
                }
                Err(e) => {
                    tracing::debug!(secondary = %host, "Heartbeat failed: {}", e);
                    return None;
                }
            }
        }

        match self.transport.last_contiguous_id(host, timeout).await {
            Ok(id) => {
                tracing::debug!(secondary = %host, last_id = id, "Secondary is alive");
                Some(id)
            }
            Err(e) => {
                tracing::debug!(secondary = %host, "Secondary not responding: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    const THRESHOLD: i64 = 5;

    #[test]
    fn test_initial_state() {
        let state = SecondaryState::new("127.0.0.1:50051");
        assert_eq!(state.health_status, HealthStatus::Unhealthy);
        assert_eq!(state.inactive_count, INACTIVE_SENTINEL);
        assert_eq!(state.last_contiguous_id, UNKNOWN_ID);
    }

    #[test]
    fn test_single_failure_is_suspected() {
        let mut state = SecondaryState::new("s1");
        state.apply_heartbeat(Some(3), THRESHOLD);

        let transition = state.apply_heartbeat(None, THRESHOLD);
        assert_eq!(transition.previous, HealthStatus::Healthy);
        assert_eq!(state.health_status, HealthStatus::Suspected);
        assert_eq!(state.inactive_count, 1);
        // Failure leaves the last known id alone
        assert_eq!(state.last_contiguous_id, 3);
    }

    #[test]
    fn test_sixth_failure_while_suspected_is_unhealthy() {
        let mut state = SecondaryState::new("s1");
        state.apply_heartbeat(Some(0), THRESHOLD);
        state.apply_heartbeat(None, THRESHOLD);

        for _ in 0..5 {
            state.apply_heartbeat(None, THRESHOLD);
            assert_eq!(state.health_status, HealthStatus::Suspected);
        }
        assert_eq!(state.inactive_count, 6);

        let transition = state.apply_heartbeat(None, THRESHOLD);
        assert_eq!(transition.previous, HealthStatus::Suspected);
        assert_eq!(state.health_status, HealthStatus::Unhealthy);
        assert_eq!(state.inactive_count, INACTIVE_SENTINEL);

        state.apply_heartbeat(None, THRESHOLD);
        assert_eq!(state.health_status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_success_restores_healthy_from_any_state() {
        for failures in [0, 1, 10] {
            let mut state = SecondaryState::new("s1");
            state.apply_heartbeat(Some(1), THRESHOLD);
            for _ in 0..failures {
                state.apply_heartbeat(None, THRESHOLD);
            }

            state.apply_heartbeat(Some(4), THRESHOLD);
            assert_eq!(state.health_status, HealthStatus::Healthy);
            assert_eq!(state.inactive_count, 0);
            assert_eq!(state.last_contiguous_id, 4);
        }
    }

    #[test]
    fn test_suspected_is_quiet() {
        let mut state = SecondaryState::new("s1");
        state.apply_heartbeat(Some(5), THRESHOLD);

        let transition = state.apply_heartbeat(None, THRESHOLD);
        assert!(!state.needs_notification(&transition, 5));
    }

    #[test]
    fn test_healthy_and_unhealthy_transitions_notify() {
        let mut state = SecondaryState::new("s1");
        let transition = state.apply_heartbeat(Some(5), THRESHOLD);
        assert!(state.needs_notification(&transition, 5));

        for _ in 0..7 {
            let transition = state.apply_heartbeat(None, THRESHOLD);
            if state.health_status == HealthStatus::Unhealthy {
                assert!(state.needs_notification(&transition, 5));
                return;
            }
        }
        panic!("secondary never became unhealthy");
    }

    #[test]
    fn test_lag_notifies_while_healthy() {
        let mut state = SecondaryState::new("s1");
        state.apply_heartbeat(Some(10), THRESHOLD);

        let transition = state.apply_heartbeat(Some(10), THRESHOLD);
        assert!(!state.needs_notification(&transition, 10));

        let transition = state.apply_heartbeat(Some(7), THRESHOLD);
        assert!(transition.regressed);
        assert!(state.needs_notification(&transition, 10));

        let transition = state.apply_heartbeat(Some(8), THRESHOLD);
        assert!(!transition.regressed);
        assert!(state.needs_notification(&transition, 10));
    }

    /// Transport whose per-host answers can be flipped between rounds
    #[derive(Default)]
    struct ScriptedTransport {
        answers: Mutex<HashMap<String, Option<u64>>>,
    }

    impl ScriptedTransport {
        fn set(&self, host: &str, answer: Option<u64>) {
            self.answers.lock().insert(host.to_string(), answer);
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn append_entry(&self, _: &str, _: u64, _: &str, _: Duration) -> Result<i32> {
            Ok(0)
        }

        async fn last_contiguous_id(&self, target: &str, _: Duration) -> Result<u64> {
            self.answers
                .lock()
                .get(target)
                .copied()
                .flatten()
                .ok_or_else(|| Error::timeout(target.to_string()))
        }

        async fn heartbeat(&self, target: &str, _: &str, _: Duration) -> Result<ServingStatus> {
            match self.answers.lock().get(target) {
                Some(Some(_)) => Ok(ServingStatus::Serving),
                _ => Ok(ServingStatus::NotServing),
            }
        }
    }

    fn monitor_with(
        transport: Arc<ScriptedTransport>,
        store: Arc<MessageStore>,
        heartbeat: HeartbeatMode,
    ) -> Arc<HealthMonitor> {
        let hosts = vec!["s1".to_string(), "s2".to_string()];
        let config = MonitorConfig::default()
            .with_interval(Duration::from_millis(50))
            .with_heartbeat(heartbeat);
        Arc::new(HealthMonitor::new(&hosts, config, transport, store))
    }

    #[tokio::test]
    async fn test_round_queues_only_notifiable_changes() {
        let transport = Arc::new(ScriptedTransport::default());
        let store = Arc::new(MessageStore::new());
        store.append(1, "a");
        let monitor = monitor_with(transport.clone(), store, HeartbeatMode::LastContiguousId);

        transport.set("s1", Some(1));
        transport.set("s2", Some(1));
        monitor.send_heartbeats().await;
        let changed = monitor.wait_for_changes().await;
        assert_eq!(changed.len(), 2);

        // s1 blips: SUSPECTED stays quiet; s2 is caught up, nothing to report
        transport.set("s1", None);
        monitor.send_heartbeats().await;
        assert_eq!(monitor.status_of("s1"), Some(HealthStatus::Suspected));
        assert!(monitor.inner.lock().pending.is_empty());

        // s2 falls behind the master
        monitor.store.append(2, "b");
        monitor.send_heartbeats().await;
        let changed = monitor.wait_for_changes().await;
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].hostname, "s2");
        assert_eq!(changed[0].last_contiguous_id, 1);
    }

    #[tokio::test]
    async fn test_batch_keeps_latest_state_per_host() {
        let transport = Arc::new(ScriptedTransport::default());
        let store = Arc::new(MessageStore::new());
        for id in 1..=5 {
            store.append(id, "x");
        }
        let monitor = monitor_with(transport.clone(), store, HeartbeatMode::LastContiguousId);

        transport.set("s1", Some(2));
        monitor.send_heartbeats().await;
        transport.set("s1", Some(3));
        monitor.send_heartbeats().await;

        let changed = monitor.wait_for_changes().await;
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].last_contiguous_id, 3);
    }

    #[tokio::test]
    async fn test_health_check_mode_requires_serving() {
        let transport = Arc::new(ScriptedTransport::default());
        let monitor = monitor_with(
            transport.clone(),
            Arc::new(MessageStore::new()),
            HeartbeatMode::HealthCheck {
                service_name: "replog".into(),
            },
        );

        transport.set("s1", Some(0));
        monitor.send_heartbeats().await;
        assert_eq!(monitor.status_of("s1"), Some(HealthStatus::Healthy));
        assert_eq!(monitor.status_of("s2"), Some(HealthStatus::Unhealthy));
        assert_eq!(monitor.status_of("s3"), None);
    }

    #[tokio::test]
    async fn test_stop_releases_waiting_consumer() {
        let transport = Arc::new(ScriptedTransport::default());
        let monitor = monitor_with(
            transport,
            Arc::new(MessageStore::new()),
            HeartbeatMode::LastContiguousId,
        );
        monitor.start().unwrap();
        assert!(monitor.is_running());

        let waiter = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.wait_for_changes().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        monitor.stop().await;
        assert!(!monitor.is_running());

        let drained = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("consumer was not released")
            .unwrap();
        assert!(drained.is_empty());
        assert!(monitor.start().is_err());
    }

    #[tokio::test]
    async fn test_start_without_secondaries_fails() {
        let monitor = Arc::new(HealthMonitor::new(
            &[],
            MonitorConfig::default(),
            Arc::new(ScriptedTransport::default()),
            Arc::new(MessageStore::new()),
        ));
        assert!(monitor.start().is_err());
    }

    #[tokio::test]
    async fn test_polling_loop_reports_recovery() {
        let transport = Arc::new(ScriptedTransport::default());
        let monitor = monitor_with(
            transport.clone(),
            Arc::new(MessageStore::new()),
            HeartbeatMode::LastContiguousId,
        );
        transport.set("s2", Some(0));
        monitor.start().unwrap();

        let changed = tokio::time::timeout(Duration::from_secs(2), monitor.wait_for_changes())
            .await
            .unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].hostname, "s2");
        assert_eq!(changed[0].health_status, HealthStatus::Healthy);

        monitor.stop().await;
    }
}
