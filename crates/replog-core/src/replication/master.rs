//! Master node
//!
//! The master:
//! - Assigns ids and appends locally (the first acknowledgement)
//! - Replicates each entry until the requested write concern is met
//! - Monitors secondaries and repairs the ones that fall behind

use crate::replication::catchup::CatchUpRepairer;
use crate::replication::config::{MonitorConfig, ReplicationConfig};
use crate::replication::coordinator::{CoordinatorStats, ReplicationCoordinator};
use crate::replication::health::{HealthMonitor, SecondaryState};
use crate::replication::transport::Transport;
use crate::store::{LogEntry, MessageStore};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;

/// Result of an append on the master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Id assigned to the entry
    pub id: u64,
    /// Whether the write concern was met
    pub acknowledged: bool,
}

/// Master node for replication
pub struct Master {
    /// Local copy of the log
    store: Arc<MessageStore>,
    /// Next id to hand out
    next_id: AtomicU64,
    /// Secondary RPC addresses
    secondaries: Vec<String>,
    /// Largest accepted write concern, master included
    max_write_concern: u32,
    catch_up_batch: usize,
    monitor: Arc<HealthMonitor>,
    coordinator: Arc<ReplicationCoordinator>,
    catch_up: Mutex<Option<JoinHandle<()>>>,
}

impl Master {
    /// Create a master replicating to `secondaries`
    pub fn new(
        secondaries: Vec<String>,
        replication: ReplicationConfig,
        monitor_config: MonitorConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        replication.validate().map_err(Error::config)?;
        monitor_config.validate().map_err(Error::config)?;

        let store = Arc::new(MessageStore::new());
        let catch_up_batch = monitor_config.catch_up_batch;
        let monitor = Arc::new(HealthMonitor::new(
            &secondaries,
            monitor_config,
            transport.clone(),
            store.clone(),
        ));
        let coordinator = Arc::new(
            ReplicationCoordinator::new(replication, transport, monitor.shutdown_token())
                .with_health_monitor(monitor.clone()),
        );

        Ok(Self {
            store,
            next_id: AtomicU64::new(1),
            max_write_concern: secondaries.len() as u32 + 1,
            secondaries,
            catch_up_batch,
            monitor,
            coordinator,
            catch_up: Mutex::new(None),
        })
    }

    /// Override the largest accepted write concern
    pub fn with_max_write_concern(mut self, max: u32) -> Self {
        self.max_write_concern = max;
        self
    }

    /// Largest accepted write concern
    pub fn max_write_concern(&self) -> u32 {
        self.max_write_concern
    }

    /// Secondary addresses
    pub fn secondaries(&self) -> &[String] {
        &self.secondaries
    }

    /// Local store
    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    /// Health monitor
    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    /// Coordinator statistics
    pub fn stats(&self) -> CoordinatorStats {
        self.coordinator.stats()
    }

    /// Append `payload` and wait until `write_concern` nodes hold it.
    ///
    /// The local append counts as one acknowledgement, so `write_concern - 1`
    /// secondaries must confirm. Out-of-range concerns are rejected before an
    /// id is allocated.
    pub async fn append(
        &self,
        payload: impl Into<String>,
        write_concern: u32,
    ) -> Result<AppendOutcome> {
        if write_concern < 1 || write_concern > self.max_write_concern {
            return Err(Error::InvalidWriteConcern {
                requested: write_concern,
                max: self.max_write_concern,
            });
        }

        let payload = payload.into();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.store.append(id, payload.as_str());
        tracing::debug!(id, write_concern, "Appended locally");

        let acknowledged = self
            .coordinator
            .replicate(
                id,
                &payload,
                &self.secondaries,
                (write_concern - 1) as usize,
            )
            .await;

        Ok(AppendOutcome { id, acknowledged })
    }

    /// Visible log, contiguous prefix only
    pub fn messages(&self) -> Vec<LogEntry> {
        self.store.visible_snapshot()
    }

    /// Last known state of every secondary
    pub fn health(&self) -> Vec<SecondaryState> {
        self.monitor.snapshot()
    }

    /// Start health monitoring and catch-up
    pub fn start(&self) -> Result<()> {
        self.monitor.start()?;

        let repairer = CatchUpRepairer::new(
            self.monitor.clone(),
            self.coordinator.clone(),
            self.store.clone(),
            self.catch_up_batch,
        );
        *self.catch_up.lock() = Some(tokio::spawn(repairer.run()));

        tracing::info!(
            secondaries = ?self.secondaries,
            max_write_concern = self.max_write_concern,
            "Master started"
        );
        Ok(())
    }

    /// Stop monitoring, end pending quorum waits and join background tasks
    pub async fn shutdown(&self) {
        self.monitor.stop().await;

        let handle = self.catch_up.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Catch-up task ended abnormally: {}", e);
            }
        }
        tracing::info!("Master stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::protocol::{APPEND_OK, ServingStatus};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Every secondary acknowledges instantly
    struct AckTransport;

    #[async_trait]
    impl Transport for AckTransport {
        async fn append_entry(&self, _: &str, _: u64, _: &str, _: Duration) -> Result<i32> {
            Ok(APPEND_OK)
        }

        async fn last_contiguous_id(&self, _: &str, _: Duration) -> Result<u64> {
            Ok(0)
        }

        async fn heartbeat(&self, _: &str, _: &str, _: Duration) -> Result<ServingStatus> {
            Ok(ServingStatus::Serving)
        }
    }

    fn master() -> Master {
        Master::new(
            vec!["s1".into(), "s2".into()],
            ReplicationConfig::default(),
            MonitorConfig::default(),
            Arc::new(AckTransport),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_ids_start_at_one_and_increase() {
        let master = master();
        for expected in 1..=3 {
            let outcome = master.append(format!("m{}", expected), 3).await.unwrap();
            assert_eq!(outcome.id, expected);
            assert!(outcome.acknowledged);
        }

        let ids: Vec<u64> = master.messages().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_write_concern_range() {
        let master = master();
        assert_eq!(master.max_write_concern(), 3);

        for w in [0, 4] {
            let err = master.append("x", w).await.unwrap_err();
            assert!(matches!(err, Error::InvalidWriteConcern { .. }));
        }
        // Rejected appends do not consume ids
        assert_eq!(master.append("x", 1).await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_master_only_write_concern() {
        let master = master();
        let outcome = master.append("local", 1).await.unwrap();
        assert!(outcome.acknowledged);
        assert_eq!(master.stats().attempts, 0);
    }

    #[tokio::test]
    async fn test_health_starts_unhealthy() {
        let master = master();
        let health = master.health();
        assert_eq!(health.len(), 2);
        assert!(health.iter().all(|s| s.last_contiguous_id == -1));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Master::new(
            vec!["s1".into()],
            ReplicationConfig::default().with_poll_interval(Duration::ZERO),
            MonitorConfig::default(),
            Arc::new(AckTransport),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let master = master();
        master.start().unwrap();
        assert!(master.monitor().is_running());

        master.shutdown().await;
        assert!(!master.monitor().is_running());

        // Quorum waits end once the monitor is gone
        let outcome = master.append("late", 2).await.unwrap();
        assert!(!outcome.acknowledged);
    }
}
