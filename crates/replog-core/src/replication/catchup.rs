//! Catch-up of lagging secondaries
//!
//! Consumes change batches from the health monitor. For every reachable
//! secondary in a batch it pushes the entry right after the secondary's
//! reported contiguous id, up to `batch` entries per event. Lagging
//! secondaries keep getting reported while they are behind, so each
//! heartbeat round closes at least one more gap.

use crate::replication::coordinator::ReplicationCoordinator;
use crate::replication::health::{HealthMonitor, HealthStatus, SecondaryState, UNKNOWN_ID};
use crate::store::MessageStore;
use std::sync::Arc;

/// Pushes missing entries to lagging secondaries
pub struct CatchUpRepairer {
    monitor: Arc<HealthMonitor>,
    coordinator: Arc<ReplicationCoordinator>,
    store: Arc<MessageStore>,
    batch: usize,
}

impl CatchUpRepairer {
    /// Create a repairer pushing up to `batch` entries per change event
    pub fn new(
        monitor: Arc<HealthMonitor>,
        coordinator: Arc<ReplicationCoordinator>,
        store: Arc<MessageStore>,
        batch: usize,
    ) -> Self {
        Self {
            monitor,
            coordinator,
            store,
            batch: batch.max(1),
        }
    }

    /// Consume change batches until the monitor stops
    pub async fn run(self) {
        tracing::info!(batch = self.batch, "Catch-up repairer started");
        loop {
            let changed = self.monitor.wait_for_changes().await;
            if changed.is_empty() {
                if self.monitor.shutdown_token().is_cancelled() {
                    break;
                }
                continue;
            }

            for secondary in &changed {
                self.repair(secondary).await;
            }
        }
        tracing::info!("Catch-up repairer stopped");
    }

    /// Push what `secondary` is missing; returns the number of entries synced
    pub async fn repair(&self, secondary: &SecondaryState) -> usize {
        if secondary.health_status == HealthStatus::Unhealthy
            || secondary.last_contiguous_id == UNKNOWN_ID
        {
            return 0;
        }

        let next_id = secondary.last_contiguous_id as u64 + 1;
        let mut synced = 0;

        // Looked up among everything the master holds, gaps included
        for entry in self.store.entries_from(next_id, self.batch) {
            if !self
                .coordinator
                .sync_one(entry.id, &entry.payload, &secondary.hostname)
                .await
            {
                break;
            }
            synced += 1;
        }

        if synced > 0 {
            tracing::debug!(
                secondary = %secondary.hostname,
                from = next_id,
                synced,
                "Catch-up pass finished"
            );
        }
        synced
    }
}
