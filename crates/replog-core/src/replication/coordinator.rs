//! Quorum replication of a single entry
//!
//! Each target gets its own attempt task. Attempts post their outcome on a
//! channel; the coordinator waits on that channel with a bounded poll
//! interval, retries failed targets after the retry policy's delay and
//! returns once `write_concern` targets have acknowledged. Attempts still
//! in flight at that point are aborted and drained for a bounded time.

use crate::replication::config::ReplicationConfig;
use crate::replication::health::{HealthMonitor, HealthStatus};
use crate::replication::protocol::APPEND_OK;
use crate::replication::transport::Transport;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Coordinator statistics
#[derive(Debug, Clone, Default)]
pub struct CoordinatorStats {
    /// Entries that reached their write concern
    pub entries_replicated: u64,
    /// Entries abandoned before reaching their write concern
    pub quorum_failures: u64,
    /// Append attempts dispatched, retries included
    pub attempts: u64,
    /// Attempts that were retries
    pub retries: u64,
    /// Catch-up syncs that succeeded
    pub syncs: u64,
    /// Catch-up syncs that failed
    pub sync_failures: u64,
}

/// Outcome of one attempt against one target
#[derive(Debug)]
struct AttemptOutcome {
    target: usize,
    attempt: u32,
    acknowledged: bool,
    /// False when the failure will not clear by retrying soon
    transient: bool,
}

/// Per-target progress within one `replicate` call
enum Slot {
    InFlight { attempt: u32, handle: JoinHandle<()> },
    Failed { attempt: u32, retry_at: Instant },
    Acknowledged,
}

/// Drives quorum appends and single-target syncs
pub struct ReplicationCoordinator {
    config: ReplicationConfig,
    transport: Arc<dyn Transport>,
    /// Cancelled when the surrounding node shuts down
    liveness: CancellationToken,
    /// Optional health view used to pace retries to unhealthy targets
    health: Option<Arc<HealthMonitor>>,
    stats: Mutex<CoordinatorStats>,
}

impl ReplicationCoordinator {
    /// Create a coordinator; `liveness` ends in-progress waits when cancelled
    pub fn new(
        config: ReplicationConfig,
        transport: Arc<dyn Transport>,
        liveness: CancellationToken,
    ) -> Self {
        Self {
            config,
            transport,
            liveness,
            health: None,
            stats: Mutex::new(CoordinatorStats::default()),
        }
    }

    /// Consult `monitor` when scheduling retries
    pub fn with_health_monitor(mut self, monitor: Arc<HealthMonitor>) -> Self {
        self.health = Some(monitor);
        self
    }

    /// Get statistics
    pub fn stats(&self) -> CoordinatorStats {
        self.stats.lock().clone()
    }

    /// Replicate `(id, payload)` until `write_concern` targets acknowledge.
    ///
    /// Returns `false` when `write_concern` exceeds the number of targets or
    /// the coordinator's liveness token is cancelled first. A concern of 0
    /// succeeds without contacting anyone.
    pub async fn replicate(
        &self,
        id: u64,
        payload: &str,
        targets: &[String],
        write_concern: usize,
    ) -> bool {
        if write_concern == 0 {
            return true;
        }
        if write_concern > targets.len() {
            tracing::warn!(
                id,
                write_concern,
                targets = targets.len(),
                "Write concern exceeds number of secondaries"
            );
            self.stats.lock().quorum_failures += 1;
            return false;
        }

        let payload: Arc<str> = Arc::from(payload);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slots: Vec<Slot> = targets
            .iter()
            .enumerate()
            .map(|(index, target)| Slot::InFlight {
                attempt: 1,
                handle: self.dispatch(index, target, id, payload.clone(), 1, tx.clone()),
            })
            .collect();
        self.stats.lock().attempts += targets.len() as u64;

        let mut acknowledged = 0;
        while acknowledged < write_concern && !self.liveness.is_cancelled() {
            let wake_at = slots
                .iter()
                .filter_map(|slot| match slot {
                    Slot::Failed { retry_at, .. } => Some(*retry_at),
                    _ => None,
                })
                .fold(
                    Instant::now() + self.config.quorum_poll_interval,
                    Instant::min,
                );

            tokio::select! {
                outcome = rx.recv() => {
                    if let Some(outcome) = outcome {
                        if self.record(&mut slots, targets, outcome) {
                            acknowledged += 1;
                        }
                    }
                }
                _ = tokio::time::sleep_until(wake_at) => {}
                _ = self.liveness.cancelled() => {}
            }

            if acknowledged < write_concern && !self.liveness.is_cancelled() {
                self.retry_due(&mut slots, targets, id, &payload, &tx);
            }
        }

        self.cancel_outstanding(slots).await;

        let reached = acknowledged >= write_concern;
        let mut stats = self.stats.lock();
        if reached {
            stats.entries_replicated += 1;
            tracing::debug!(id, acknowledged, write_concern, "Write concern reached");
        } else {
            stats.quorum_failures += 1;
            tracing::warn!(
                id,
                acknowledged,
                write_concern,
                "Replication abandoned before write concern was reached"
            );
        }
        reached
    }

    /// Push a single entry to one target, once, with the sync deadline
    pub async fn sync_one(&self, id: u64, payload: &str, target: &str) -> bool {
        let synced = match self
            .transport
            .append_entry(target, id, payload, self.config.sync_deadline)
            .await
        {
            Ok(APPEND_OK) => true,
            Ok(code) => {
                tracing::warn!(secondary = %target, id, code, "Sync rejected");
                false
            }
            Err(e) => {
                tracing::warn!(secondary = %target, id, "Sync failed: {}", e);
                false
            }
        };

        let mut stats = self.stats.lock();
        if synced {
            stats.syncs += 1;
            tracing::info!(secondary = %target, id, "Synced entry to secondary");
        } else {
            stats.sync_failures += 1;
        }
        synced
    }

    fn dispatch(
        &self,
        index: usize,
        target: &str,
        id: u64,
        payload: Arc<str>,
        attempt: u32,
        tx: mpsc::UnboundedSender<AttemptOutcome>,
    ) -> JoinHandle<()> {
        let transport = self.transport.clone();
        let target = target.to_string();
        let deadline = self.config.attempt_deadline;

        tokio::spawn(async move {
            let (acknowledged, transient) =
                match transport.append_entry(&target, id, &payload, deadline).await {
                    Ok(APPEND_OK) => (true, true),
                    Ok(code) => {
                        tracing::debug!(secondary = %target, id, attempt, code, "Append rejected");
                        (false, true)
                    }
                    Err(e) if e.is_transient() => {
                        tracing::debug!(secondary = %target, id, attempt, "Append failed: {}", e);
                        (false, true)
                    }
                    Err(e) => {
                        tracing::warn!(secondary = %target, id, attempt, "Append failed: {}", e);
                        (false, false)
                    }
                };
            // Receiver is gone once replicate() has returned
            let _ = tx.send(AttemptOutcome {
                target: index,
                attempt,
                acknowledged,
                transient,
            });
        })
    }

    /// Fold one outcome into its slot; true on a new acknowledgement
    fn record(&self, slots: &mut [Slot], targets: &[String], outcome: AttemptOutcome) -> bool {
        let Some(slot) = slots.get_mut(outcome.target) else {
            return false;
        };
        let attempt = match slot {
            Slot::InFlight { attempt, .. } if *attempt == outcome.attempt => *attempt,
            _ => return false,
        };

        if outcome.acknowledged {
            *slot = Slot::Acknowledged;
            return true;
        }

        let target = &targets[outcome.target];
        let delay = self.retry_delay(target, attempt, outcome.transient);
        tracing::debug!(secondary = %target, attempt, ?delay, "Scheduling retry");
        *slot = Slot::Failed {
            attempt,
            retry_at: Instant::now() + delay,
        };
        false
    }

    /// Backoff for transient failures; the poll interval for unhealthy
    /// targets and for errors such as a corrupt frame
    fn retry_delay(&self, target: &str, attempt: u32, transient: bool) -> Duration {
        if !transient {
            return self.config.quorum_poll_interval;
        }
        let unhealthy = self
            .health
            .as_ref()
            .and_then(|monitor| monitor.status_of(target))
            == Some(HealthStatus::Unhealthy);

        if unhealthy {
            self.config.quorum_poll_interval
        } else {
            self.config.retry.delay(attempt)
        }
    }

    fn retry_due(
        &self,
        slots: &mut [Slot],
        targets: &[String],
        id: u64,
        payload: &Arc<str>,
        tx: &mpsc::UnboundedSender<AttemptOutcome>,
    ) {
        let now = Instant::now();
        let mut retried = 0;

        for (index, slot) in slots.iter_mut().enumerate() {
            if let Slot::Failed { attempt, retry_at } = *slot {
                if retry_at <= now {
                    let attempt = attempt + 1;
                    let handle =
                        self.dispatch(index, &targets[index], id, payload.clone(), attempt, tx.clone());
                    *slot = Slot::InFlight { attempt, handle };
                    retried += 1;
                }
            }
        }

        if retried > 0 {
            let mut stats = self.stats.lock();
            stats.attempts += retried;
            stats.retries += retried;
        }
    }

    /// Abort attempts still in flight and wait a bounded time for them to end
    async fn cancel_outstanding(&self, slots: Vec<Slot>) {
        let handles: Vec<JoinHandle<()>> = slots
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::InFlight { handle, .. } => {
                    handle.abort();
                    Some(handle)
                }
                _ => None,
            })
            .collect();

        if handles.is_empty() {
            return;
        }
        let count = handles.len();
        if tokio::time::timeout(
            self.config.drain_timeout,
            futures::future::join_all(handles),
        )
        .await
        .is_err()
        {
            tracing::warn!(count, "Cancelled attempts did not finish in time");
        }
    }
}
