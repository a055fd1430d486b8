//! Replication statistics endpoint

use crate::{Node, ReplogServer};
use axum::{
    extract::State,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

/// Master statistics response
#[derive(Debug, Serialize)]
pub struct MasterStatsResponse {
    /// Entries that reached their write concern
    pub entries_replicated: u64,
    /// Entries abandoned before reaching their write concern
    pub quorum_failures: u64,
    /// Append attempts dispatched
    pub attempts: u64,
    /// Attempts that were retries
    pub retries: u64,
    /// Catch-up syncs that succeeded
    pub syncs: u64,
    /// Catch-up syncs that failed
    pub sync_failures: u64,
    /// Entries stored locally
    pub log_size: usize,
}

/// Secondary statistics response
#[derive(Debug, Serialize)]
pub struct SecondaryStatsResponse {
    /// Append requests received
    pub appends_received: u64,
    /// Appends that inserted a new entry
    pub appends_applied: u64,
    /// Heartbeats and id probes answered
    pub probes_answered: u64,
    /// Entries stored, including those behind a gap
    pub log_size: usize,
}

/// Get replication statistics for this node
pub async fn get_stats(State(server): State<ReplogServer>) -> Response {
    match &server.node {
        Node::Master(master) => {
            let stats = master.stats();
            Json(MasterStatsResponse {
                entries_replicated: stats.entries_replicated,
                quorum_failures: stats.quorum_failures,
                attempts: stats.attempts,
                retries: stats.retries,
                syncs: stats.syncs,
                sync_failures: stats.sync_failures,
                log_size: master.store().len(),
            })
            .into_response()
        }
        Node::Secondary(secondary) => {
            let stats = secondary.stats();
            Json(SecondaryStatsResponse {
                appends_received: stats.appends_received,
                appends_applied: stats.appends_applied,
                probes_answered: stats.probes_answered,
                log_size: secondary.store().len(),
            })
            .into_response()
        }
    }
}
