//! Health endpoint
//!
//! On a master, reports the last known state of every secondary. On a
//! secondary, reports its own progress. Never blocks on the network.

use crate::{Node, ReplogServer};
use axum::{
    extract::State,
    response::{IntoResponse, Json, Response},
};
use replog_core::{HealthStatus, SecondaryState};
use serde::Serialize;

/// Health of one secondary as seen by the master
#[derive(Debug, Serialize)]
pub struct SecondaryHealth {
    /// Secondary RPC address
    pub host: String,
    /// HEALTHY, SUSPECTED or UNHEALTHY
    pub status: HealthStatus,
    /// Consecutive failed heartbeats (-1 once unhealthy)
    pub inactive_count: i64,
    /// Last reported contiguous id (-1 if never seen)
    pub last_contiguous_id: i64,
}

impl From<SecondaryState> for SecondaryHealth {
    fn from(state: SecondaryState) -> Self {
        Self {
            host: state.hostname,
            status: state.health_status,
            inactive_count: state.inactive_count,
            last_contiguous_id: state.last_contiguous_id,
        }
    }
}

/// Master health response
#[derive(Debug, Serialize)]
pub struct MasterHealthResponse {
    /// Master's contiguous id
    pub master_last_id: u64,
    /// Per-secondary state
    pub secondaries: Vec<SecondaryHealth>,
    /// Timestamp of the check
    pub timestamp: String,
}

/// Secondary health response
#[derive(Debug, Serialize)]
pub struct SecondaryHealthResponse {
    /// Always "secondary"
    pub role: String,
    /// Highest contiguous id held
    pub last_contiguous_id: u64,
    /// Timestamp of the check
    pub timestamp: String,
}

/// Get health status
pub async fn health_check(State(server): State<ReplogServer>) -> Response {
    let timestamp = chrono::Utc::now().to_rfc3339();

    match &server.node {
        Node::Master(master) => Json(MasterHealthResponse {
            master_last_id: master.monitor().master_last_id(),
            secondaries: master.health().into_iter().map(Into::into).collect(),
            timestamp,
        })
        .into_response(),
        Node::Secondary(secondary) => Json(SecondaryHealthResponse {
            role: server.role().to_string(),
            last_contiguous_id: secondary.last_contiguous_id(),
            timestamp,
        })
        .into_response(),
    }
}
