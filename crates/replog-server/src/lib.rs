//! Replog Server - HTTP façade for the replicated log
//!
//! Provides REST endpoints for:
//! - GET /messages - Visible log (contiguous prefix)
//! - POST /message - Append with a write concern (master only)
//! - GET /health - Secondary health (master) or local progress (secondary)
//! - GET /stats - Replication counters

use axum::{
    Router,
    routing::{get, post},
};
use replog_core::replication::{Master, NodeRole, Secondary};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod logging;

/// Replication node behind the HTTP façade
#[derive(Clone)]
pub enum Node {
    /// Master node
    Master(Arc<Master>),
    /// Secondary node
    Secondary(Arc<Secondary>),
}

/// Replog server state
#[derive(Clone)]
pub struct ReplogServer {
    /// Node served by this process
    pub node: Node,
}

impl ReplogServer {
    /// Serve a master node
    pub fn master(master: Arc<Master>) -> Self {
        Self {
            node: Node::Master(master),
        }
    }

    /// Serve a secondary node
    pub fn secondary(secondary: Arc<Secondary>) -> Self {
        Self {
            node: Node::Secondary(secondary),
        }
    }

    /// Role of the served node
    pub fn role(&self) -> NodeRole {
        match self.node {
            Node::Master(_) => NodeRole::Master,
            Node::Secondary(_) => NodeRole::Secondary,
        }
    }

    /// Stop the served node. Pending quorum waits on a master return failure.
    pub async fn shutdown(&self) {
        match &self.node {
            Node::Master(master) => master.shutdown().await,
            Node::Secondary(secondary) => secondary.shutdown().await,
        }
    }
}

/// Build the HTTP router for `server`
pub fn router(server: ReplogServer) -> Router {
    Router::new()
        .route("/messages", get(api::messages::list_messages))
        .route("/message", post(api::messages::append_message))
        .route("/health", get(api::health::health_check))
        .route("/stats", get(api::stats::get_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

/// Serve `server` on `listener` until `shutdown` is cancelled.
///
/// The node is stopped before axum drains in-flight requests, so an append
/// still waiting on its write concern answers instead of holding the drain.
pub async fn serve(
    listener: TcpListener,
    server: ReplogServer,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let node = server.clone();
    axum::serve(listener, router(server))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("Stopping {} before draining HTTP requests", node.role());
            node.shutdown().await;
        })
        .await
}
