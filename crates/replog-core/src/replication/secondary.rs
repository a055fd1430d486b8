//! Secondary node
//!
//! Holds a local store filled by the master through the RPC server. Reads
//! only ever see the contiguous prefix.

use crate::replication::server::{RpcServer, RpcServerStats};
use crate::store::{LogEntry, MessageStore};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Secondary node for replication
pub struct Secondary {
    store: Arc<MessageStore>,
    server: Arc<RpcServer>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Secondary {
    /// Create a secondary with an empty store
    pub fn new() -> Self {
        Self::with_apply_delay(Duration::ZERO)
    }

    /// Create a secondary that waits `delay` before applying each entry
    pub fn with_apply_delay(delay: Duration) -> Self {
        let store = Arc::new(MessageStore::new());
        let server = Arc::new(RpcServer::new(store.clone()).with_apply_delay(delay));
        Self {
            store,
            server,
            task: Mutex::new(None),
        }
    }

    /// Bind the RPC listener and serve in the background; returns the bound address
    pub async fn start(&self, addr: SocketAddr) -> Result<SocketAddr> {
        if self.task.lock().is_some() {
            return Err(Error::internal("Secondary already running"));
        }

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let server = self.server.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = server.serve_listener(listener).await {
                tracing::error!("RPC server failed: {}", e);
            }
        });
        *self.task.lock() = Some(handle);

        tracing::info!("Secondary serving RPC on {}", local_addr);
        Ok(local_addr)
    }

    /// Stop the RPC server and wait for the accept loop to exit
    pub async fn shutdown(&self) {
        self.server.stop();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("RPC server task ended abnormally: {}", e);
            }
        }
        tracing::info!("Secondary stopped");
    }

    /// Visible log, contiguous prefix only
    pub fn messages(&self) -> Vec<LogEntry> {
        self.store.visible_snapshot()
    }

    /// Highest contiguous id held
    pub fn last_contiguous_id(&self) -> u64 {
        self.store.contiguous_prefix()
    }

    /// Local store
    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    /// RPC server handle
    pub fn server(&self) -> &Arc<RpcServer> {
        &self.server
    }

    /// RPC server statistics
    pub fn stats(&self) -> RpcServerStats {
        self.server.stats()
    }
}

impl Default for Secondary {
    fn default() -> Self {
        Self::new()
    }
}
