//! RPC listener on the secondary side
//!
//! Serves `AppendEntry`, `GetLastContiguousId` and `Heartbeat` against the
//! node's message store. A connection may carry any number of
//! request/response pairs.

use crate::replication::protocol::{APPEND_OK, RpcMessage, ServingStatus};
use crate::store::MessageStore;
use crate::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Error code for a request the server does not handle
pub const ERROR_UNSUPPORTED: u32 = 1;

/// Error code while the server is not serving
pub const ERROR_NOT_SERVING: u32 = 2;

/// Error code for an append whose id is not a valid sequence id
pub const ERROR_INVALID_ID: u32 = 3;

/// RPC server statistics
#[derive(Debug, Clone, Default)]
pub struct RpcServerStats {
    /// Append requests received
    pub appends_received: u64,
    /// Appends that inserted a new entry
    pub appends_applied: u64,
    /// Heartbeat and id probes answered
    pub probes_answered: u64,
}

/// RPC server backed by a message store
pub struct RpcServer {
    store: Arc<MessageStore>,
    /// Artificial delay before each append is applied
    apply_delay: Duration,
    serving: AtomicBool,
    appends_received: AtomicU64,
    appends_applied: AtomicU64,
    probes_answered: AtomicU64,
    shutdown: CancellationToken,
}

impl RpcServer {
    /// Create a server over `store`
    pub fn new(store: Arc<MessageStore>) -> Self {
        Self {
            store,
            apply_delay: Duration::ZERO,
            serving: AtomicBool::new(true),
            appends_received: AtomicU64::new(0),
            appends_applied: AtomicU64::new(0),
            probes_answered: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Delay every append by `delay` before applying it
    pub fn with_apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = delay;
        self
    }

    /// Toggle whether appends and heartbeats are answered as serving
    pub fn set_serving(&self, serving: bool) {
        self.serving.store(serving, Ordering::SeqCst);
    }

    /// Get statistics
    pub fn stats(&self) -> RpcServerStats {
        RpcServerStats {
            appends_received: self.appends_received.load(Ordering::Relaxed),
            appends_applied: self.appends_applied.load(Ordering::Relaxed),
            probes_answered: self.probes_answered.load(Ordering::Relaxed),
        }
    }

    /// Serve on a bound listener until [`RpcServer::stop`] is called
    pub async fn serve_listener(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        tracing::info!("RPC server listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let server = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream).await {
                                    tracing::debug!(%peer, "RPC connection closed: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    tracing::info!("RPC server shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Stop accepting connections and close open ones
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        loop {
            let request = tokio::select! {
                request = RpcMessage::read_from(&mut stream) => request,
                _ = self.shutdown.cancelled() => return Ok(()),
            };

            let response = match request {
                Ok(request) => self.handle_request(request).await,
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(());
                }
                Err(e) => {
                    // Answer once, then drop the connection since framing is lost
                    let reply = RpcMessage::Error {
                        code: ERROR_UNSUPPORTED,
                        message: e.to_string(),
                    };
                    reply.write_to(&mut stream).await?;
                    return Err(e);
                }
            };
            response.write_to(&mut stream).await?;
        }
    }

    /// Produce the response for one request
    pub async fn handle_request(&self, request: RpcMessage) -> RpcMessage {
        match request {
            RpcMessage::AppendEntry { id, text } => {
                self.appends_received.fetch_add(1, Ordering::Relaxed);
                if !self.serving.load(Ordering::SeqCst) {
                    return not_serving();
                }
                if id == 0 {
                    return RpcMessage::Error {
                        code: ERROR_INVALID_ID,
                        message: "Sequence ids start at 1".into(),
                    };
                }
                if !self.apply_delay.is_zero() {
                    tokio::time::sleep(self.apply_delay).await;
                }

                let inserted = self.store.append(id, text);
                if inserted {
                    self.appends_applied.fetch_add(1, Ordering::Relaxed);
                }
                tracing::debug!(
                    id,
                    inserted,
                    contiguous = self.store.contiguous_prefix(),
                    "Applied replicated entry"
                );
                RpcMessage::AppendResult { result: APPEND_OK }
            }
            RpcMessage::GetLastContiguousId => {
                self.probes_answered.fetch_add(1, Ordering::Relaxed);
                RpcMessage::LastContiguousId {
                    id: self.store.contiguous_prefix(),
                }
            }
            RpcMessage::Heartbeat { service_name } => {
                self.probes_answered.fetch_add(1, Ordering::Relaxed);
                let status = if self.serving.load(Ordering::SeqCst) {
                    ServingStatus::Serving
                } else {
                    ServingStatus::NotServing
                };
                tracing::trace!(%service_name, ?status, "Heartbeat");
                RpcMessage::HeartbeatStatus { status }
            }
            other => RpcMessage::Error {
                code: ERROR_UNSUPPORTED,
                message: format!("Unsupported request {:?}", other.message_type()),
            },
        }
    }
}

fn not_serving() -> RpcMessage {
    RpcMessage::Error {
        code: ERROR_NOT_SERVING,
        message: "Service not serving".into(),
    }
}
