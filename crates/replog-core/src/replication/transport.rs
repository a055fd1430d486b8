//! Client side of the RPC surface
//!
//! The coordinator and the health monitor talk to secondaries only through
//! [`Transport`], so tests can swap the TCP implementation for an in-memory
//! one.

use crate::replication::protocol::{RpcMessage, ServingStatus};
use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

/// RPC calls the master issues against a secondary
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Apply `(id, text)` on `target`; returns the remote result code
    async fn append_entry(
        &self,
        target: &str,
        id: u64,
        text: &str,
        deadline: Duration,
    ) -> Result<i32>;

    /// Ask `target` for its highest contiguous id
    async fn last_contiguous_id(&self, target: &str, deadline: Duration) -> Result<u64>;

    /// Health-check `target` for `service_name`
    async fn heartbeat(
        &self,
        target: &str,
        service_name: &str,
        deadline: Duration,
    ) -> Result<ServingStatus>;
}

/// Transport over plain TCP, one connection per call
#[derive(Debug, Clone, Default)]
pub struct TcpTransport;

impl TcpTransport {
    /// Create a TCP transport
    pub fn new() -> Self {
        Self
    }

    /// Connect, send one request and read one response, all within `deadline`
    async fn call(
        &self,
        target: &str,
        request: RpcMessage,
        deadline: Duration,
    ) -> Result<RpcMessage> {
        let exchange = async {
            let mut stream = TcpStream::connect(target).await?;
            stream.set_nodelay(true)?;
            request.write_to(&mut stream).await?;
            RpcMessage::read_from(&mut stream).await
        };

        let response = tokio::time::timeout(deadline, exchange)
            .await
            .map_err(|_| Error::timeout(format!("{} after {:?}", target, deadline)))??;

        match response {
            RpcMessage::Error { code, message } => Err(Error::remote(code, message)),
            other => Ok(other),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn append_entry(
        &self,
        target: &str,
        id: u64,
        text: &str,
        deadline: Duration,
    ) -> Result<i32> {
        let request = RpcMessage::AppendEntry {
            id,
            text: text.to_string(),
        };
        match self.call(target, request, deadline).await? {
            RpcMessage::AppendResult { result } => Ok(result),
            other => Err(unexpected(target, &other)),
        }
    }

    async fn last_contiguous_id(&self, target: &str, deadline: Duration) -> Result<u64> {
        match self
            .call(target, RpcMessage::GetLastContiguousId, deadline)
            .await?
        {
            RpcMessage::LastContiguousId { id } => Ok(id),
            other => Err(unexpected(target, &other)),
        }
    }

    async fn heartbeat(
        &self,
        target: &str,
        service_name: &str,
        deadline: Duration,
    ) -> Result<ServingStatus> {
        let request = RpcMessage::Heartbeat {
            service_name: service_name.to_string(),
        };
        match self.call(target, request, deadline).await? {
            RpcMessage::HeartbeatStatus { status } => Ok(status),
            other => Err(unexpected(target, &other)),
        }
    }
}

fn unexpected(target: &str, message: &RpcMessage) -> Error {
    Error::protocol(format!(
        "Unexpected {:?} response from {}",
        message.message_type(),
        target
    ))
}
