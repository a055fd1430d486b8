//! Master/secondary replication
//!
//! The master assigns ids, appends locally and pushes each entry to its
//! secondaries until the caller's write concern is met. A heartbeat loop
//! tracks every secondary and drives catch-up of the ones that fall behind.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   AppendEntry      ┌─────────────────┐
//! │        Master        │ ─────────────────► │   Secondary 1   │
//! │                      │ ◄───────────────── │   (RpcServer)   │
//! │  Coordinator         │   LastContiguousId └─────────────────┘
//! │  HealthMonitor       │   AppendEntry      ┌─────────────────┐
//! │  CatchUpRepairer     │ ─────────────────► │   Secondary 2   │
//! │                      │ ◄───────────────── │   (RpcServer)   │
//! └──────────────────────┘   LastContiguousId └─────────────────┘
//! ```
//!
//! # Write Concern
//!
//! The local append is the first acknowledgement. A write concern of `w`
//! waits for `w - 1` secondaries; failed attempts are retried until the
//! concern is met or the node shuts down.
//!
//! # Wire Protocol
//!
//! All messages use bincode serialization with CRC32 validation:
//!
//! ```text
//! [message_type:1][length:4][payload:N][crc32:4]
//! ```

pub mod catchup;
pub mod config;
pub mod coordinator;
pub mod health;
pub mod master;
pub mod protocol;
pub mod secondary;
pub mod server;
pub mod transport;

pub use catchup::CatchUpRepairer;
pub use config::{HeartbeatMode, MonitorConfig, NodeRole, ReplicationConfig};
pub use coordinator::{CoordinatorStats, ReplicationCoordinator};
pub use health::{HealthMonitor, HealthStatus, SecondaryState};
pub use master::{AppendOutcome, Master};
pub use protocol::{RpcMessage, RpcMessageType, ServingStatus};
pub use secondary::Secondary;
pub use server::{RpcServer, RpcServerStats};
pub use transport::{TcpTransport, Transport};

/// Default heartbeat interval in seconds
pub const DEFAULT_HEARTBEAT_SECS: u64 = 5;

/// Failures tolerated while SUSPECTED before a secondary is UNHEALTHY
pub const SUSPECT_THRESHOLD: i64 = 5;

/// Service name sent by health-check heartbeats
pub const DEFAULT_SERVICE_NAME: &str = "replog";

/// Default secondary RPC port
pub const DEFAULT_RPC_PORT: u16 = 50051;
