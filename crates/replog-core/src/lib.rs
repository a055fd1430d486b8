//! Replog Core - replicated append-only log
//!
//! This crate provides the replication engine behind `replog-server`:
//! - Gap-free message store exposing only the contiguous prefix
//! - Quorum replication with per-secondary retries
//! - Heartbeat health monitoring with SUSPECTED hysteresis
//! - Catch-up of lagging secondaries
//! - Framed TCP RPC between master and secondaries
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 Master                       │
//! │   (id allocation, local append, append API) │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │   Coordinator / HealthMonitor / CatchUp      │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │        Transport (TCP RPC frames)            │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │     Secondary RpcServer + MessageStore       │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod replication;
pub mod retry;
pub mod store;

pub use error::{Error, Result};
pub use replication::{AppendOutcome, HealthStatus, Master, Secondary, SecondaryState};
pub use retry::RetryPolicy;
pub use store::{LogEntry, MessageStore};
