//! HTTP API handlers

pub mod health;
pub mod messages;
pub mod stats;

use serde::{Deserialize, Serialize};

/// Error body returned with non-2xx responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
}

impl ErrorResponse {
    /// Create an error body
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
