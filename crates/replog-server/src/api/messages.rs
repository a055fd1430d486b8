//! Message endpoints
//!
//! - GET /messages - List the visible log
//! - POST /message - Append a message with write concern `w`

use crate::api::ErrorResponse;
use crate::{Node, ReplogServer};
use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use replog_core::{Error, LogEntry};
use serde::{Deserialize, Serialize};

/// A message as shown to readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    /// Sequence id
    pub id: u64,
    /// Message text
    pub message: String,
}

impl From<LogEntry> for MessageView {
    fn from(entry: LogEntry) -> Self {
        Self {
            id: entry.id,
            message: entry.payload,
        }
    }
}

/// Append request body
#[derive(Debug, Deserialize)]
pub struct AppendRequest {
    /// Message text
    pub message: String,
    /// Write concern, master included
    pub w: u32,
}

/// Append response body
#[derive(Debug, Serialize, Deserialize)]
pub struct AppendResponse {
    /// Id assigned to the message
    pub id: u64,
    /// Whether the write concern was met
    pub acknowledged: bool,
}

/// List the contiguous prefix of the log
pub async fn list_messages(State(server): State<ReplogServer>) -> Json<Vec<MessageView>> {
    let entries = match &server.node {
        Node::Master(master) => master.messages(),
        Node::Secondary(secondary) => secondary.messages(),
    };
    Json(entries.into_iter().map(MessageView::from).collect())
}

/// Append a message and wait for its write concern
pub async fn append_message(
    State(server): State<ReplogServer>,
    body: Result<Json<AppendRequest>, JsonRejection>,
) -> Response {
    let Node::Master(master) = &server.node else {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            Json(ErrorResponse::new("Appends are only accepted by the master")),
        )
            .into_response();
    };

    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::debug!("Rejected append body: {}", rejection);
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(rejection.body_text())),
            )
                .into_response();
        }
    };

    match master.append(request.message, request.w).await {
        Ok(outcome) => {
            let status = if outcome.acknowledged {
                StatusCode::CREATED
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (
                status,
                Json(AppendResponse {
                    id: outcome.id,
                    acknowledged: outcome.acknowledged,
                }),
            )
                .into_response()
        }
        Err(e @ Error::InvalidWriteConcern { .. }) => {
            (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(e.to_string()))).into_response()
        }
        Err(e) => {
            tracing::error!("Append failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(e.to_string())),
            )
                .into_response()
        }
    }
}
