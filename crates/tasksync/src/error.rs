//! Error types for the task cache and its GraphQL collaborator.

use thiserror::Error;

use crate::transport::GraphqlError;

/// Errors that can occur when talking to the task service.
///
/// Reconciliation itself never fails; these surface only from network
/// round trips and configuration.
#[derive(Debug, Error)]
pub enum TaskSyncError {
    /// HTTP request failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("request failed ({status}): {body}")]
    Status { status: u16, body: String },

    /// Rate limited.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error on a subscription.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The operation returned GraphQL errors and no usable data.
    #[error("GraphQL error: {}", join_messages(.0))]
    Graphql(Vec<GraphqlError>),

    /// A response was missing the field the operation selects.
    #[error("response missing field: {0}")]
    MissingField(&'static str),

    /// Invalid client configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TaskSyncError {
    /// Whether the error means the service could not be reached or did not
    /// answer properly, as opposed to answering with errors.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            TaskSyncError::Http(_)
                | TaskSyncError::Status { .. }
                | TaskSyncError::RateLimited { .. }
                | TaskSyncError::WebSocket(_)
        )
    }
}

fn join_messages(errors: &[GraphqlError]) -> String {
    if errors.is_empty() {
        return "no error details".to_string();
    }
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
