use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::federation::FederationError;
use crate::webhook::AuthError;

/// Failure of a single webhook invocation.
///
/// Nothing is retried. A repository created before a later stage failed
/// stays created; the invocation is still reported as failed.
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    #[error("malformed event: {0}")]
    Decode(String),

    #[error("failed to provision repository {repository}: {source:#}")]
    Provision {
        repository: String,
        source: anyhow::Error,
    },

    #[error("credential federation failed: {0}")]
    Federation(#[from] FederationError),

    #[error("failed to copy {from} to {to}: {source:#}")]
    Copy {
        from: String,
        to: String,
        source: anyhow::Error,
    },
}

impl ReplicationError {
    pub fn status(&self) -> StatusCode {
        match self {
            ReplicationError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ReplicationError::Decode(_) => StatusCode::BAD_REQUEST,
            ReplicationError::Provision { .. }
            | ReplicationError::Federation(_)
            | ReplicationError::Copy { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<serde_json::Error> for ReplicationError {
    fn from(err: serde_json::Error) -> Self {
        ReplicationError::Decode(err.to_string())
    }
}

impl IntoResponse for ReplicationError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Log server errors (5xx) with structured fields to prevent log injection
        if status.is_server_error() {
            tracing::error!(
                status = status.as_u16(),
                error = ?self,
                "Replication failed"
            );
        } else {
            tracing::warn!(status = status.as_u16(), error = %self, "Rejected webhook");
        }

        let body = Json(json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
