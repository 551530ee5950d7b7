use axum::{
    body::Bytes,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
};

use crate::error::ReplicationError;
use crate::replication::{InboundRequest, Outcome};
use crate::state::AppState;

/// CloudEvents type header set by the event dispatcher
pub const EVENT_TYPE_HEADER: &str = "ce-type";

fn header_value(headers: &HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Receive a registry event. Success (including skipped events) has an empty body.
pub async fn receive_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ReplicationError> {
    let request = InboundRequest {
        authorization: header_value(&headers, AUTHORIZATION),
        event_type: header_value(&headers, EVENT_TYPE_HEADER),
        body: body.to_vec(),
    };

    match state.replicator.handle(&request).await? {
        Outcome::Skipped(reason) => tracing::debug!(reason = %reason, "Event skipped"),
        Outcome::Copied { destination, .. } => {
            tracing::debug!(destination = %destination, "Event handled")
        }
    }

    Ok(StatusCode::OK)
}
