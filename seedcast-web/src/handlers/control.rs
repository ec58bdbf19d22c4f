//! Distribution endpoints used by the origin and its peers

use axum::extract::State;
use bytes::Bytes;

use crate::error::ApiError;
use crate::server::AppState;

/// Liveness check.
pub async fn status() -> &'static str {
    "hello"
}

/// Serves the encoded descriptor, building it and starting seeding on the first call.
///
/// # Errors
///
/// Fails when the descriptor cannot be built; the next request retries.
pub async fn send(State(state): State<AppState>) -> Result<Bytes, ApiError> {
    let published = state.session.request_descriptor().await?;
    Ok(published.encoded.clone())
}

/// Records one peer completion report.
pub async fn recv(State(state): State<AppState>, body: Bytes) -> &'static str {
    state.session.record_peer_received(body.len());
    "OK"
}

/// Records one send acknowledgement.
pub async fn complete_send(State(state): State<AppState>, body: String) -> &'static str {
    state.session.record_send_ack(&body);
    "ok"
}

/// Number of send acknowledgements so far, as decimal text.
pub async fn send_times(State(state): State<AppState>) -> String {
    state.session.send_times().to_string()
}
