use axum::{body::Bytes, extract::State, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::relay::RelayStatus;
use crate::state::AppState;
use crate::webrtc::{SdpAnswer, SdpOffer};

// ============================================================================
// Health
// ============================================================================

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Signaling
// ============================================================================

#[derive(Serialize)]
pub struct SuccessResponse {
    pub status: &'static str,
}

/// Create an SDP offer for the camera's video track
pub async fn create_offer(State(state): State<Arc<AppState>>) -> Result<Json<SdpOffer>> {
    let sdp = state.relay.peer().create_offer().await?;
    info!("Sending offer to browser ({} bytes)", sdp.len());
    Ok(Json(SdpOffer::new(sdp)))
}

/// Apply the browser's SDP answer. Malformed JSON is a 400 with the
/// usual error body.
pub async fn set_answer(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<SuccessResponse>> {
    let answer: SdpAnswer = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid answer body: {}", e)))?;

    if !answer.is_answer() {
        return Err(AppError::BadRequest(format!(
            "expected type 'answer', got '{}'",
            answer.sdp_type
        )));
    }

    debug!("Received answer ({} bytes)", answer.sdp.len());
    state.relay.peer().set_answer(answer.sdp).await?;

    Ok(Json(SuccessResponse { status: "success" }))
}

/// Relay status plus the ICE servers handed to the peer
#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub relay: RelayStatus,
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<String>,
}

/// Codec, connection state and packet counters
pub async fn relay_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let webrtc = &state.config.webrtc;
    Json(StatusResponse {
        relay: state.relay.status().await,
        stun_servers: webrtc.stun_servers.clone(),
        turn_servers: webrtc
            .turn_servers
            .iter()
            .flat_map(|turn| turn.urls.iter().cloned())
            .collect(),
    })
}
