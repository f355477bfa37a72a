use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors raised while talking to the camera
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RtspError {
    #[error("Invalid RTSP URL: {0}")]
    InvalidUrl(String),

    #[error("RTSP transport error: {0}")]
    Transport(String),

    #[error("No H264 or H265 video format found in stream - check camera codec settings")]
    NoSupportedCodec,

    #[error("RTSP setup failed: {0}")]
    Setup(String),

    #[error("RTSP play failed: {0}")]
    Play(String),

    #[error("RTSP session already connected")]
    AlreadyConnected,
}

/// Errors raised by the browser-facing peer connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("Failed to create peer connection: {0}")]
    PeerInit(String),

    #[error("Video track already exists")]
    TrackAlreadyExists,

    #[error("Failed to create video track: {0}")]
    TrackCreate(String),

    #[error("Failed to add video track to peer connection: {0}")]
    TrackAttach(String),

    #[error("Failed to create offer: {0}")]
    Offer(String),

    #[error("Failed to set answer: {0}")]
    Answer(String),

    #[error("Video track not created")]
    NoTrack,

    #[error("Failed to write packet to video track: {0}")]
    Write(String),
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Rtsp(#[from] RtspError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Relay not ready: {0}")]
    Relay(String),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            status: "error",
            message: self.to_string(),
        };

        tracing::error!(
            status = status.as_u16(),
            error_message = %body.message,
            "Request failed"
        );

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
