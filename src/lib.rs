//! camera-viewer - relay an RTSP IP camera to a browser over WebRTC
//!
//! The camera's H.264 or H.265 RTP packets are forwarded unchanged onto a
//! WebRTC video track. Signaling is a plain HTTP offer/answer exchange.

pub mod config;
pub mod error;
pub mod relay;
pub mod rtsp;
pub mod state;
pub mod utils;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
