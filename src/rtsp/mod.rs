//! RTSP client for IP cameras
//!
//! Pulls one H.264 or H.265 video track from a camera using RTP
//! interleaved over the RTSP TCP connection:
//!
//! ```text
//! Camera --DESCRIBE/SETUP/PLAY--> RtspSession --RtpPacket--> packet handler
//! ```

pub mod auth;
pub mod codec;
pub mod connection;
pub mod packet;
pub mod sdp;
pub mod session;

#[cfg(test)]
pub(crate) mod mock_camera;

pub use codec::{select_codec, CodecSelection, DetectedCodec, MediaFormat};
pub use packet::RtpPacket;
pub use session::{PacketHandler, RtspSession, SessionDescriptor};
