//! WebRTC side of the relay
//!
//! A single peer connection to the browser carrying one outbound video
//! track. Camera RTP packets are written to the track as they arrive:
//!
//! ```text
//! RtspSession --RtpPacket--> WebRtcPeer (TrackLocalStaticRTP) --> Browser
//!                                 ^
//!                                 |  offer / answer
//!                            HTTP signaling
//! ```

pub mod config;
pub mod peer;
pub mod signaling;
pub mod track;

pub use config::WebRtcConfig;
pub use peer::WebRtcPeer;
pub use signaling::{ConnectionState, IceCandidate, SdpAnswer, SdpOffer};
pub use track::VideoTrack;
