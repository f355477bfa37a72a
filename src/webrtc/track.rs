//! Outbound video track fed with camera RTP packets

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters};
use webrtc::rtp_transceiver::RTCPFeedback;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};

use crate::error::PeerError;
use crate::rtsp::{DetectedCodec, RtpPacket};

/// Video clock rate for H.264 and H.265
pub const VIDEO_CLOCK_RATE: u32 = 90000;
/// Payload type browsers use for H.265 Main profile
pub const H265_PAYLOAD_TYPE: u8 = 49;
/// Payload type for H.265 Main 10
pub const H265_MAIN10_PAYLOAD_TYPE: u8 = 51;

const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";
const H265_FMTP: &str = "level-id=180;profile-id=1;tier-flag=0;tx-mode=SRST";
const H265_MAIN10_FMTP: &str = "level-id=180;profile-id=2;tier-flag=0;tx-mode=SRST";

const TRACK_ID: &str = "video";
const STREAM_ID: &str = "camera-viewer";

fn video_rtcp_feedback() -> Vec<RTCPFeedback> {
    vec![
        RTCPFeedback {
            typ: "goog-remb".to_owned(),
            parameter: "".to_owned(),
        },
        RTCPFeedback {
            typ: "ccm".to_owned(),
            parameter: "fir".to_owned(),
        },
        RTCPFeedback {
            typ: "nack".to_owned(),
            parameter: "".to_owned(),
        },
        RTCPFeedback {
            typ: "nack".to_owned(),
            parameter: "pli".to_owned(),
        },
    ]
}

/// RTP codec capability for a detected codec, `None` when unsupported
pub fn video_codec_capability(codec: DetectedCodec) -> Option<RTCRtpCodecCapability> {
    let (mime_type, fmtp) = match codec {
        DetectedCodec::H264 => (codec.mime_type()?, H264_FMTP),
        DetectedCodec::H265 => (codec.mime_type()?, H265_FMTP),
        DetectedCodec::Unsupported => return None,
    };

    Some(RTCRtpCodecCapability {
        mime_type: mime_type.to_string(),
        clock_rate: VIDEO_CLOCK_RATE,
        channels: 0,
        sdp_fmtp_line: fmtp.to_string(),
        rtcp_feedback: vec![],
    })
}

/// H.265 codec parameters to register with the media engine. The default
/// codec set of webrtc-rs does not include H.265.
pub fn h265_codec_parameters() -> Vec<RTCRtpCodecParameters> {
    [
        (H265_FMTP, H265_PAYLOAD_TYPE),
        (H265_MAIN10_FMTP, H265_MAIN10_PAYLOAD_TYPE),
    ]
    .into_iter()
    .map(|(fmtp, payload_type)| RTCRtpCodecParameters {
        capability: RTCRtpCodecCapability {
            mime_type: DetectedCodec::H265
                .mime_type()
                .unwrap_or_default()
                .to_owned(),
            clock_rate: VIDEO_CLOCK_RATE,
            channels: 0,
            sdp_fmtp_line: fmtp.to_owned(),
            rtcp_feedback: video_rtcp_feedback(),
        },
        payload_type,
        ..Default::default()
    })
    .collect()
}

/// Single outbound video track
pub struct VideoTrack {
    codec: DetectedCodec,
    track: Arc<TrackLocalStaticRTP>,
    packets_written: AtomicU64,
}

impl VideoTrack {
    pub fn new(codec: DetectedCodec) -> Result<Self, PeerError> {
        let capability = video_codec_capability(codec).ok_or_else(|| {
            PeerError::TrackCreate(format!("no WebRTC mapping for codec {}", codec))
        })?;

        let track = Arc::new(TrackLocalStaticRTP::new(
            capability,
            TRACK_ID.to_string(),
            STREAM_ID.to_string(),
        ));

        Ok(Self {
            codec,
            track,
            packets_written: AtomicU64::new(0),
        })
    }

    pub fn codec(&self) -> DetectedCodec {
        self.codec
    }

    /// Get the track for adding to a peer connection
    pub fn as_track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }

    /// Forward one packet. SSRC and payload type are rewritten by the
    /// track binding; the payload is untouched.
    pub async fn write_packet(&self, packet: &RtpPacket) -> Result<(), PeerError> {
        self.track
            .write_rtp(packet.packet())
            .await
            .map_err(|e| PeerError::Write(e.to_string()))?;
        self.packets_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtsp::packet::build_test_packet;

    #[test]
    fn capability_follows_codec() {
        let h264 = video_codec_capability(DetectedCodec::H264).expect("h264");
        assert_eq!(h264.mime_type, "video/H264");
        assert_eq!(h264.clock_rate, 90000);

        let h265 = video_codec_capability(DetectedCodec::H265).expect("h265");
        assert_eq!(h265.mime_type, "video/H265");
        assert!(h265.sdp_fmtp_line.contains("profile-id=1"));

        assert!(video_codec_capability(DetectedCodec::Unsupported).is_none());
    }

    #[test]
    fn unsupported_codec_cannot_make_a_track() {
        assert!(matches!(
            VideoTrack::new(DetectedCodec::Unsupported),
            Err(PeerError::TrackCreate(_))
        ));
    }

    #[test]
    fn h265_parameters_use_browser_payload_types() {
        let params = h265_codec_parameters();
        assert_eq!(
            params.iter().map(|p| p.payload_type).collect::<Vec<_>>(),
            vec![49, 51]
        );
        assert!(params.iter().all(|p| p.capability.mime_type == "video/H265"));
    }

    #[tokio::test]
    async fn unbound_track_accepts_writes() {
        let track = VideoTrack::new(DetectedCodec::H264).expect("track");
        let packet = RtpPacket::parse(build_test_packet(96, 1, &[0x65])).expect("packet");
        track.write_packet(&packet).await.expect("write");
        assert_eq!(track.packets_written(), 1);
        assert_eq!(track.codec(), DetectedCodec::H264);
    }
}
