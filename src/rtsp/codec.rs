//! Video codec detection for camera streams

use serde::{Deserialize, Serialize};

use super::sdp::MediaTrack;

/// H.264 MIME type (RFC 6184)
pub const MIME_TYPE_H264: &str = "video/H264";
/// H.265/HEVC MIME type (RFC 7798)
pub const MIME_TYPE_H265: &str = "video/H265";

/// Kind of an advertised RTP format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaFormat {
    H264,
    H265,
    /// Anything else, keyed by its encoding name
    Unknown(String),
}

impl MediaFormat {
    /// Classify an `rtpmap` encoding name
    pub fn from_encoding_name(name: &str) -> Self {
        let name = name.trim();
        if name.eq_ignore_ascii_case("H264") {
            MediaFormat::H264
        } else if name.eq_ignore_ascii_case("H265") || name.eq_ignore_ascii_case("HEVC") {
            MediaFormat::H265
        } else {
            MediaFormat::Unknown(name.to_string())
        }
    }
}

/// Codec detected on the camera stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DetectedCodec {
    H264,
    H265,
    #[default]
    Unsupported,
}

impl DetectedCodec {
    /// WebRTC MIME type, `None` for unsupported streams
    pub fn mime_type(&self) -> Option<&'static str> {
        match self {
            DetectedCodec::H264 => Some(MIME_TYPE_H264),
            DetectedCodec::H265 => Some(MIME_TYPE_H265),
            DetectedCodec::Unsupported => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, DetectedCodec::Unsupported)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectedCodec::H264 => "H264",
            DetectedCodec::H265 => "H265",
            DetectedCodec::Unsupported => "Unsupported",
        }
    }
}

impl From<&MediaFormat> for DetectedCodec {
    fn from(format: &MediaFormat) -> Self {
        match format {
            MediaFormat::H264 => DetectedCodec::H264,
            MediaFormat::H265 => DetectedCodec::H265,
            MediaFormat::Unknown(_) => DetectedCodec::Unsupported,
        }
    }
}

impl std::fmt::Display for DetectedCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Track and format picked from a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecSelection {
    /// Index of the media track in declaration order
    pub track_index: usize,
    /// RTP payload type of the chosen format
    pub payload_type: u8,
    pub codec: DetectedCodec,
}

/// Pick the first H264 or H265 format across all tracks.
///
/// Tracks and their formats are scanned in declaration order and the first
/// hit wins; H264 is not preferred over H265.
pub fn select_codec(tracks: &[MediaTrack]) -> Option<CodecSelection> {
    tracks.iter().enumerate().find_map(|(track_index, track)| {
        track.formats.iter().find_map(|format| {
            let codec = DetectedCodec::from(&format.format);
            codec.is_supported().then_some(CodecSelection {
                track_index,
                payload_type: format.payload_type,
                codec,
            })
        })
    })
}
