//! DESCRIBE response parsing

use sdp_types as sdp;

use super::codec::MediaFormat;

/// One RTP format advertised on a media line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpFormat {
    pub payload_type: u8,
    pub format: MediaFormat,
    pub clock_rate: Option<u32>,
}

/// One `m=` section of the camera's session description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    /// Media kind (`video`, `audio`, `application`, ...)
    pub kind: String,
    /// Formats in declaration order
    pub formats: Vec<RtpFormat>,
    /// Value of the media-level `a=control` attribute
    pub control: Option<String>,
}

/// Parsed session description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// Value of the session-level `a=control` attribute
    pub control: Option<String>,
    pub tracks: Vec<MediaTrack>,
}

impl SessionDescription {
    pub fn parse(body: &[u8]) -> Result<Self, String> {
        let session =
            sdp::Session::parse(body).map_err(|e| format!("invalid session description: {:?}", e))?;

        let control = attribute_value(&session.attributes, "control");
        let tracks = session.medias.iter().map(parse_media).collect();

        Ok(Self { control, tracks })
    }
}

fn parse_media(media: &sdp::Media) -> MediaTrack {
    let formats = media
        .fmt
        .split_whitespace()
        .filter_map(|pt| pt.parse::<u8>().ok())
        .map(|payload_type| {
            let (format, clock_rate) = match find_rtpmap(&media.attributes, payload_type) {
                Some((name, rate)) => (MediaFormat::from_encoding_name(&name), rate),
                None => (
                    MediaFormat::Unknown(
                        static_payload_name(payload_type)
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("PT{}", payload_type)),
                    ),
                    None,
                ),
            };
            RtpFormat {
                payload_type,
                format,
                clock_rate,
            }
        })
        .collect();

    MediaTrack {
        kind: media.media.clone(),
        formats,
        control: attribute_value(&media.attributes, "control"),
    }
}

fn attribute_value(attributes: &[sdp::Attribute], name: &str) -> Option<String> {
    attributes
        .iter()
        .find(|attr| attr.attribute.eq_ignore_ascii_case(name))
        .and_then(|attr| attr.value.as_deref())
        .map(|value| value.trim().to_string())
}

/// `a=rtpmap:<pt> <name>/<rate>[/<channels>]`
fn find_rtpmap(attributes: &[sdp::Attribute], payload_type: u8) -> Option<(String, Option<u32>)> {
    attributes
        .iter()
        .filter(|attr| attr.attribute.eq_ignore_ascii_case("rtpmap"))
        .filter_map(|attr| attr.value.as_deref())
        .find_map(|value| {
            let (pt, encoding) = value.trim().split_once(char::is_whitespace)?;
            if pt.parse::<u8>().ok()? != payload_type {
                return None;
            }
            let mut parts = encoding.trim().split('/');
            let name = parts.next()?.to_string();
            let rate = parts.next().and_then(|r| r.parse::<u32>().ok());
            Some((name, rate))
        })
}

/// Names of the static payload types cameras still use (RFC 3551)
fn static_payload_name(payload_type: u8) -> Option<&'static str> {
    match payload_type {
        0 => Some("PCMU"),
        8 => Some("PCMA"),
        14 => Some("MPA"),
        26 => Some("JPEG"),
        32 => Some("MPV"),
        33 => Some("MP2T"),
        _ => None,
    }
}

/// Resolve a track's `a=control` value against the session base URL.
///
/// Absolute controls are used as-is, `*` means the base itself, and relative
/// controls are appended with a separating slash. Plain concatenation keeps
/// query strings such as `?channel=1&subtype=0` intact, which is what most
/// IP cameras expect.
pub fn resolve_control_url(base: &str, control: Option<&str>) -> String {
    match control.map(str::trim) {
        None | Some("") | Some("*") => base.to_string(),
        Some(c)
            if c
                .get(..7)
                .is_some_and(|scheme| scheme.eq_ignore_ascii_case("rtsp://")) =>
        {
            c.to_string()
        }
        Some(c) if base.ends_with('/') => format!("{}{}", base, c),
        Some(c) => format!("{}/{}", base, c),
    }
}
