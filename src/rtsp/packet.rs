//! RTP packet carried from the camera to the browser

use bytes::Bytes;
use rtp::packet::Packet;
use webrtc::util::Unmarshal;

/// One RTP packet as received from the camera.
///
/// The wire bytes are kept alongside the parsed header so the packet can be
/// forwarded without re-encoding. Nothing here is ever modified.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    packet: Packet,
    raw: Bytes,
}

impl RtpPacket {
    /// Parse a packet from its wire form. Returns `None` for anything that
    /// is not a well-formed RTP version 2 packet.
    pub fn parse(raw: Bytes) -> Option<Self> {
        let mut buf = raw.clone();
        let packet = Packet::unmarshal(&mut buf).ok()?;
        if packet.header.version != 2 {
            return None;
        }
        Some(Self { packet, raw })
    }

    pub fn sequence_number(&self) -> u16 {
        self.packet.header.sequence_number
    }

    pub fn timestamp(&self) -> u32 {
        self.packet.header.timestamp
    }

    pub fn payload_type(&self) -> u8 {
        self.packet.header.payload_type
    }

    pub fn ssrc(&self) -> u32 {
        self.packet.header.ssrc
    }

    pub fn marker(&self) -> bool {
        self.packet.header.marker
    }

    pub fn payload(&self) -> &Bytes {
        &self.packet.payload
    }

    /// Original wire bytes
    pub fn as_bytes(&self) -> &Bytes {
        &self.raw
    }

    /// Parsed packet, as consumed by webrtc-rs track writers
    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn build_test_packet(payload_type: u8, sequence_number: u16, payload: &[u8]) -> Bytes {
    use webrtc::util::Marshal;

    let packet = Packet {
        header: rtp::header::Header {
            version: 2,
            marker: true,
            payload_type,
            sequence_number,
            timestamp: u32::from(sequence_number) * 3000,
            ssrc: 0x1234_5678,
            ..Default::default()
        },
        payload: Bytes::copy_from_slice(payload),
    };
    packet.marshal().expect("failed to marshal test packet")
}
