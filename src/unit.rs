use bytes::Bytes;
use chrono::{DateTime, Utc};
use webrtc::rtp::packet::Packet;

/// The envelope routed through a stream: every packet a source writes is
/// wrapped into one of these, processed by the format's processor, and
/// fanned out to readers.
///
/// `rtp_packets` is non-empty when the unit entered through an RTP-speaking
/// source; `payload` is filled when the unit entered as raw samples, or on
/// demand when at least one reader consumes decoded units. Payloads carry no
/// RTP padding: sources hand over packets as parsed from the wire (padding
/// already separated), and the processor clears the leftover header flag so
/// repacketized output never advertises it.
#[derive(Debug, Clone)]
pub struct Unit {
    pub rtp_packets: Vec<Packet>,
    pub ntp: DateTime<Utc>,
    /// Presentation timestamp in clock-rate units of the owning format.
    pub pts: i64,
    pub payload: Payload,
}

#[derive(Debug, Clone)]
pub enum Payload {
    None,
    /// H.264 NAL units, without start codes or length prefixes.
    H264(Vec<Bytes>),
    /// H.265 NAL units.
    H265(Vec<Bytes>),
    /// A full VP8 frame.
    Vp8(Bytes),
    /// A full VP9 frame.
    Vp9(Bytes),
    /// MPEG-4 audio access units.
    Mpeg4Audio(Vec<Bytes>),
    /// Opus packets.
    Opus(Vec<Bytes>),
}

impl Payload {
    pub fn is_none(&self) -> bool {
        matches!(self, Payload::None)
    }
}

impl Unit {
    /// Wraps a single RTP packet coming off the wire. The presentation
    /// timestamp is the raw RTP timestamp; readers that need wall-clock
    /// alignment use `ntp`.
    pub fn from_rtp(packet: Packet, ntp: DateTime<Utc>) -> Self {
        let pts = i64::from(packet.header.timestamp);
        Unit {
            rtp_packets: vec![packet],
            ntp,
            pts,
            payload: Payload::None,
        }
    }

    /// Wraps raw samples produced by a source that already demuxed its input
    /// (no RTP involved); the processor generates the packets.
    pub fn from_payload(payload: Payload, ntp: DateTime<Utc>, pts: i64) -> Self {
        Unit {
            rtp_packets: Vec::new(),
            ntp,
            pts,
            payload,
        }
    }
}
