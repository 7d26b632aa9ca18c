use bytes::{Bytes, BytesMut};
use thiserror::Error;
use webrtc::rtp::packet::Packet;
use webrtc::rtp::packetizer::Payloader;
use webrtc::util::MarshalSize;

use crate::media::FormatDesc;
use crate::unit::Unit;

mod generic;
mod h264;
mod h265;
mod mpeg4_audio;
mod opus;
mod vp8;
mod vp9;

/// Largest marshalled RTP packet that still fits a 1500-byte Ethernet MTU
/// after IP and UDP headers.
pub const UDP_MAX_PACKET_SIZE: usize = 1472;

pub(crate) const RTP_HEADER_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum ProcessError {
    /// The depacketizer needs more packets before it can emit anything.
    /// Swallowed by the caller.
    #[error("more packets needed")]
    MorePacketsNeeded,

    /// A packet exceeds the maximum size and this codec cannot re-encode.
    #[error("packet is too big ({size} > {max}) and cannot be re-encoded")]
    Oversized { size: usize, max: usize },

    #[error("{0}")]
    Codec(String),
}

impl ProcessError {
    pub fn is_soft(&self) -> bool {
        matches!(self, ProcessError::MorePacketsNeeded)
    }

    pub(crate) fn codec<T: ToString>(t: T) -> Self {
        ProcessError::Codec(t.to_string())
    }
}

/// Per-codec normalization applied to every unit before fan-out.
///
/// Incoming RTP: clear the padding flag, keep track parameters up to date,
/// enforce the maximum packet size (re-encoding where the codec supports
/// it), and decode to raw samples when at least one reader consumes decoded
/// units. Incoming raw samples: update parameters, remux, and generate RTP
/// packets with the format's payloader.
pub trait Processor: Send {
    fn process(&mut self, unit: &mut Unit, has_decoded_readers: bool)
        -> Result<(), ProcessError>;
}

pub fn new_processor(
    format: &FormatDesc,
    generate_rtp_packets: bool,
    max_packet_size: usize,
) -> Result<Box<dyn Processor>, ProcessError> {
    Ok(match format {
        FormatDesc::Generic { .. } => {
            if generate_rtp_packets {
                return Err(ProcessError::codec(
                    "cannot generate RTP packets for a generic format",
                ));
            }
            Box::new(generic::GenericProcessor::new(max_packet_size))
        }
        FormatDesc::H264 { .. } => {
            Box::new(h264::H264Processor::new(format, max_packet_size))
        }
        FormatDesc::H265 { .. } => {
            Box::new(h265::H265Processor::new(format, max_packet_size))
        }
        FormatDesc::Vp8 { payload_type } => {
            Box::new(vp8::Vp8Processor::new(*payload_type, max_packet_size))
        }
        FormatDesc::Vp9 { payload_type } => {
            Box::new(vp9::Vp9Processor::new(*payload_type, max_packet_size))
        }
        FormatDesc::Mpeg4Audio { payload_type, .. } => {
            Box::new(mpeg4_audio::Mpeg4AudioProcessor::new(
                *payload_type,
                max_packet_size,
            ))
        }
        FormatDesc::Opus { payload_type, .. } => {
            Box::new(opus::OpusProcessor::new(*payload_type, max_packet_size))
        }
    })
}

/// Sources hand over packets already separated from their wire padding; the
/// flag alone survives and must not be forwarded.
pub(crate) fn clear_padding(pkt: &mut Packet) {
    pkt.header.padding = false;
}

pub(crate) fn packet_oversized(pkt: &Packet, max_packet_size: usize) -> Option<ProcessError> {
    let size = pkt.marshal_size();
    if size > max_packet_size {
        Some(ProcessError::Oversized {
            size,
            max: max_packet_size,
        })
    } else {
        None
    }
}

/// Splits an Annex-B byte stream into NAL units, tolerating both 3- and
/// 4-byte start codes and a missing leading start code.
pub(crate) fn split_annex_b(data: &[u8]) -> Vec<Bytes> {
    let mut nalus = Vec::new();
    let mut starts = Vec::new();

    let mut i = 0;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                starts.push((i, i + 3));
                i += 3;
                continue;
            }
            if i + 3 < data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                starts.push((i, i + 4));
                i += 4;
                continue;
            }
        }
        i += 1;
    }

    if starts.is_empty() {
        if !data.is_empty() {
            nalus.push(Bytes::copy_from_slice(data));
        }
        return nalus;
    }

    for (n, &(_, payload_start)) in starts.iter().enumerate() {
        let end = starts.get(n + 1).map(|&(s, _)| s).unwrap_or(data.len());
        if payload_start < end {
            nalus.push(Bytes::copy_from_slice(&data[payload_start..end]));
        }
    }
    nalus
}

pub(crate) fn join_annex_b(nalus: &[Bytes]) -> Bytes {
    let mut out = BytesMut::new();
    for nalu in nalus {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(nalu);
    }
    out.freeze()
}

/// Shared RTP generation state: stable SSRC, contiguous sequence numbers,
/// marker on the last packet of each unit.
pub(crate) struct RtpEncoder {
    payload_type: u8,
    ssrc: u32,
    sequence_number: u16,
    max_payload_size: usize,
}

impl RtpEncoder {
    pub fn new(payload_type: u8, max_packet_size: usize) -> Self {
        RtpEncoder {
            payload_type,
            ssrc: rand::random::<u32>(),
            sequence_number: rand::random::<u16>(),
            max_payload_size: max_packet_size - RTP_HEADER_SIZE,
        }
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    pub fn encode(
        &mut self,
        payloader: &mut dyn Payloader,
        data: &Bytes,
        pts: i64,
    ) -> Result<Vec<Packet>, ProcessError> {
        let payloads = payloader
            .payload(self.max_payload_size, data)
            .map_err(ProcessError::codec)?;
        Ok(self.wrap(payloads, pts))
    }

    /// Wraps pre-built payloads into packets.
    pub fn wrap(&mut self, payloads: Vec<Bytes>, pts: i64) -> Vec<Packet> {
        let count = payloads.len();
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| {
                let mut pkt = Packet {
                    payload,
                    ..Default::default()
                };
                pkt.header.version = 2;
                pkt.header.payload_type = self.payload_type;
                pkt.header.sequence_number = self.sequence_number;
                pkt.header.timestamp = pts as u32;
                pkt.header.ssrc = self.ssrc;
                pkt.header.marker = i == count - 1;
                self.sequence_number = self.sequence_number.wrapping_add(1);
                pkt
            })
            .collect()
    }
}
