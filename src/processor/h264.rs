use bytes::Bytes;
use tracing::debug;
use webrtc::rtp::codecs::h264::{H264Packet, H264Payloader};
use webrtc::rtp::packetizer::Depacketizer;

use super::{
    clear_padding, join_annex_b, packet_oversized, split_annex_b, ProcessError, Processor,
    RtpEncoder,
};
use crate::media::FormatDesc;
use crate::unit::{Payload, Unit};

mod nal_type {
    pub const SLICE_IDR: u8 = 5;
    pub const SPS: u8 = 7;
    pub const PPS: u8 = 8;
    pub const AUD: u8 = 9;
    pub const STAP_A: u8 = 24;
}

pub(crate) struct H264Processor {
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    decoder: H264Packet,
    payloader: H264Payloader,
    encoder: RtpEncoder,
    max_packet_size: usize,
}

impl H264Processor {
    pub fn new(format: &FormatDesc, max_packet_size: usize) -> Self {
        let (payload_type, sps, pps) = match format {
            FormatDesc::H264 {
                payload_type,
                sps,
                pps,
            } => (*payload_type, sps.clone(), pps.clone()),
            _ => unreachable!("constructed for an H264 format"),
        };
        H264Processor {
            sps: sps.map(Bytes::from),
            pps: pps.map(Bytes::from),
            decoder: H264Packet::default(),
            payloader: H264Payloader::default(),
            encoder: RtpEncoder::new(payload_type, max_packet_size),
            max_packet_size,
        }
    }

    /// Track parameters are refreshed from in-band SPS/PPS, whether they
    /// arrive as single NAL units or inside a STAP-A aggregate.
    fn update_params_from_rtp(&mut self, payload: &Bytes) {
        let Some(&first) = payload.first() else {
            return;
        };
        match first & 0x1F {
            nal_type::SPS => self.sps = Some(payload.clone()),
            nal_type::PPS => self.pps = Some(payload.clone()),
            nal_type::STAP_A => {
                let mut i = 1;
                while i + 2 <= payload.len() {
                    let size =
                        u16::from_be_bytes([payload[i], payload[i + 1]]) as usize;
                    i += 2;
                    if size == 0 || i + size > payload.len() {
                        break;
                    }
                    let nalu = payload.slice(i..i + size);
                    match nalu[0] & 0x1F {
                        nal_type::SPS => self.sps = Some(nalu),
                        nal_type::PPS => self.pps = Some(nalu),
                        _ => {}
                    }
                    i += size;
                }
            }
            _ => {}
        }
    }

    fn update_params_from_nalus(&mut self, nalus: &[Bytes]) {
        for nalu in nalus {
            match nalu.first().map(|b| b & 0x1F) {
                Some(nal_type::SPS) => self.sps = Some(nalu.clone()),
                Some(nal_type::PPS) => self.pps = Some(nalu.clone()),
                _ => {}
            }
        }
    }

    /// Drops SPS, PPS and access-unit delimiters; when the remaining
    /// sequence carries an IDR, the current parameters are prepended exactly
    /// once so every sync point is self-describing.
    fn remux(&self, nalus: Vec<Bytes>) -> Vec<Bytes> {
        let mut filtered: Vec<Bytes> = nalus
            .into_iter()
            .filter(|n| {
                !n.is_empty()
                    && !matches!(
                        n[0] & 0x1F,
                        nal_type::SPS | nal_type::PPS | nal_type::AUD
                    )
            })
            .collect();
        if filtered.is_empty() {
            return filtered;
        }
        let has_idr = filtered
            .iter()
            .any(|n| n[0] & 0x1F == nal_type::SLICE_IDR);
        if has_idr {
            if let (Some(sps), Some(pps)) = (&self.sps, &self.pps) {
                let mut out = Vec::with_capacity(filtered.len() + 2);
                out.push(sps.clone());
                out.push(pps.clone());
                out.append(&mut filtered);
                return out;
            }
        }
        filtered
    }

    fn decode(&mut self, unit: &Unit) -> Option<Vec<Bytes>> {
        let mut nalus = Vec::new();
        for pkt in &unit.rtp_packets {
            match self.decoder.depacketize(&pkt.payload) {
                Ok(data) if !data.is_empty() => nalus.extend(split_annex_b(&data)),
                Ok(_) => {}
                Err(err) => {
                    debug!("cannot depacketize H264 payload: {}", err);
                    return None;
                }
            }
        }
        if nalus.is_empty() {
            None
        } else {
            Some(nalus)
        }
    }

    fn encode(&mut self, nalus: &[Bytes], pts: i64) -> Result<Vec<webrtc::rtp::packet::Packet>, ProcessError> {
        self.encoder
            .encode(&mut self.payloader, &join_annex_b(nalus), pts)
    }
}

impl Processor for H264Processor {
    fn process(
        &mut self,
        unit: &mut Unit,
        has_decoded_readers: bool,
    ) -> Result<(), ProcessError> {
        if !unit.rtp_packets.is_empty() {
            clear_padding(&mut unit.rtp_packets[0]);
            let payload = unit.rtp_packets[0].payload.clone();
            self.update_params_from_rtp(&payload);

            if let Some(err) = packet_oversized(&unit.rtp_packets[0], self.max_packet_size) {
                // The only codec path allowed to fix an oversized packet:
                // decode the unit and regenerate conforming packets.
                let Some(nalus) = self.decode(unit) else {
                    return Err(err);
                };
                let remuxed = self.remux(nalus);
                if remuxed.is_empty() {
                    unit.rtp_packets.clear();
                    unit.payload = Payload::H264(vec![]);
                    return Ok(());
                }
                unit.rtp_packets = self.encode(&remuxed, unit.pts)?;
                if has_decoded_readers {
                    unit.payload = Payload::H264(remuxed);
                }
                return Ok(());
            }

            if has_decoded_readers {
                if let Some(nalus) = self.decode(unit) {
                    unit.payload = Payload::H264(self.remux(nalus));
                }
            }
            Ok(())
        } else {
            let Payload::H264(nalus) = std::mem::replace(&mut unit.payload, Payload::None)
            else {
                return Err(ProcessError::codec("expected an H264 payload"));
            };
            self.update_params_from_nalus(&nalus);
            let remuxed = self.remux(nalus);
            if remuxed.is_empty() {
                unit.payload = Payload::H264(vec![]);
                return Ok(());
            }
            unit.rtp_packets = self.encode(&remuxed, unit.pts)?;
            unit.payload = Payload::H264(remuxed);
            Ok(())
        }
    }
}
