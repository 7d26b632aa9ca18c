use bytes::{Bytes, BytesMut};
use tracing::debug;

use super::{clear_padding, packet_oversized, ProcessError, Processor, RtpEncoder};
use crate::media::FormatDesc;
use crate::unit::{Payload, Unit};

mod nal_type {
    pub const IDR_W_RADL: u8 = 19;
    pub const IDR_N_LP: u8 = 20;
    pub const CRA: u8 = 21;
    pub const VPS: u8 = 32;
    pub const SPS: u8 = 33;
    pub const PPS: u8 = 34;
    pub const AUD: u8 = 35;
    pub const AP: u8 = 48;
    pub const FU: u8 = 49;
}

const FU_START: u8 = 0x80;
const FU_END: u8 = 0x40;

fn hevc_nal_type(nalu: &[u8]) -> u8 {
    (nalu[0] >> 1) & 0x3F
}

/// H.265 counterpart of the H264 processor. Aggregation packets and
/// fragmentation units are handled directly (the two-byte NAL header makes
/// the layout different enough from H.264), including the re-encode path for
/// oversized packets.
pub(crate) struct H265Processor {
    vps: Option<Bytes>,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    fu_buffer: Option<BytesMut>,
    encoder: RtpEncoder,
    max_packet_size: usize,
}

impl H265Processor {
    pub fn new(format: &FormatDesc, max_packet_size: usize) -> Self {
        let (payload_type, vps, sps, pps) = match format {
            FormatDesc::H265 {
                payload_type,
                vps,
                sps,
                pps,
            } => (*payload_type, vps.clone(), sps.clone(), pps.clone()),
            _ => unreachable!("constructed for an H265 format"),
        };
        H265Processor {
            vps: vps.map(Bytes::from),
            sps: sps.map(Bytes::from),
            pps: pps.map(Bytes::from),
            fu_buffer: None,
            encoder: RtpEncoder::new(payload_type, max_packet_size),
            max_packet_size,
        }
    }

    fn store_param(&mut self, nalu: Bytes) {
        match hevc_nal_type(&nalu) {
            nal_type::VPS => self.vps = Some(nalu),
            nal_type::SPS => self.sps = Some(nalu),
            nal_type::PPS => self.pps = Some(nalu),
            _ => {}
        }
    }

    fn update_params_from_rtp(&mut self, payload: &Bytes) {
        if payload.len() < 2 {
            return;
        }
        match hevc_nal_type(payload) {
            nal_type::VPS | nal_type::SPS | nal_type::PPS => {
                self.store_param(payload.clone())
            }
            nal_type::AP => {
                for nalu in parse_aggregation(payload) {
                    self.store_param(nalu);
                }
            }
            _ => {}
        }
    }

    fn decode_packet(&mut self, payload: &Bytes, out: &mut Vec<Bytes>) -> bool {
        if payload.len() < 2 {
            return false;
        }
        match hevc_nal_type(payload) {
            nal_type::AP => {
                out.extend(parse_aggregation(payload));
                true
            }
            nal_type::FU => {
                if payload.len() < 3 {
                    return false;
                }
                let fu_header = payload[2];
                let fu_type = fu_header & 0x3F;
                if fu_header & FU_START != 0 {
                    let mut buf = BytesMut::with_capacity(payload.len());
                    buf.extend_from_slice(&[
                        (payload[0] & 0x81) | (fu_type << 1),
                        payload[1],
                    ]);
                    buf.extend_from_slice(&payload[3..]);
                    self.fu_buffer = Some(buf);
                    true
                } else {
                    let Some(buf) = self.fu_buffer.as_mut() else {
                        // Non-starting fragment with no previous: wait for
                        // the next sync point.
                        debug!("discarding H265 fragment without a start");
                        return false;
                    };
                    buf.extend_from_slice(&payload[3..]);
                    if fu_header & FU_END != 0 {
                        out.push(self.fu_buffer.take().unwrap().freeze());
                    }
                    true
                }
            }
            _ => {
                out.push(payload.clone());
                true
            }
        }
    }

    fn decode(&mut self, unit: &Unit) -> Option<Vec<Bytes>> {
        let mut nalus = Vec::new();
        for pkt in &unit.rtp_packets {
            let payload = pkt.payload.clone();
            if !self.decode_packet(&payload, &mut nalus) {
                return None;
            }
        }
        if nalus.is_empty() {
            None
        } else {
            Some(nalus)
        }
    }

    fn remux(&self, nalus: Vec<Bytes>) -> Vec<Bytes> {
        let mut filtered: Vec<Bytes> = nalus
            .into_iter()
            .filter(|n| {
                n.len() >= 2
                    && !matches!(
                        hevc_nal_type(n),
                        nal_type::VPS | nal_type::SPS | nal_type::PPS | nal_type::AUD
                    )
            })
            .collect();
        if filtered.is_empty() {
            return filtered;
        }
        let random_access = filtered.iter().any(|n| {
            matches!(
                hevc_nal_type(n),
                nal_type::IDR_W_RADL | nal_type::IDR_N_LP | nal_type::CRA
            )
        });
        if random_access {
            if let (Some(vps), Some(sps), Some(pps)) = (&self.vps, &self.sps, &self.pps) {
                let mut out = Vec::with_capacity(filtered.len() + 3);
                out.push(vps.clone());
                out.push(sps.clone());
                out.push(pps.clone());
                out.append(&mut filtered);
                return out;
            }
        }
        filtered
    }

    /// Single NAL units where they fit, FUs where they do not.
    fn encode(
        &mut self,
        nalus: &[Bytes],
        pts: i64,
    ) -> Result<Vec<webrtc::rtp::packet::Packet>, ProcessError> {
        let max_payload = self.encoder.max_payload_size();
        let mut payloads = Vec::new();
        for nalu in nalus {
            if nalu.len() < 2 {
                return Err(ProcessError::codec("H265 NAL unit shorter than its header"));
            }
            if nalu.len() <= max_payload {
                payloads.push(nalu.clone());
                continue;
            }
            let fragment_capacity = max_payload - 3;
            let fu_type = hevc_nal_type(nalu);
            let body = &nalu[2..];
            let mut offset = 0;
            while offset < body.len() {
                let chunk = (body.len() - offset).min(fragment_capacity);
                let mut fu_header = fu_type;
                if offset == 0 {
                    fu_header |= FU_START;
                }
                if offset + chunk >= body.len() {
                    fu_header |= FU_END;
                }
                let mut payload = BytesMut::with_capacity(3 + chunk);
                payload.extend_from_slice(&[
                    (nalu[0] & 0x81) | (nal_type::FU << 1),
                    nalu[1],
                    fu_header,
                ]);
                payload.extend_from_slice(&body[offset..offset + chunk]);
                payloads.push(payload.freeze());
                offset += chunk;
            }
        }
        Ok(self.encoder.wrap(payloads, pts))
    }
}

fn parse_aggregation(payload: &Bytes) -> Vec<Bytes> {
    let mut nalus = Vec::new();
    let mut i = 2;
    while i + 2 <= payload.len() {
        let size = u16::from_be_bytes([payload[i], payload[i + 1]]) as usize;
        i += 2;
        if size == 0 || i + size > payload.len() {
            break;
        }
        nalus.push(payload.slice(i..i + size));
        i += size;
    }
    nalus
}

impl Processor for H265Processor {
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
                let Some(nalus) = self.decode(unit) else {
                    return Err(err);
                };
                let remuxed = self.remux(nalus);
                if remuxed.is_empty() {
                    unit.rtp_packets.clear();
                    unit.payload = Payload::H265(vec![]);
                    return Ok(());
                }
                unit.rtp_packets = self.encode(&remuxed, unit.pts)?;
                if has_decoded_readers {
                    unit.payload = Payload::H265(remuxed);
                }
                return Ok(());
            }

            if has_decoded_readers {
                if let Some(nalus) = self.decode(unit) {
                    unit.payload = Payload::H265(self.remux(nalus));
                }
            }
            Ok(())
        } else {
            let Payload::H265(nalus) = std::mem::replace(&mut unit.payload, Payload::None)
            else {
                return Err(ProcessError::codec("expected an H265 payload"));
            };
            for nalu in &nalus {
                if nalu.len() >= 2 {
                    self.store_param(nalu.clone());
                }
            }
            let remuxed = self.remux(nalus);
            if remuxed.is_empty() {
                unit.payload = Payload::H265(vec![]);
                return Ok(());
            }
            unit.rtp_packets = self.encode(&remuxed, unit.pts)?;
            unit.payload = Payload::H265(remuxed);
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use chrono::Utc;
    use webrtc::rtp::packet::Packet;
    use webrtc::util::MarshalSize;

    use super::*;
    use crate::processor::UDP_MAX_PACKET_SIZE;

    fn h265_format() -> FormatDesc {
        FormatDesc::H265 {
            payload_type: 96,
            vps: Some(vec![0x40, 0x01, 0x0C]),
            sps: Some(vec![0x42, 0x01, 0x01]),
            pps: Some(vec![0x44, 0x01, 0xC0]),
        }
    }

    fn idr_nalu(len: usize) -> Vec<u8> {
        // NAL header for type 19 (IDR_W_RADL): (19 << 1) = 0x26.
        let mut nalu = vec![0x26, 0x01];
        nalu.extend(std::iter::repeat(0x5A).take(len.saturating_sub(2)));
        nalu
    }

    fn rtp_unit(payload: &[u8]) -> Unit {
        let mut pkt = Packet::default();
        pkt.header.version = 2;
        pkt.header.marker = true;
        pkt.header.payload_type = 96;
        pkt.payload = Bytes::copy_from_slice(payload);
        Unit::from_rtp(pkt, Utc::now())
    }

    #[test]
    fn test_random_access_gets_parameter_sets() {
        let mut proc = H265Processor::new(&h265_format(), UDP_MAX_PACKET_SIZE);
        let mut unit = rtp_unit(&idr_nalu(10));
        proc.process(&mut unit, true).unwrap();

        let Payload::H265(nalus) = &unit.payload else {
            panic!("expected decoded payload");
        };
        assert_eq!(nalus.len(), 4);
        assert_eq!(hevc_nal_type(&nalus[0]), nal_type::VPS);
        assert_eq!(hevc_nal_type(&nalus[1]), nal_type::SPS);
        assert_eq!(hevc_nal_type(&nalus[2]), nal_type::PPS);
        assert_eq!(hevc_nal_type(&nalus[3]), nal_type::IDR_W_RADL);
    }

    #[test]
    fn test_fragmentation_units_reassembled() {
        let mut proc = H265Processor::new(&h265_format(), UDP_MAX_PACKET_SIZE);
        let nalu = idr_nalu(100);

        // Build two FUs by hand: start with bytes [2..60], end with the rest.
        let fu = |start: bool, end: bool, body: &[u8]| {
            let mut header = nal_type::IDR_W_RADL;
            if start {
                header |= FU_START;
            }
            if end {
                header |= FU_END;
            }
            let mut p = vec![(nalu[0] & 0x81) | (nal_type::FU << 1), nalu[1], header];
            p.extend_from_slice(body);
            p
        };

        let mut first = rtp_unit(&fu(true, false, &nalu[2..60]));
        proc.process(&mut first, true).unwrap();
        assert!(first.payload.is_none());

        let mut second = rtp_unit(&fu(false, true, &nalu[60..]));
        proc.process(&mut second, true).unwrap();
        let Payload::H265(nalus) = &second.payload else {
            panic!("expected decoded payload");
        };
        assert_eq!(nalus.last().unwrap().as_ref(), nalu.as_slice());
    }

    #[test]
    fn test_oversized_packet_re_encoded_into_fragments() {
        let mut proc = H265Processor::new(&h265_format(), UDP_MAX_PACKET_SIZE);
        let mut unit = rtp_unit(&idr_nalu(3000));
        proc.process(&mut unit, false).unwrap();

        assert!(unit.rtp_packets.len() > 1);
        for pkt in &unit.rtp_packets {
            assert!(pkt.marshal_size() <= UDP_MAX_PACKET_SIZE);
        }
        assert!(unit.rtp_packets.last().unwrap().header.marker);

        // The fragments must reassemble to the original NAL unit, with the
        // parameter sets aggregated in front.
        let mut check = H265Processor::new(&h265_format(), UDP_MAX_PACKET_SIZE);
        let mut nalus = Vec::new();
        for pkt in &unit.rtp_packets {
            check.decode_packet(&pkt.payload, &mut nalus);
        }
        assert_eq!(hevc_nal_type(nalus.last().unwrap()), nal_type::IDR_W_RADL);
        assert_eq!(nalus.last().unwrap().len(), 3000);
    }

    #[test]
    fn test_aggregation_packet_parsed() {
        let mut proc = H265Processor::new(&h265_format(), UDP_MAX_PACKET_SIZE);
        let aud = [0x46, 0x01, 0x10];
        let small = idr_nalu(8);
        let mut ap = vec![(nal_type::AP) << 1, 0x01];
        ap.extend_from_slice(&(aud.len() as u16).to_be_bytes());
        ap.extend_from_slice(&aud);
        ap.extend_from_slice(&(small.len() as u16).to_be_bytes());
        ap.extend_from_slice(&small);

        let mut unit = rtp_unit(&ap);
        proc.process(&mut unit, true).unwrap();
        let Payload::H265(nalus) = &unit.payload else {
            panic!("expected decoded payload");
        };
        // Delimiter dropped, parameters prepended, IDR kept.
        assert_eq!(nalus.len(), 4);
        assert_eq!(hevc_nal_type(nalus.last().unwrap()), nal_type::IDR_W_RADL);
    }
}
