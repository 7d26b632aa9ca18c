use bytes::{Bytes, BytesMut};
use tracing::debug;

use super::{clear_padding, packet_oversized, ProcessError, Processor, RtpEncoder};
use crate::unit::{Payload, Unit};

/// RFC 3640 AU-header layout used here: 16-bit headers, 13-bit AU-size,
/// 3-bit AU-index / AU-index-delta (always zero).
const AU_HEADER_BITS: usize = 16;
const MAX_AU_SIZE: usize = (1 << 13) - 1;

pub(crate) struct Mpeg4AudioProcessor {
    encoder: RtpEncoder,
    max_packet_size: usize,
    /// Expected total size and collected bytes of an access unit fragmented
    /// across packets.
    fragment: Option<(usize, BytesMut)>,
}

impl Mpeg4AudioProcessor {
    pub fn new(payload_type: u8, max_packet_size: usize) -> Self {
        Mpeg4AudioProcessor {
            encoder: RtpEncoder::new(payload_type, max_packet_size),
            max_packet_size,
            fragment: None,
        }
    }

    fn decode_packet(
        &mut self,
        payload: &Bytes,
        out: &mut Vec<Bytes>,
    ) -> Result<(), ProcessError> {
        if payload.len() < 2 {
            return Err(ProcessError::codec("MPEG-4 audio payload too short"));
        }
        let header_bits = u16::from_be_bytes([payload[0], payload[1]]) as usize;
        if header_bits == 0 || header_bits % AU_HEADER_BITS != 0 {
            return Err(ProcessError::codec("invalid AU-headers-length"));
        }
        let au_count = header_bits / AU_HEADER_BITS;
        let headers_end = 2 + header_bits / 8;
        if payload.len() < headers_end {
            return Err(ProcessError::codec("truncated AU-header section"));
        }

        let mut sizes = Vec::with_capacity(au_count);
        for i in 0..au_count {
            let h0 = payload[2 + i * 2];
            let h1 = payload[2 + i * 2 + 1];
            sizes.push(((h0 as usize) << 5) | ((h1 as usize) >> 3));
        }

        let data = &payload[headers_end..];

        // A single AU-header whose size exceeds the carried data marks a
        // fragment (RFC 3640 §4.2.3); collect until complete.
        if au_count == 1 && sizes[0] > data.len() {
            match &mut self.fragment {
                Some((expected, buf)) if *expected == sizes[0] => {
                    buf.extend_from_slice(data);
                    if buf.len() >= *expected {
                        let (_, buf) = self.fragment.take().unwrap();
                        out.push(buf.freeze());
                    }
                }
                Some(_) | None => {
                    // Either a new fragmented AU or a continuation we never
                    // saw the start of; restart collection from here.
                    if self.fragment.take().is_some() {
                        debug!("discarding incomplete MPEG-4 audio fragment");
                    }
                    let mut buf = BytesMut::with_capacity(sizes[0]);
                    buf.extend_from_slice(data);
                    self.fragment = Some((sizes[0], buf));
                }
            }
            return Ok(());
        }

        let mut offset = 0;
        for size in sizes {
            if offset + size > data.len() {
                return Err(ProcessError::codec("AU extends beyond payload"));
            }
            out.push(Bytes::copy_from_slice(&data[offset..offset + size]));
            offset += size;
        }
        Ok(())
    }

    fn encode(
        &mut self,
        aus: &[Bytes],
        pts: i64,
    ) -> Result<Vec<webrtc::rtp::packet::Packet>, ProcessError> {
        let max_payload = self.encoder.max_payload_size();
        let mut payloads = Vec::new();
        let mut batch: Vec<&Bytes> = Vec::new();
        let mut batch_size = 0;

        let flush = |batch: &mut Vec<&Bytes>, payloads: &mut Vec<Bytes>| {
            if batch.is_empty() {
                return;
            }
            let mut payload = BytesMut::new();
            payload.extend_from_slice(
                &((batch.len() * AU_HEADER_BITS) as u16).to_be_bytes(),
            );
            for au in batch.iter() {
                payload.extend_from_slice(&(((au.len() as u16) << 3).to_be_bytes()));
            }
            for au in batch.iter() {
                payload.extend_from_slice(au);
            }
            payloads.push(payload.freeze());
            batch.clear();
        };

        for au in aus {
            if au.len() > MAX_AU_SIZE {
                return Err(ProcessError::Oversized {
                    size: au.len(),
                    max: MAX_AU_SIZE,
                });
            }
            if 4 + au.len() > max_payload {
                // Fragmented AU: every fragment repeats a single AU-header
                // with the size of the whole unit.
                flush(&mut batch, &mut payloads);
                batch_size = 0;
                let chunk_capacity = max_payload - 4;
                for chunk in au.chunks(chunk_capacity) {
                    let mut payload = BytesMut::with_capacity(4 + chunk.len());
                    payload.extend_from_slice(&(AU_HEADER_BITS as u16).to_be_bytes());
                    payload.extend_from_slice(&((au.len() as u16) << 3).to_be_bytes());
                    payload.extend_from_slice(chunk);
                    payloads.push(payload.freeze());
                }
                continue;
            }
            let projected = 2 + (batch.len() + 1) * 2 + batch_size + au.len();
            if projected > max_payload {
                flush(&mut batch, &mut payloads);
                batch_size = 0;
            }
            batch.push(au);
            batch_size += au.len();
        }
        flush(&mut batch, &mut payloads);

        Ok(self.encoder.wrap(payloads, pts))
    }
}

impl Processor for Mpeg4AudioProcessor {
    fn process(
        &mut self,
        unit: &mut Unit,
        has_decoded_readers: bool,
    ) -> Result<(), ProcessError> {
        if !unit.rtp_packets.is_empty() {
            clear_padding(&mut unit.rtp_packets[0]);
            if let Some(err) = packet_oversized(&unit.rtp_packets[0], self.max_packet_size) {
                return Err(err);
            }
            if has_decoded_readers {
                let mut aus = Vec::new();
                for pkt in &unit.rtp_packets.clone() {
                    self.decode_packet(&pkt.payload, &mut aus)?;
                }
                if !aus.is_empty() {
                    unit.payload = Payload::Mpeg4Audio(aus);
                }
            }
            Ok(())
        } else {
            let Payload::Mpeg4Audio(aus) =
                std::mem::replace(&mut unit.payload, Payload::None)
            else {
                return Err(ProcessError::codec("expected an MPEG-4 audio payload"));
            };
            if aus.is_empty() {
                unit.payload = Payload::Mpeg4Audio(aus);
                return Ok(());
            }
            unit.rtp_packets = self.encode(&aus, unit.pts)?;
            unit.payload = Payload::Mpeg4Audio(aus);
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use chrono::Utc;
    use webrtc::util::MarshalSize;

    use super::*;
    use crate::processor::UDP_MAX_PACKET_SIZE;

    fn round_trip(aus: Vec<Bytes>) -> Vec<Bytes> {
        let mut enc = Mpeg4AudioProcessor::new(97, UDP_MAX_PACKET_SIZE);
        let mut unit =
            Unit::from_payload(Payload::Mpeg4Audio(aus), Utc::now(), 1024);
        enc.process(&mut unit, false).unwrap();
        for pkt in &unit.rtp_packets {
            assert!(pkt.marshal_size() <= UDP_MAX_PACKET_SIZE);
        }

        let mut dec = Mpeg4AudioProcessor::new(97, UDP_MAX_PACKET_SIZE);
        let mut out = Vec::new();
        for pkt in &unit.rtp_packets {
            dec.decode_packet(&pkt.payload, &mut out).unwrap();
        }
        out
    }

    #[test]
    fn test_small_access_units_aggregate() {
        let aus = vec![
            Bytes::from_static(&[1, 2, 3]),
            Bytes::from_static(&[4, 5]),
            Bytes::from_static(&[6]),
        ];
        assert_eq!(round_trip(aus.clone()), aus);
    }

    #[test]
    fn test_large_access_unit_fragments() {
        let aus = vec![Bytes::from(vec![0x77u8; 4000])];
        assert_eq!(round_trip(aus.clone()), aus);
    }

    #[test]
    fn test_malformed_header_is_an_error() {
        let mut dec = Mpeg4AudioProcessor::new(97, UDP_MAX_PACKET_SIZE);
        let mut out = Vec::new();
        assert!(dec
            .decode_packet(&Bytes::from_static(&[0x00]), &mut out)
            .is_err());
        assert!(dec
            .decode_packet(&Bytes::from_static(&[0x00, 0x0F, 0xAA]), &mut out)
            .is_err());
    }
}
