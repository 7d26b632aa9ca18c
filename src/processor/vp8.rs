use bytes::{Bytes, BytesMut};
use tracing::debug;
use webrtc::rtp::codecs::vp8::{Vp8Packet, Vp8Payloader};
use webrtc::rtp::packetizer::Depacketizer;

use super::{clear_padding, packet_oversized, ProcessError, Processor, RtpEncoder};
use crate::unit::{Payload, Unit};

pub(crate) struct Vp8Processor {
    decoder: Vp8Packet,
    payloader: Vp8Payloader,
    encoder: RtpEncoder,
    max_packet_size: usize,
    frame: BytesMut,
}

impl Vp8Processor {
    pub fn new(payload_type: u8, max_packet_size: usize) -> Self {
        Vp8Processor {
            decoder: Vp8Packet::default(),
            payloader: Vp8Payloader::default(),
            encoder: RtpEncoder::new(payload_type, max_packet_size),
            max_packet_size,
            frame: BytesMut::new(),
        }
    }
}

impl Processor for Vp8Processor {
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
                for pkt in &unit.rtp_packets {
                    match self.decoder.depacketize(&pkt.payload) {
                        Ok(data) => self.frame.extend_from_slice(&data),
                        Err(err) => {
                            debug!("cannot depacketize VP8 payload: {}", err);
                            self.frame.clear();
                            return Ok(());
                        }
                    }
                }
                // A frame completes with the marker bit.
                if unit.rtp_packets.last().is_some_and(|p| p.header.marker)
                    && !self.frame.is_empty()
                {
                    unit.payload = Payload::Vp8(self.frame.split().freeze());
                }
            }
            Ok(())
        } else {
            let Payload::Vp8(frame) = std::mem::replace(&mut unit.payload, Payload::None)
            else {
                return Err(ProcessError::codec("expected a VP8 payload"));
            };
            unit.rtp_packets = self
                .encoder
                .encode(&mut self.payloader, &frame, unit.pts)?;
            unit.payload = Payload::Vp8(frame);
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

    #[test]
    fn test_raw_frame_round_trip() {
        let mut proc = Vp8Processor::new(96, UDP_MAX_PACKET_SIZE);
        let frame = Bytes::from(vec![0x10u8; 4000]);
        let mut unit = Unit::from_payload(Payload::Vp8(frame.clone()), Utc::now(), 0);
        proc.process(&mut unit, true).unwrap();

        assert!(unit.rtp_packets.len() > 1);
        for pkt in &unit.rtp_packets {
            assert!(pkt.marshal_size() <= UDP_MAX_PACKET_SIZE);
        }

        let mut check = Vp8Processor::new(96, UDP_MAX_PACKET_SIZE);
        let mut reassembled = BytesMut::new();
        for pkt in &unit.rtp_packets {
            reassembled.extend_from_slice(&check.decoder.depacketize(&pkt.payload).unwrap());
        }
        assert_eq!(reassembled.freeze(), frame);
    }

    #[test]
    fn test_oversized_is_hard_error() {
        let mut proc = Vp8Processor::new(96, UDP_MAX_PACKET_SIZE);
        let mut pkt = Packet::default();
        pkt.payload = Bytes::from(vec![0u8; UDP_MAX_PACKET_SIZE]);
        let mut unit = Unit::from_rtp(pkt, Utc::now());
        assert!(matches!(
            proc.process(&mut unit, false),
            Err(ProcessError::Oversized { .. })
        ));
    }
}
