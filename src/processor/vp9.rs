use bytes::BytesMut;
use tracing::debug;
use webrtc::rtp::codecs::vp9::{Vp9Packet, Vp9Payloader};
use webrtc::rtp::packetizer::Depacketizer;

use super::{clear_padding, packet_oversized, ProcessError, Processor, RtpEncoder};
use crate::unit::{Payload, Unit};

pub(crate) struct Vp9Processor {
    decoder: Vp9Packet,
    payloader: Vp9Payloader,
    encoder: RtpEncoder,
    max_packet_size: usize,
    frame: BytesMut,
}

impl Vp9Processor {
    pub fn new(payload_type: u8, max_packet_size: usize) -> Self {
        Vp9Processor {
            decoder: Vp9Packet::default(),
            payloader: Vp9Payloader::default(),
            encoder: RtpEncoder::new(payload_type, max_packet_size),
            max_packet_size,
            frame: BytesMut::new(),
        }
    }
}

impl Processor for Vp9Processor {
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
                            debug!("cannot depacketize VP9 payload: {}", err);
                            self.frame.clear();
                            return Ok(());
                        }
                    }
                }
                if unit.rtp_packets.last().is_some_and(|p| p.header.marker)
                    && !self.frame.is_empty()
                {
                    unit.payload = Payload::Vp9(self.frame.split().freeze());
                }
            }
            Ok(())
        } else {
            let Payload::Vp9(frame) = std::mem::replace(&mut unit.payload, Payload::None)
            else {
                return Err(ProcessError::codec("expected a VP9 payload"));
            };
            unit.rtp_packets = self
                .encoder
                .encode(&mut self.payloader, &frame, unit.pts)?;
            unit.payload = Payload::Vp9(frame);
            Ok(())
        }
    }
}
