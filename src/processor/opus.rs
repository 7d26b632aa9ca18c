use super::{clear_padding, packet_oversized, ProcessError, Processor, RtpEncoder};
use crate::unit::{Payload, Unit};

/// Opus needs no remux: one RTP packet carries one Opus packet.
pub(crate) struct OpusProcessor {
    encoder: RtpEncoder,
    max_packet_size: usize,
}

impl OpusProcessor {
    pub fn new(payload_type: u8, max_packet_size: usize) -> Self {
        OpusProcessor {
            encoder: RtpEncoder::new(payload_type, max_packet_size),
            max_packet_size,
        }
    }
}

impl Processor for OpusProcessor {
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
                let packets = unit
                    .rtp_packets
                    .iter()
                    .map(|p| p.payload.clone())
                    .collect();
                unit.payload = Payload::Opus(packets);
            }
            Ok(())
        } else {
            let Payload::Opus(packets) = std::mem::replace(&mut unit.payload, Payload::None)
            else {
                return Err(ProcessError::codec("expected an Opus payload"));
            };
            let max_payload = self.encoder.max_payload_size();
            for packet in &packets {
                if packet.len() > max_payload {
                    return Err(ProcessError::Oversized {
                        size: packet.len(),
                        max: max_payload,
                    });
                }
            }
            unit.rtp_packets = self.encoder.wrap(packets.clone(), unit.pts);
            unit.payload = Payload::Opus(packets);
            Ok(())
        }
    }
}
