use super::{clear_padding, packet_oversized, ProcessError, Processor};
use crate::unit::Unit;

/// Pass-through for formats without codec-specific handling: padding strip
/// and size enforcement only, no decoded payload.
pub(crate) struct GenericProcessor {
    max_packet_size: usize,
}

impl GenericProcessor {
    pub fn new(max_packet_size: usize) -> Self {
        GenericProcessor { max_packet_size }
    }
}

impl Processor for GenericProcessor {
    fn process(
        &mut self,
        unit: &mut Unit,
        _has_decoded_readers: bool,
    ) -> Result<(), ProcessError> {
        let pkt = unit
            .rtp_packets
            .first_mut()
            .ok_or_else(|| ProcessError::codec("generic format requires RTP input"))?;
        clear_padding(pkt);
        if let Some(err) = packet_oversized(pkt, self.max_packet_size) {
            return Err(err);
        }
        Ok(())
    }
}
