use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use webrtc::util::MarshalSize;

use crate::entity::EntityInfo;
use crate::media::FormatDesc;
use crate::metrics;
use crate::processor::{new_processor, ProcessError, Processor};
use crate::unit::Unit;

/// Delivery callback registered by a reader for one (media, format).
pub type UnitFn = Arc<dyn Fn(Arc<Unit>) + Send + Sync>;

/// What a reader consumes. RTP readers take the packets as-is; everything
/// else needs the decoded payload, which is produced on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderDelivery {
    RtpPackets,
    DecodedUnits,
}

struct ReaderSlot {
    info: EntityInfo,
    delivery: ReaderDelivery,
    callback: UnitFn,
}

/// Per-(media, format) fan-out point: owns the processor and the reader
/// callbacks. The processor mutex serializes writes (preserving per-format
/// order); the reader map takes a readers/writers lock so subscription
/// changes never race a delivery.
pub(crate) struct StreamFormat {
    desc: FormatDesc,
    processor: Mutex<Box<dyn Processor>>,
    readers: RwLock<HashMap<String, ReaderSlot>>,
    decoded_readers: AtomicUsize,
}

impl StreamFormat {
    pub fn new(
        desc: FormatDesc,
        generate_rtp_packets: bool,
        max_packet_size: usize,
    ) -> Result<Self, ProcessError> {
        let processor = new_processor(&desc, generate_rtp_packets, max_packet_size)?;
        Ok(StreamFormat {
            desc,
            processor: Mutex::new(processor),
            readers: RwLock::new(HashMap::new()),
            decoded_readers: AtomicUsize::new(0),
        })
    }

    pub fn desc(&self) -> &FormatDesc {
        &self.desc
    }

    pub fn add_reader(&self, info: EntityInfo, delivery: ReaderDelivery, callback: UnitFn) {
        let mut readers = self.readers.write().unwrap();
        let slot = ReaderSlot {
            info: info.clone(),
            delivery,
            callback,
        };
        if let Some(prev) = readers.insert(info.id, slot) {
            if prev.delivery == ReaderDelivery::DecodedUnits {
                self.decoded_readers.fetch_sub(1, Ordering::SeqCst);
            }
        }
        if delivery == ReaderDelivery::DecodedUnits {
            self.decoded_readers.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn remove_reader(&self, reader_id: &str) {
        let mut readers = self.readers.write().unwrap();
        if let Some(slot) = readers.remove(reader_id) {
            if slot.delivery == ReaderDelivery::DecodedUnits {
                self.decoded_readers.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    pub fn reader_infos(&self) -> Vec<EntityInfo> {
        self.readers
            .read()
            .unwrap()
            .values()
            .map(|s| s.info.clone())
            .collect()
    }

    pub fn write(&self, mut unit: Unit, bytes_received: &AtomicU64) -> Result<(), ProcessError> {
        // The processor lock is held across the fan-out: units written
        // concurrently on the same format cannot interleave mid-delivery.
        let mut processor = self.processor.lock().unwrap();
        let has_decoded_readers = self.decoded_readers.load(Ordering::SeqCst) > 0;
        processor.process(&mut unit, has_decoded_readers)?;

        let size: usize = unit.rtp_packets.iter().map(|p| p.marshal_size()).sum();
        if size > 0 {
            bytes_received.fetch_add(size as u64, Ordering::Relaxed);
            metrics::BYTES_RECEIVED.inc_by(size as u64);
        }

        let unit = Arc::new(unit);
        let readers = self.readers.read().unwrap();
        for slot in readers.values() {
            match slot.delivery {
                ReaderDelivery::RtpPackets => {
                    if !unit.rtp_packets.is_empty() {
                        (slot.callback)(unit.clone());
                    }
                }
                ReaderDelivery::DecodedUnits => (slot.callback)(unit.clone()),
            }
        }
        Ok(())
    }
}
