use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use webrtc::rtp::packet::Packet;

use crate::entity::EntityInfo;
use crate::error::PathError;
use crate::media::MediaDesc;
use crate::result::Result;
use crate::unit::Unit;

mod format;
pub mod writer;

pub use format::{ReaderDelivery, UnitFn};

use format::StreamFormat;

/// The active media container of a path: one per path while its source is
/// ready, holding a fan-out point per (media, format). Not an actor: the
/// hot path takes only the per-format locks.
pub struct Stream {
    medias: Vec<MediaDesc>,
    formats: Vec<Vec<StreamFormat>>,
    bytes_received: AtomicU64,
}

impl Stream {
    pub fn new(
        medias: Vec<MediaDesc>,
        generate_rtp_packets: bool,
        max_packet_size: usize,
    ) -> Result<Self> {
        let mut formats = Vec::with_capacity(medias.len());
        for media in &medias {
            let mut media_formats = Vec::with_capacity(media.formats.len());
            for desc in &media.formats {
                let sf = StreamFormat::new(desc.clone(), generate_rtp_packets, max_packet_size)
                    .map_err(PathError::bad_format)?;
                media_formats.push(sf);
            }
            formats.push(media_formats);
        }
        Ok(Stream {
            medias,
            formats,
            bytes_received: AtomicU64::new(0),
        })
    }

    pub fn medias(&self) -> &[MediaDesc] {
        &self.medias
    }

    /// RFC 6381 codec strings, one per format, for the introspection API.
    pub fn track_labels(&self) -> Vec<String> {
        self.medias
            .iter()
            .flat_map(|m| m.formats.iter().map(|f| f.rfc6381_codec()))
            .collect()
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    fn format(&self, media_idx: usize, payload_type: u8) -> Result<&StreamFormat> {
        self.formats
            .get(media_idx)
            .and_then(|formats| {
                formats
                    .iter()
                    .find(|f| f.desc().payload_type() == payload_type)
            })
            .ok_or_else(|| {
                PathError::invalid_operation(format!(
                    "no format with payload type {payload_type} in media {media_idx}"
                ))
            })
    }

    /// Registers a delivery callback for one (media, format). A reader is
    /// fully subscribed when this returns: it sees every unit written
    /// afterwards.
    pub fn add_reader(
        &self,
        info: EntityInfo,
        media_idx: usize,
        payload_type: u8,
        delivery: ReaderDelivery,
        callback: UnitFn,
    ) -> Result<()> {
        self.format(media_idx, payload_type)?
            .add_reader(info, delivery, callback);
        Ok(())
    }

    /// Idempotent; drops the reader from every format it subscribed to.
    pub fn remove_reader(&self, reader_id: &str) {
        for media in &self.formats {
            for format in media {
                format.remove_reader(reader_id);
            }
        }
    }

    pub fn readers(&self) -> Vec<EntityInfo> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for media in &self.formats {
            for format in media {
                for info in format.reader_infos() {
                    if seen.insert(info.id.clone()) {
                        out.push(info);
                    }
                }
            }
        }
        out
    }

    /// The hot path: normalize the unit with the format's processor, then
    /// deliver it to every subscribed reader. Soft processor results (more
    /// packets needed) consume the unit silently.
    pub fn write_unit(&self, media_idx: usize, payload_type: u8, unit: Unit) -> Result<()> {
        let format = self.format(media_idx, payload_type)?;
        match format.write(unit, &self.bytes_received) {
            Ok(()) => Ok(()),
            Err(err) if err.is_soft() => Ok(()),
            Err(err) => Err(PathError::bad_format(err)),
        }
    }

    pub fn write_rtp_packet(
        &self,
        media_idx: usize,
        payload_type: u8,
        packet: Packet,
        ntp: DateTime<Utc>,
    ) -> Result<()> {
        self.write_unit(media_idx, payload_type, Unit::from_rtp(packet, ntp))
    }
}
