use std::fmt;

pub const VIDEO_CLOCK_RATE: u32 = 90_000;
pub const OPUS_CLOCK_RATE: u32 = 48_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// One media of a source's description: a typed container carrying one or
/// more formats, each with its own RTP payload type.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaDesc {
    pub kind: MediaKind,
    pub formats: Vec<FormatDesc>,
}

impl MediaDesc {
    pub fn find_format(&self, payload_type: u8) -> Option<&FormatDesc> {
        self.formats
            .iter()
            .find(|f| f.payload_type() == payload_type)
    }
}

/// Codec descriptor for a single format. Track parameters that evolve with
/// the stream (SPS/PPS and friends) start from what the description carries
/// and are kept up to date by the per-format processor.
#[derive(Debug, Clone, PartialEq)]
pub enum FormatDesc {
    Generic {
        payload_type: u8,
        clock_rate: u32,
        rtp_map: String,
    },
    H264 {
        payload_type: u8,
        sps: Option<Vec<u8>>,
        pps: Option<Vec<u8>>,
    },
    H265 {
        payload_type: u8,
        vps: Option<Vec<u8>>,
        sps: Option<Vec<u8>>,
        pps: Option<Vec<u8>>,
    },
    Vp8 {
        payload_type: u8,
    },
    Vp9 {
        payload_type: u8,
    },
    Mpeg4Audio {
        payload_type: u8,
        sample_rate: u32,
        channels: u8,
        config: Vec<u8>,
    },
    Opus {
        payload_type: u8,
        channels: u8,
    },
}

impl FormatDesc {
    pub fn payload_type(&self) -> u8 {
        match self {
            FormatDesc::Generic { payload_type, .. } => *payload_type,
            FormatDesc::H264 { payload_type, .. } => *payload_type,
            FormatDesc::H265 { payload_type, .. } => *payload_type,
            FormatDesc::Vp8 { payload_type } => *payload_type,
            FormatDesc::Vp9 { payload_type } => *payload_type,
            FormatDesc::Mpeg4Audio { payload_type, .. } => *payload_type,
            FormatDesc::Opus { payload_type, .. } => *payload_type,
        }
    }

    pub fn clock_rate(&self) -> u32 {
        match self {
            FormatDesc::Generic { clock_rate, .. } => *clock_rate,
            FormatDesc::H264 { .. }
            | FormatDesc::H265 { .. }
            | FormatDesc::Vp8 { .. }
            | FormatDesc::Vp9 { .. } => VIDEO_CLOCK_RATE,
            FormatDesc::Mpeg4Audio { sample_rate, .. } => *sample_rate,
            FormatDesc::Opus { .. } => OPUS_CLOCK_RATE,
        }
    }

    /// Short codec label used in logs.
    pub fn codec_name(&self) -> String {
        match self {
            FormatDesc::Generic { rtp_map, .. } => {
                rtp_map.split('/').next().unwrap_or("generic").to_string()
            }
            FormatDesc::H264 { .. } => "H264".to_string(),
            FormatDesc::H265 { .. } => "H265".to_string(),
            FormatDesc::Vp8 { .. } => "VP8".to_string(),
            FormatDesc::Vp9 { .. } => "VP9".to_string(),
            FormatDesc::Mpeg4Audio { .. } => "MPEG-4 Audio".to_string(),
            FormatDesc::Opus { .. } => "Opus".to_string(),
        }
    }

    /// Codec description in RFC 6381 form, used for the track listings of
    /// the introspection API. Derived from the declared parameter sets
    /// where the codec carries them; a bare sample entry name otherwise.
    pub fn rfc6381_codec(&self) -> String {
        match self {
            FormatDesc::Generic { rtp_map, .. } => rtp_map
                .split('/')
                .next()
                .unwrap_or("generic")
                .to_ascii_lowercase(),
            FormatDesc::H264 { sps, .. } => avc1_codec_string(sps.as_deref()),
            FormatDesc::H265 { sps, .. } => hvc1_codec_string(sps.as_deref()),
            FormatDesc::Vp8 { .. } => "vp08".to_string(),
            FormatDesc::Vp9 { .. } => "vp09".to_string(),
            FormatDesc::Mpeg4Audio { config, .. } => match config.first() {
                Some(b) => format!("mp4a.40.{}", b >> 3),
                None => "mp4a.40".to_string(),
            },
            FormatDesc::Opus { .. } => "opus".to_string(),
        }
    }
}

/// `avc1.PPCCLL` from the profile, constraint and level bytes that follow
/// the SPS NAL header.
fn avc1_codec_string(sps: Option<&[u8]>) -> String {
    match sps {
        Some(sps) if sps.len() >= 4 => {
            let profile_idc = sps[1];
            let constraints = sps[2];
            let level_idc = sps[3];
            format!("avc1.{profile_idc:02x}{constraints:02x}{level_idc:02x}")
        }
        _ => "avc1".to_string(),
    }
}

/// `hvc1.<profile>.<compatibility>.<tier><level>` from the
/// profile_tier_level that opens an H.265 SPS: profile space/tier/profile in
/// byte 3, 32 compatibility bits (bit-reversed per ISO 14496-15), the level
/// after the six constraint bytes.
fn hvc1_codec_string(sps: Option<&[u8]>) -> String {
    match sps {
        Some(sps) if sps.len() >= 15 => {
            let tier = if sps[3] & 0x20 != 0 { 'H' } else { 'L' };
            let profile_idc = sps[3] & 0x1F;
            let compatibility =
                u32::from_be_bytes([sps[4], sps[5], sps[6], sps[7]]).reverse_bits();
            let level_idc = sps[14];
            format!("hvc1.{profile_idc}.{compatibility:x}.{tier}{level_idc}")
        }
        _ => "hvc1".to_string(),
    }
}
