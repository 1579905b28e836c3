//! Sample records and recording configuration.
//!
//! Both types have a fixed packed on-disk layout used by the index sidecar
//! (see [`crate::index`]): fields in declaration order, no padding,
//! host-endian. The sidecar is read back only by a recovery run on the
//! same machine, so native byte order is deliberate; the layout itself is
//! locked so any binary of the same layout generation can read it.

use serde::Serialize;

/// Track discriminant stored with every sample record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            TrackKind::Video => 0,
            TrackKind::Audio => 1,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(TrackKind::Video),
            1 => Some(TrackKind::Audio),
            _ => None,
        }
    }
}

/// One logged media sample.
#[derive(Debug, Clone, Copy, Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct SampleRecord {
    /// Byte offset from the start of the mdat payload (not the file).
    pub offset: u64,
    /// Sample length in bytes.
    pub size: u32,
    /// Presentation timestamp in the track's timescale.
    pub pts: i64,
    /// Decoding timestamp. Equal to `pts` for streams without reordering.
    pub dts: i64,
    /// Sync-sample flag. Always set for audio.
    pub keyframe: bool,
    /// Owning track.
    pub track: TrackKind,
}

impl SampleRecord {
    /// Packed size: offset u64 + size u32 + pts i64 + dts i64 + keyframe u8
    /// + track u8.
    pub const ENCODED_LEN: usize = 30;

    /// Pack into the fixed index layout (field order above, host-endian).
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut raw = [0u8; Self::ENCODED_LEN];
        raw[0..8].copy_from_slice(&self.offset.to_ne_bytes());
        raw[8..12].copy_from_slice(&self.size.to_ne_bytes());
        raw[12..20].copy_from_slice(&self.pts.to_ne_bytes());
        raw[20..28].copy_from_slice(&self.dts.to_ne_bytes());
        raw[28] = self.keyframe as u8;
        raw[29] = self.track.to_byte();
        raw
    }

    /// Unpack one record. Returns `None` for unknown track ids so stale or
    /// foreign records can be skipped rather than aborting a recovery.
    pub fn decode(raw: &[u8; Self::ENCODED_LEN]) -> Option<Self> {
        let track = TrackKind::from_byte(raw[29])?;
        Some(Self {
            offset: u64::from_ne_bytes(raw[0..8].try_into().unwrap()),
            size: u32::from_ne_bytes(raw[8..12].try_into().unwrap()),
            pts: i64::from_ne_bytes(raw[12..20].try_into().unwrap()),
            dts: i64::from_ne_bytes(raw[20..28].try_into().unwrap()),
            keyframe: raw[28] != 0,
            track,
        })
    }
}

/// Recording configuration, persisted at the head of the index so a
/// recovery run does not depend on the caller remembering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct RecorderConfig {
    /// Video timestamp ticks per second.
    pub video_timescale: u32,
    /// Audio timestamp ticks per second.
    pub audio_timescale: u32,
    /// AAC sample rate in Hz.
    pub audio_sample_rate: u32,
    /// AAC channel count.
    pub audio_channels: u16,
    /// Flush/sync both files at least this often.
    pub flush_interval_ms: u32,
    /// Flush/sync both files at least every this many samples.
    pub flush_frame_count: u32,
    /// Visual width in pixels.
    pub video_width: u32,
    /// Visual height in pixels.
    pub video_height: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            video_timescale: 30000,
            audio_timescale: 48000,
            audio_sample_rate: 48000,
            audio_channels: 2,
            flush_interval_ms: 500,
            flush_frame_count: 1000,
            video_width: 640,
            video_height: 480,
        }
    }
}

impl RecorderConfig {
    /// Packed size: seven u32 fields + one u16.
    pub const ENCODED_LEN: usize = 30;

    /// Pack into the fixed index layout (field order above, host-endian).
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut raw = [0u8; Self::ENCODED_LEN];
        raw[0..4].copy_from_slice(&self.video_timescale.to_ne_bytes());
        raw[4..8].copy_from_slice(&self.audio_timescale.to_ne_bytes());
        raw[8..12].copy_from_slice(&self.audio_sample_rate.to_ne_bytes());
        raw[12..14].copy_from_slice(&self.audio_channels.to_ne_bytes());
        raw[14..18].copy_from_slice(&self.flush_interval_ms.to_ne_bytes());
        raw[18..22].copy_from_slice(&self.flush_frame_count.to_ne_bytes());
        raw[22..26].copy_from_slice(&self.video_width.to_ne_bytes());
        raw[26..30].copy_from_slice(&self.video_height.to_ne_bytes());
        raw
    }

    pub fn decode(raw: &[u8; Self::ENCODED_LEN]) -> Self {
        Self {
            video_timescale: u32::from_ne_bytes(raw[0..4].try_into().unwrap()),
            audio_timescale: u32::from_ne_bytes(raw[4..8].try_into().unwrap()),
            audio_sample_rate: u32::from_ne_bytes(raw[8..12].try_into().unwrap()),
            audio_channels: u16::from_ne_bytes(raw[12..14].try_into().unwrap()),
            flush_interval_ms: u32::from_ne_bytes(raw[14..18].try_into().unwrap()),
            flush_frame_count: u32::from_ne_bytes(raw[18..22].try_into().unwrap()),
            video_width: u32::from_ne_bytes(raw[22..26].try_into().unwrap()),
            video_height: u32::from_ne_bytes(raw[26..30].try_into().unwrap()),
        }
    }
}
