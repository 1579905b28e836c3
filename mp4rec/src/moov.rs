//! `moov` box synthesis.
//!
//! Turns the flat sample-record vectors into the movie-header tree that
//! makes an `mdat` payload playable:
//!
//! ```text
//! moov
//! ├── mvhd
//! ├── trak (video)          trak (audio)
//! │   ├── tkhd              ├── tkhd
//! │   └── mdia              └── mdia
//! │       ├── mdhd              ├── mdhd
//! │       ├── hdlr "vide"       ├── hdlr "soun"
//! │       └── minf              └── minf
//! │           ├── vmhd              ├── smhd
//! │           ├── dinf/dref         ├── dinf/dref
//! │           └── stbl              └── stbl
//! │               ├── stsd (avc1/avcC)  ├── stsd (mp4a/esds)
//! │               └── stts/stss/stsz/stsc/stco
//! ```
//!
//! Children are composed before their container, so every size field is
//! known when the header goes out; the result is a pure function of the
//! inputs.

use crate::avc::ParameterSets;
use crate::error::{Mp4RecError, Result};
use crate::sample::{RecorderConfig, SampleRecord, TrackKind};
use crate::writer::BoxWriter;

/// Movie-header timescale: mvhd/tkhd durations are in milliseconds.
const MOVIE_TIMESCALE: u32 = 1000;

const VIDEO_TRACK_ID: u32 = 1;
const AUDIO_TRACK_ID: u32 = 2;

/// Samples per AAC-LC frame, used as the final audio sample's duration
/// when the track holds a single sample.
const AAC_FRAME_SAMPLES: u32 = 1024;

/// MPEG-4 sampling frequency table; the index into this table is what the
/// AudioSpecificConfig carries.
const SAMPLE_RATE_TABLE: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Table index for `sample_rate`, defaulting to 48000 Hz for rates the
/// table does not carry.
fn sample_rate_index(sample_rate: u32) -> u8 {
    SAMPLE_RATE_TABLE
        .iter()
        .position(|&rate| rate == sample_rate)
        .unwrap_or(3) as u8
}

struct TrackSpec<'a> {
    track_id: u32,
    timescale: u32,
    kind: TrackKind,
    config: &'a RecorderConfig,
    params: &'a ParameterSets,
}

/// Build a complete `moov` box for the given sample records.
///
/// `mdat_start` is the file offset of the first payload byte; chunk
/// offsets in `stco` are absolute file offsets, so any payload byte past
/// `u32::MAX` fails with `OffsetOverflow`.
pub fn build_moov(
    video: &[SampleRecord],
    audio: &[SampleRecord],
    config: &RecorderConfig,
    params: &ParameterSets,
    mdat_start: u64,
) -> Result<Vec<u8>> {
    let video_trak = if video.is_empty() {
        Vec::new()
    } else {
        build_trak(
            &TrackSpec {
                track_id: VIDEO_TRACK_ID,
                timescale: config.video_timescale,
                kind: TrackKind::Video,
                config,
                params,
            },
            video,
            mdat_start,
        )?
    };
    let audio_trak = if audio.is_empty() {
        Vec::new()
    } else {
        build_trak(
            &TrackSpec {
                track_id: AUDIO_TRACK_ID,
                timescale: config.audio_timescale,
                kind: TrackKind::Audio,
                config,
                params,
            },
            audio,
            mdat_start,
        )?
    };

    let duration = scaled_duration(video, config.video_timescale)
        .max(scaled_duration(audio, config.audio_timescale));
    let mvhd = build_mvhd(duration);

    let payload_len = mvhd.len() + video_trak.len() + audio_trak.len();
    let mut w = BoxWriter::with_capacity(8 + payload_len);
    w.box_header(b"moov", (8 + payload_len) as u32);
    w.put_slice(&mvhd);
    w.put_slice(&video_trak);
    w.put_slice(&audio_trak);
    Ok(w.into_vec())
}

/// Track duration converted to the movie timescale.
fn scaled_duration(frames: &[SampleRecord], timescale: u32) -> u32 {
    match frames.last() {
        Some(last) => {
            (last.pts * i64::from(MOVIE_TIMESCALE) / i64::from(timescale.max(1))) as u32
        }
        None => 0,
    }
}

fn build_mvhd(duration: u32) -> Vec<u8> {
    let mut w = BoxWriter::with_capacity(108);
    w.box_header(b"mvhd", 108);
    w.put_u32(0); // version + flags
    w.put_u32(0); // creation time
    w.put_u32(0); // modification time
    w.put_u32(MOVIE_TIMESCALE);
    w.put_u32(duration);
    w.put_u32(0x0001_0000); // rate 1.0
    w.put_u16(0x0100); // volume 1.0
    w.put_u16(0); // reserved
    w.put_zeros(8); // reserved
    put_identity_matrix(&mut w);
    w.put_zeros(24); // pre-defined
    w.put_u32(3); // next track id
    w.into_vec()
}

fn put_identity_matrix(w: &mut BoxWriter) {
    for i in 0..9 {
        if i == 0 || i == 4 {
            w.put_u32(0x0001_0000);
        } else if i == 8 {
            w.put_u32(0x4000_0000);
        } else {
            w.put_u32(0);
        }
    }
}

fn build_trak(spec: &TrackSpec<'_>, frames: &[SampleRecord], mdat_start: u64) -> Result<Vec<u8>> {
    let tkhd = build_tkhd(spec, frames);
    let mdhd = build_mdhd(spec.timescale, frames);
    let hdlr = build_hdlr(spec.kind);

    let media_header = match spec.kind {
        TrackKind::Video => build_vmhd(),
        TrackKind::Audio => build_smhd(),
    };
    let dinf = build_dinf();

    let mut stbl_payload = build_stsd(spec);
    stbl_payload.extend_from_slice(&build_stts(frames, spec.timescale, spec.kind));
    if spec.kind == TrackKind::Video {
        stbl_payload.extend_from_slice(&build_stss(frames));
    }
    stbl_payload.extend_from_slice(&build_stsz(frames));
    stbl_payload.extend_from_slice(&build_stsc());
    stbl_payload.extend_from_slice(&build_stco(frames, mdat_start)?);
    let stbl = wrap(b"stbl", &stbl_payload);

    let minf_payload = [media_header, dinf, stbl].concat();
    let minf = wrap(b"minf", &minf_payload);

    let mdia_payload = [mdhd, hdlr, minf].concat();
    let mdia = wrap(b"mdia", &mdia_payload);

    let trak_payload = [tkhd, mdia].concat();
    Ok(wrap(b"trak", &trak_payload))
}

fn wrap(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut w = BoxWriter::with_capacity(8 + payload.len());
    w.box_header(fourcc, (8 + payload.len()) as u32);
    w.put_slice(payload);
    w.into_vec()
}

fn build_tkhd(spec: &TrackSpec<'_>, frames: &[SampleRecord]) -> Vec<u8> {
    let mut w = BoxWriter::with_capacity(92);
    w.box_header(b"tkhd", 92);
    w.put_u32(0x0000_000F); // version + flags: enabled, in movie, in preview
    w.put_u32(0); // creation time
    w.put_u32(0); // modification time
    w.put_u32(spec.track_id);
    w.put_u32(0); // reserved
    w.put_u32(scaled_duration(frames, spec.timescale));
    w.put_zeros(8); // reserved
    w.put_u16(0); // layer
    w.put_u16(0); // alternate group
    w.put_u16(match spec.kind {
        TrackKind::Video => 0,
        TrackKind::Audio => 0x0100,
    });
    w.put_u16(0); // reserved
    put_identity_matrix(&mut w);
    let (width, height) = (spec.config.video_width, spec.config.video_height);
    if spec.kind == TrackKind::Video && width > 0 && height > 0 {
        w.put_u32(width << 16);
        w.put_u32(height << 16);
    } else {
        w.put_u32(0x0001_0000);
        w.put_u32(0x0001_0000);
    }
    w.into_vec()
}

fn build_mdhd(timescale: u32, frames: &[SampleRecord]) -> Vec<u8> {
    let duration = frames.last().map(|f| f.pts as u32).unwrap_or(0);
    let mut w = BoxWriter::with_capacity(32);
    w.box_header(b"mdhd", 32);
    w.put_u32(0); // version + flags
    w.put_u32(0); // creation time
    w.put_u32(0); // modification time
    w.put_u32(timescale);
    w.put_u32(duration);
    w.put_u16(0x55C4); // language: undetermined
    w.put_u16(0); // quality
    w.into_vec()
}

fn build_hdlr(kind: TrackKind) -> Vec<u8> {
    let handler: &[u8; 4] = match kind {
        TrackKind::Video => b"vide",
        TrackKind::Audio => b"soun",
    };
    let mut w = BoxWriter::with_capacity(68);
    w.box_header(b"hdlr", 68);
    w.put_u32(0); // version + flags
    w.put_u32(0); // pre-defined
    w.put_slice(handler);
    w.put_zeros(48);
    w.into_vec()
}

fn build_vmhd() -> Vec<u8> {
    let mut w = BoxWriter::with_capacity(20);
    w.box_header(b"vmhd", 20);
    w.put_u32(0); // version + flags
    w.put_u16(0); // graphics mode
    w.put_zeros(6); // opcolor
    w.into_vec()
}

// version+flags is a single 32-bit field here. Splitting it into a 1-byte
// version and 4-byte flags produces a 17-byte box that misaligns every
// box after it.
fn build_smhd() -> Vec<u8> {
    let mut w = BoxWriter::with_capacity(16);
    w.box_header(b"smhd", 16);
    w.put_u32(0); // version + flags
    w.put_u16(0); // balance
    w.put_u16(0); // reserved
    w.into_vec()
}

fn build_dinf() -> Vec<u8> {
    let mut dref = BoxWriter::with_capacity(28);
    dref.box_header(b"dref", 28);
    dref.put_u32(0); // version + flags
    dref.put_u32(1); // entry count
    dref.box_header(b"url ", 12);
    dref.put_u32(0x0000_0001); // flags: self-contained
    wrap(b"dinf", dref.as_slice())
}

fn build_stsd(spec: &TrackSpec<'_>) -> Vec<u8> {
    let entry = match spec.kind {
        TrackKind::Video => build_avc1(
            spec.config.video_width,
            spec.config.video_height,
            spec.params,
        ),
        TrackKind::Audio => build_mp4a(
            spec.config.audio_sample_rate,
            spec.config.audio_channels,
        ),
    };
    let mut w = BoxWriter::with_capacity(16 + entry.len());
    w.box_header(b"stsd", (16 + entry.len()) as u32);
    w.put_u32(0); // version + flags
    w.put_u32(1); // entry count
    w.put_slice(&entry);
    w.into_vec()
}

/// VisualSampleEntry: 86 fixed bytes, then the `avcC` configuration box.
fn build_avc1(width: u32, height: u32, params: &ParameterSets) -> Vec<u8> {
    let avcc = build_avcc(params);
    let mut w = BoxWriter::with_capacity(86 + avcc.len());
    w.box_header(b"avc1", (86 + avcc.len()) as u32);
    w.put_zeros(6); // reserved
    w.put_u16(1); // data reference index
    w.put_u16(0); // version
    w.put_u16(0); // revision
    w.put_u32(0); // vendor
    w.put_u32(0); // temporal quality
    w.put_u32(0); // spatial quality
    w.put_u16(width as u16);
    w.put_u16(height as u16);
    w.put_u32(0x0048_0000); // horizontal resolution: 72 dpi
    w.put_u32(0x0048_0000); // vertical resolution: 72 dpi
    w.put_u32(0); // data size
    w.put_u16(1); // frame count
    w.put_zeros(32); // compressor name
    w.put_u16(24); // depth
    w.put_u16(0xFFFF); // color table id
    w.put_slice(&avcc);
    w.into_vec()
}

fn build_avcc(params: &ParameterSets) -> Vec<u8> {
    let sps = &params.sps;
    let pps = &params.pps;

    // Profile, compatibility and level live in SPS bytes 1-3; sniff them
    // when the SPS is long enough, otherwise declare Baseline 3.1.
    let (profile, compatibility, level) = if sps.len() >= 4 {
        (sps[1], sps[2], sps[3])
    } else {
        (0x42, 0x00, 0x1F)
    };

    let size = 19 + sps.len() + pps.len();
    let mut w = BoxWriter::with_capacity(size);
    w.box_header(b"avcC", size as u32);
    w.put_u8(0x01); // configuration version
    w.put_u8(profile);
    w.put_u8(compatibility);
    w.put_u8(level);
    w.put_u8(0xFF); // reserved + nal_length_size - 1 (4-byte prefixes)
    w.put_u8(0xE1); // reserved + 1 SPS
    w.put_u16(sps.len() as u16);
    w.put_slice(sps);
    w.put_u8(0x01); // 1 PPS
    w.put_u16(pps.len() as u16);
    w.put_slice(pps);
    w.into_vec()
}

/// AudioSampleEntry: 36 fixed bytes, then the `esds` descriptor box.
fn build_mp4a(sample_rate: u32, channels: u16) -> Vec<u8> {
    let channels = if channels > 0 { channels } else { 2 };
    let sample_rate = if sample_rate > 0 { sample_rate } else { 48000 };
    let esds = build_esds(sample_rate, channels);

    let mut w = BoxWriter::with_capacity(36 + esds.len());
    w.box_header(b"mp4a", (36 + esds.len()) as u32);
    w.put_zeros(6); // reserved
    w.put_u16(1); // data reference index
    w.put_u16(0); // version
    w.put_u16(0); // revision
    w.put_u32(0); // vendor
    w.put_u16(channels);
    w.put_u16(16); // sample size
    w.put_u16(0); // compression id
    w.put_u16(0); // packet size
    w.put_u32(sample_rate << 16); // 16.16 fixed point
    w.put_slice(&esds);
    w.into_vec()
}

/// esds: ES_Descriptor → DecoderConfigDescriptor (AAC-LC) →
/// DecoderSpecificInfo (2-byte AudioSpecificConfig), plus the mandatory
/// SLConfigDescriptor.
fn build_esds(sample_rate: u32, channels: u16) -> Vec<u8> {
    let asc = audio_specific_config(sample_rate, channels);

    let mut decoder_config = BoxWriter::new();
    decoder_config.put_u8(0x40); // objectTypeIndication: MPEG-4 audio
    decoder_config.put_u8(0x15); // streamType audio, upStream 0, reserved 1
    decoder_config.put_zeros(3); // bufferSizeDB
    decoder_config.put_u32(0); // maxBitrate
    decoder_config.put_u32(0); // avgBitrate
    decoder_config.put_u8(0x05); // DecoderSpecificInfo tag
    decoder_config.descriptor_len(asc.len() as u32);
    decoder_config.put_slice(&asc);

    let mut es = BoxWriter::new();
    es.put_u16(AUDIO_TRACK_ID as u16); // ES_ID
    es.put_u8(0x00); // stream dependence / URL / OCR flags
    es.put_u8(0x04); // DecoderConfigDescriptor tag
    es.descriptor_len(decoder_config.len() as u32);
    es.put_slice(decoder_config.as_slice());
    es.put_u8(0x06); // SLConfigDescriptor tag
    es.descriptor_len(1);
    es.put_u8(0x02); // predefined: MP4 file

    let mut payload = BoxWriter::new();
    payload.put_u32(0); // version + flags
    payload.put_u8(0x03); // ES_Descriptor tag
    payload.descriptor_len(es.len() as u32);
    payload.put_slice(es.as_slice());

    wrap(b"esds", payload.as_slice())
}

fn audio_specific_config(sample_rate: u32, channels: u16) -> [u8; 2] {
    let audio_object_type: u16 = 2; // AAC-LC
    let rate_index = u16::from(sample_rate_index(sample_rate));
    let bits = (audio_object_type & 0x1F) << 11
        | (rate_index & 0x0F) << 7
        | (channels & 0x0F) << 3;
    bits.to_be_bytes()
}

/// Duration assigned to the final sample, which has no successor to take a
/// delta from: reuse the previous delta when there is one, otherwise fall
/// back to one AAC frame for audio or a 30 fps frame for video.
fn last_sample_duration(frames: &[SampleRecord], timescale: u32, kind: TrackKind) -> u32 {
    if frames.len() >= 2 {
        (frames[frames.len() - 1].pts - frames[frames.len() - 2].pts) as u32
    } else {
        match kind {
            TrackKind::Audio => AAC_FRAME_SAMPLES,
            TrackKind::Video if timescale >= 30 => timescale / 30,
            TrackKind::Video => 1,
        }
    }
}

/// stts: run-length-encoded `(count, duration)` over consecutive pts
/// deltas.
fn build_stts(frames: &[SampleRecord], timescale: u32, kind: TrackKind) -> Vec<u8> {
    let last = last_sample_duration(frames, timescale, kind);
    let mut entries: Vec<(u32, u32)> = Vec::new();
    for i in 0..frames.len() {
        let duration = if i + 1 < frames.len() {
            (frames[i + 1].pts - frames[i].pts) as u32
        } else {
            last
        };
        match entries.last_mut() {
            Some((count, d)) if *d == duration => *count += 1,
            _ => entries.push((1, duration)),
        }
    }

    let size = 16 + entries.len() * 8;
    let mut w = BoxWriter::with_capacity(size);
    w.box_header(b"stts", size as u32);
    w.put_u32(0); // version + flags
    w.put_u32(entries.len() as u32);
    for (count, duration) in entries {
        w.put_u32(count);
        w.put_u32(duration);
    }
    w.into_vec()
}

/// stss: 1-based indices of sync samples. Emitted even when empty.
fn build_stss(frames: &[SampleRecord]) -> Vec<u8> {
    let keyframes: Vec<u32> = frames
        .iter()
        .enumerate()
        .filter(|(_, f)| f.keyframe)
        .map(|(i, _)| (i + 1) as u32)
        .collect();

    let size = 16 + keyframes.len() * 4;
    let mut w = BoxWriter::with_capacity(size);
    w.box_header(b"stss", size as u32);
    w.put_u32(0); // version + flags
    w.put_u32(keyframes.len() as u32);
    for index in keyframes {
        w.put_u32(index);
    }
    w.into_vec()
}

/// stsz in variable-size mode: one entry per sample.
fn build_stsz(frames: &[SampleRecord]) -> Vec<u8> {
    let size = 20 + frames.len() * 4;
    let mut w = BoxWriter::with_capacity(size);
    w.box_header(b"stsz", size as u32);
    w.put_u32(0); // version + flags
    w.put_u32(0); // sample size: variable
    w.put_u32(frames.len() as u32);
    for frame in frames {
        w.put_u32(frame.size);
    }
    w.into_vec()
}

/// stsc: every sample is its own chunk, so a single mapping entry covers
/// the whole track.
fn build_stsc() -> Vec<u8> {
    let mut w = BoxWriter::with_capacity(28);
    w.box_header(b"stsc", 28);
    w.put_u32(0); // version + flags
    w.put_u32(1); // entry count
    w.put_u32(1); // first chunk
    w.put_u32(1); // samples per chunk
    w.put_u32(1); // sample description index
    w.into_vec()
}

/// stco: one 32-bit absolute file offset per sample.
fn build_stco(frames: &[SampleRecord], mdat_start: u64) -> Result<Vec<u8>> {
    let size = 16 + frames.len() * 4;
    let mut w = BoxWriter::with_capacity(size);
    w.box_header(b"stco", size as u32);
    w.put_u32(0); // version + flags
    w.put_u32(frames.len() as u32);
    for frame in frames {
        let chunk_offset = mdat_start + frame.offset;
        if chunk_offset > u64::from(u32::MAX) {
            return Err(Mp4RecError::OffsetOverflow {
                offset: chunk_offset,
            });
        }
        w.put_u32(chunk_offset as u32);
    }
    Ok(w.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_frame(offset: u64, size: u32, pts: i64, keyframe: bool) -> SampleRecord {
        SampleRecord {
            offset,
            size,
            pts,
            dts: pts,
            keyframe,
            track: TrackKind::Video,
        }
    }

    fn audio_frame(offset: u64, size: u32, pts: i64) -> SampleRecord {
        SampleRecord {
            offset,
            size,
            pts,
            dts: pts,
            keyframe: true,
            track: TrackKind::Audio,
        }
    }

    fn u32_at(data: &[u8], pos: usize) -> u32 {
        u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap())
    }

    #[test]
    fn test_fixed_box_sizes() {
        assert_eq!(build_mvhd(0).len(), 108);
        assert_eq!(build_vmhd().len(), 20);
        assert_eq!(build_smhd().len(), 16);
        assert_eq!(build_hdlr(TrackKind::Video).len(), 68);
        assert_eq!(build_dinf().len(), 36);
        assert_eq!(build_stsc().len(), 28);

        let frames = [video_frame(0, 10, 0, true)];
        let spec = TrackSpec {
            track_id: VIDEO_TRACK_ID,
            timescale: 30000,
            kind: TrackKind::Video,
            config: &RecorderConfig::default(),
            params: &ParameterSets::fallback(),
        };
        assert_eq!(build_tkhd(&spec, &frames).len(), 92);
        assert_eq!(build_mdhd(30000, &frames).len(), 32);
    }

    #[test]
    fn test_smhd_is_single_version_flags_word() {
        let smhd = build_smhd();
        assert_eq!(u32_at(&smhd, 0), 16);
        assert_eq!(&smhd[4..8], b"smhd");
        assert_eq!(&smhd[8..16], &[0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_stts_run_length_encodes_uniform_deltas() {
        let frames = [
            video_frame(0, 100, 0, true),
            video_frame(100, 200, 1000, true),
            video_frame(300, 150, 2000, true),
        ];
        let stts = build_stts(&frames, 30000, TrackKind::Video);
        assert_eq!(&stts[4..8], b"stts");
        assert_eq!(u32_at(&stts, 12), 1); // entry count
        assert_eq!(u32_at(&stts, 16), 3); // sample count
        assert_eq!(u32_at(&stts, 20), 1000); // duration
    }

    #[test]
    fn test_stts_splits_runs_on_delta_change() {
        let frames = [
            video_frame(0, 1, 0, true),
            video_frame(1, 1, 1000, false),
            video_frame(2, 1, 2000, false),
            video_frame(3, 1, 2500, false),
        ];
        let stts = build_stts(&frames, 30000, TrackKind::Video);
        // Deltas 1000, 1000, 500, then 500 reused for the last sample.
        assert_eq!(u32_at(&stts, 12), 2);
        assert_eq!(u32_at(&stts, 16), 2);
        assert_eq!(u32_at(&stts, 20), 1000);
        assert_eq!(u32_at(&stts, 24), 2);
        assert_eq!(u32_at(&stts, 28), 500);
    }

    #[test]
    fn test_stts_single_sample_fallback_durations() {
        let video = [video_frame(0, 1, 0, true)];
        let stts = build_stts(&video, 30000, TrackKind::Video);
        assert_eq!(u32_at(&stts, 20), 1000); // 30000 / 30

        let stts = build_stts(&video, 20, TrackKind::Video);
        assert_eq!(u32_at(&stts, 20), 1);

        let audio = [audio_frame(0, 1, 0)];
        let stts = build_stts(&audio, 48000, TrackKind::Audio);
        assert_eq!(u32_at(&stts, 20), AAC_FRAME_SAMPLES);
    }

    #[test]
    fn test_stss_lists_keyframes_one_based() {
        let frames = [
            video_frame(0, 1, 0, true),
            video_frame(1, 1, 1000, false),
            video_frame(2, 1, 2000, true),
        ];
        let stss = build_stss(&frames);
        assert_eq!(u32_at(&stss, 12), 2);
        assert_eq!(u32_at(&stss, 16), 1);
        assert_eq!(u32_at(&stss, 20), 3);
    }

    #[test]
    fn test_stss_emitted_with_zero_entries() {
        let frames = [video_frame(0, 1, 0, false)];
        let stss = build_stss(&frames);
        assert_eq!(stss.len(), 16);
        assert_eq!(u32_at(&stss, 12), 0);
    }

    #[test]
    fn test_stco_adds_mdat_start() {
        let frames = [
            video_frame(0, 100, 0, true),
            video_frame(100, 200, 1000, true),
            video_frame(300, 150, 2000, true),
        ];
        let stco = build_stco(&frames, 40).unwrap();
        assert_eq!(u32_at(&stco, 12), 3);
        assert_eq!(u32_at(&stco, 16), 40);
        assert_eq!(u32_at(&stco, 20), 140);
        assert_eq!(u32_at(&stco, 24), 340);
    }

    #[test]
    fn test_stco_overflow_detected() {
        let frames = [video_frame(u64::from(u32::MAX), 1, 0, true)];
        assert!(matches!(
            build_stco(&frames, 40),
            Err(Mp4RecError::OffsetOverflow { .. })
        ));

        let edge = [video_frame(u64::from(u32::MAX) - 40, 1, 0, true)];
        assert!(build_stco(&edge, 40).is_ok());
    }

    #[test]
    fn test_stsz_variable_mode() {
        let frames = [video_frame(0, 100, 0, true), video_frame(100, 200, 1, true)];
        let stsz = build_stsz(&frames);
        assert_eq!(u32_at(&stsz, 8), 0); // version + flags
        assert_eq!(u32_at(&stsz, 12), 0); // variable sizes
        assert_eq!(u32_at(&stsz, 16), 2);
        assert_eq!(u32_at(&stsz, 20), 100);
        assert_eq!(u32_at(&stsz, 24), 200);
    }

    #[test]
    fn test_avcc_carries_parameter_sets() {
        let params = ParameterSets {
            sps: vec![0x67, 0x64, 0x00, 0x28, 0xAC],
            pps: vec![0x68, 0xEE, 0x3C, 0x80],
        };
        let avcc = build_avcc(&params);
        assert_eq!(avcc.len(), 19 + 5 + 4);
        assert_eq!(&avcc[4..8], b"avcC");
        assert_eq!(avcc[8], 0x01); // version
        assert_eq!(avcc[9], 0x64); // profile from sps[1]
        assert_eq!(avcc[10], 0x00);
        assert_eq!(avcc[11], 0x28); // level from sps[3]
        assert_eq!(avcc[12], 0xFF);
        assert_eq!(avcc[13], 0xE1);
        assert_eq!(u16::from_be_bytes([avcc[14], avcc[15]]), 5);
        assert_eq!(&avcc[16..21], &params.sps[..]);
        assert_eq!(avcc[21], 0x01);
        assert_eq!(u16::from_be_bytes([avcc[22], avcc[23]]), 4);
        assert_eq!(&avcc[24..28], &params.pps[..]);
    }

    #[test]
    fn test_avcc_short_sps_uses_baseline_profile() {
        let params = ParameterSets {
            sps: vec![0x67, 0x42],
            pps: vec![0x68],
        };
        let avcc = build_avcc(&params);
        assert_eq!(avcc[9], 0x42);
        assert_eq!(avcc[10], 0x00);
        assert_eq!(avcc[11], 0x1F);
    }

    #[test]
    fn test_sample_rate_index_table() {
        assert_eq!(sample_rate_index(96000), 0);
        assert_eq!(sample_rate_index(48000), 3);
        assert_eq!(sample_rate_index(44100), 4);
        assert_eq!(sample_rate_index(8000), 11);
        assert_eq!(sample_rate_index(7350), 12);
        assert_eq!(sample_rate_index(12345), 3);
    }

    #[test]
    fn test_audio_specific_config_packing() {
        // AAC-LC (2), 48000 Hz (index 3), 2 channels:
        // 00010 0011 0010 000 = 0x1190
        assert_eq!(audio_specific_config(48000, 2), [0x11, 0x90]);
        // 44100 Hz (index 4), 1 channel: 00010 0100 0001 000 = 0x1208
        assert_eq!(audio_specific_config(44100, 1), [0x12, 0x08]);
    }

    #[test]
    fn test_esds_descriptor_chain() {
        let esds = build_esds(48000, 2);
        assert_eq!(&esds[4..8], b"esds");
        assert_eq!(u32_at(&esds, 8), 0); // version + flags
        assert_eq!(esds[12], 0x03); // ES_Descriptor tag
        assert_eq!(esds[13] as usize, esds.len() - 14); // canonical length
        assert_eq!(u16::from_be_bytes([esds[14], esds[15]]), 2); // ES_ID
        assert_eq!(esds[16], 0x00);
        assert_eq!(esds[17], 0x04); // DecoderConfigDescriptor tag
        assert_eq!(esds[19], 0x40); // AAC
        assert_eq!(esds[20], 0x15); // audio stream
        // Trailing SLConfigDescriptor.
        let n = esds.len();
        assert_eq!(&esds[n - 3..], &[0x06, 0x01, 0x02]);
    }

    #[test]
    fn test_mvhd_takes_longest_track() {
        let video = [video_frame(0, 1, 30000, true)]; // 1 s at 30000
        let audio = [audio_frame(1, 1, 96000)]; // 2 s at 48000
        let config = RecorderConfig::default();
        let moov = build_moov(&video, &audio, &config, &ParameterSets::fallback(), 40).unwrap();
        // mvhd directly follows the moov header; its duration field sits
        // after the 8-byte box header plus 16 bytes of version/flags and
        // times plus the 4-byte timescale.
        assert_eq!(u32_at(&moov, 8 + 8 + 16), 2000);
    }

    #[test]
    fn test_moov_skips_empty_tracks() {
        let video = [video_frame(0, 1, 0, true)];
        let config = RecorderConfig::default();
        let moov = build_moov(&video, &[], &config, &ParameterSets::fallback(), 40).unwrap();
        assert_eq!(u32_at(&moov, 0) as usize, moov.len());
        // Exactly one trak: mvhd then a single child.
        let mvhd_size = u32_at(&moov, 8) as usize;
        let trak_start = 8 + mvhd_size;
        assert_eq!(&moov[trak_start + 4..trak_start + 8], b"trak");
        let trak_size = u32_at(&moov, trak_start) as usize;
        assert_eq!(trak_start + trak_size, moov.len());
    }

    #[test]
    fn test_container_sizes_are_sums_of_children() {
        let video = [
            video_frame(0, 100, 0, true),
            video_frame(100, 100, 1000, false),
        ];
        let audio = [audio_frame(200, 32, 0), audio_frame(232, 32, 1024)];
        let config = RecorderConfig::default();
        let moov = build_moov(&video, &audio, &config, &ParameterSets::fallback(), 40).unwrap();

        fn check_children(data: &[u8]) {
            const CONTAINERS: [&[u8; 4]; 6] =
                [b"moov", b"trak", b"mdia", b"minf", b"dinf", b"stbl"];
            let mut pos = 0;
            while pos < data.len() {
                let size = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
                assert!(size >= 8 && pos + size <= data.len());
                let fourcc: [u8; 4] = data[pos + 4..pos + 8].try_into().unwrap();
                if CONTAINERS.contains(&&fourcc) {
                    check_children(&data[pos + 8..pos + size]);
                }
                pos += size;
            }
            assert_eq!(pos, data.len());
        }

        check_children(&moov);
    }
}
