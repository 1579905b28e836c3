//! Recording lifecycle and the three-file crash-recovery protocol.
//!
//! A recording at path `P` owns three files:
//!
//! - `P`: the media file (`ftyp` + `mdat`, and after finalization `moov`),
//! - `P.idx`: the append-only sample index,
//! - `P.lock`: a sentinel marking the recording as in progress.
//!
//! While the lock file exists the media file is not valid for playback.
//! A process that dies mid-recording leaves all three behind; [`recover`]
//! rebuilds the `moov` from the index and removes the sidecars. Dropping
//! a recording `Recorder` does NOT finalize anything: dying without
//! notice is the protocol's normal path, not an exceptional one.
//!
//! [`recover`]: Recorder::recover

use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::avc::{self, ParameterSets};
use crate::error::{Mp4RecError, Result};
use crate::file_ops::{FileIo, FileOps, OpenMode, StdFileOps};
use crate::index::IndexFile;
use crate::moov;
use crate::sample::{RecorderConfig, SampleRecord, TrackKind};

/// `ftyp` written at the head of every recording: `isom` major brand,
/// minor version 0x200, compatible brands isom/iso2/avc1/mp41.
const FTYP: [u8; 32] = [
    0x00, 0x00, 0x00, 0x20, b'f', b't', b'y', b'p', // size + type
    b'i', b's', b'o', b'm', 0x00, 0x00, 0x02, 0x00, // major brand + minor version
    b'i', b's', b'o', b'm', b'i', b's', b'o', b'2', // compatible brands
    b'a', b'v', b'c', b'1', b'm', b'p', b'4', b'1',
];

/// File offset of the first mdat payload byte: 32-byte `ftyp` plus the
/// 8-byte `mdat` header.
pub const MDAT_START: u64 = 40;

const LOCK_SENTINEL: &[u8] = b"RECORDING";

const INDEX_SUFFIX: &str = ".idx";
const LOCK_SUFFIX: &str = ".lock";

fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    // OsString::push appends without a separator, preserving the
    // recording's own extension: "a.mp4" -> "a.mp4.idx".
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    name.into()
}

/// Synchronous single-writer MP4 recorder.
pub struct Recorder {
    ops: Arc<dyn FileOps>,
    config: RecorderConfig,
    params: Option<ParameterSets>,

    media: Option<Box<dyn FileIo>>,
    index: Option<IndexFile>,
    lock: Option<Box<dyn FileIo>>,

    media_path: PathBuf,

    recording: bool,
    frame_count: u64,
    mdat_start: u64,
    mdat_size: u64,

    video: Vec<SampleRecord>,
    audio: Vec<SampleRecord>,

    last_flush: Instant,
    frames_since_flush: u32,
}

impl Recorder {
    pub fn new() -> Self {
        Self::with_file_ops(Arc::new(StdFileOps))
    }

    /// Build a recorder over a custom filesystem implementation.
    pub fn with_file_ops(ops: Arc<dyn FileOps>) -> Self {
        Self {
            ops,
            config: RecorderConfig::default(),
            params: None,
            media: None,
            index: None,
            lock: None,
            media_path: PathBuf::new(),
            recording: false,
            frame_count: 0,
            mdat_start: 0,
            mdat_size: 0,
            video: Vec::new(),
            audio: Vec::new(),
            last_flush: Instant::now(),
            frames_since_flush: 0,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Samples written since `start`, across both tracks.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// True iff `path` has both sidecars of an interrupted recording.
    pub fn has_incomplete_recording(path: &Path) -> bool {
        let ops = StdFileOps;
        ops.exists(&sidecar_path(path, INDEX_SUFFIX))
            && ops.exists(&sidecar_path(path, LOCK_SUFFIX))
    }

    /// Provide the H.264 SPS/PPS for the `avcC` box. Annex-B start codes
    /// are stripped. Without this, finalization falls back to placeholder
    /// parameter sets (recovery instead scans the payload for them).
    pub fn set_h264_config(&mut self, sps: &[u8], pps: &[u8]) -> Result<()> {
        self.params = Some(ParameterSets::from_stream(sps, pps)?);
        Ok(())
    }

    /// Create the three files and begin recording.
    pub fn start(&mut self, path: &Path, config: RecorderConfig) -> Result<()> {
        if self.recording {
            return Err(Mp4RecError::AlreadyRecording);
        }

        self.media_path = path.to_path_buf();
        self.config = config;

        let mut media = self.ops.open(path, OpenMode::Write)?;
        media.write_all(&FTYP)?;
        // mdat with a zero size field reads as "until EOF", which is legal
        // while the payload is still growing; stop/recover patch it.
        media.write_all(&[0, 0, 0, 0, b'm', b'd', b'a', b't'])?;
        self.mdat_start = media.stream_position()?;
        debug_assert_eq!(self.mdat_start, MDAT_START);
        self.mdat_size = 0;
        self.media = Some(media);

        let mut index = IndexFile::create(self.ops.clone(), &sidecar_path(path, INDEX_SUFFIX))?;
        index.write_config(&self.config)?;
        self.index = Some(index);

        let mut lock = self
            .ops
            .open(&sidecar_path(path, LOCK_SUFFIX), OpenMode::Write)?;
        lock.write_all(LOCK_SENTINEL)?;
        lock.flush()?;
        self.lock = Some(lock);

        self.recording = true;
        self.frame_count = 0;
        self.video.clear();
        self.audio.clear();
        self.last_flush = Instant::now();
        self.frames_since_flush = 0;

        log::info!("recording started: {}", path.display());
        Ok(())
    }

    /// Append one video sample. `pts` is in the video timescale.
    pub fn write_video(&mut self, data: &[u8], pts: i64, keyframe: bool) -> Result<()> {
        if !self.recording {
            return Err(Mp4RecError::NotRecording);
        }
        let record = SampleRecord {
            offset: self.mdat_size,
            size: sample_size(data)?,
            pts,
            dts: pts,
            keyframe,
            track: TrackKind::Video,
        };
        self.write_sample(data, record)
    }

    /// Append one audio sample. `pts` is in the audio timescale.
    pub fn write_audio(&mut self, data: &[u8], pts: i64) -> Result<()> {
        if !self.recording {
            return Err(Mp4RecError::NotRecording);
        }
        let record = SampleRecord {
            offset: self.mdat_size,
            size: sample_size(data)?,
            pts,
            dts: pts,
            keyframe: true,
            track: TrackKind::Audio,
        };
        self.write_sample(data, record)
    }

    fn write_sample(&mut self, data: &[u8], record: SampleRecord) -> Result<()> {
        let media = self
            .media
            .as_mut()
            .ok_or(Mp4RecError::NotRecording)?;
        // Payload first, record second: the index entry must never be
        // durable before the bytes it points at.
        media.write_all(data)?;
        self.index
            .as_mut()
            .ok_or(Mp4RecError::NotRecording)?
            .append(&record)?;

        match record.track {
            TrackKind::Video => self.video.push(record),
            TrackKind::Audio => self.audio.push(record),
        }
        self.mdat_size += u64::from(record.size);
        self.frame_count += 1;
        self.frames_since_flush += 1;

        self.flush_if_needed()
    }

    fn flush_if_needed(&mut self) -> Result<()> {
        let elapsed_ms = self.last_flush.elapsed().as_millis() as u64;
        if elapsed_ms < u64::from(self.config.flush_interval_ms)
            && self.frames_since_flush < self.config.flush_frame_count
        {
            return Ok(());
        }

        // Media before index, flush before sync: an index record may only
        // become durable after the payload bytes it references.
        let media = self.media.as_mut().ok_or(Mp4RecError::NotRecording)?;
        media.flush()?;
        media.sync()?;
        let index = self.index.as_mut().ok_or(Mp4RecError::NotRecording)?;
        index.flush()?;
        index.sync()?;

        self.last_flush = Instant::now();
        self.frames_since_flush = 0;
        Ok(())
    }

    /// Finalize the recording: patch the `mdat` size, append `moov`, and
    /// remove the sidecars.
    pub fn stop(&mut self) -> Result<()> {
        if !self.recording {
            return Err(Mp4RecError::NotRecording);
        }
        self.recording = false;

        if let Some(mut media) = self.media.take() {
            media.flush()?;
            let mdat_total = 8 + self.mdat_size;
            if mdat_total > u64::from(u32::MAX) {
                return Err(Mp4RecError::OffsetOverflow { offset: mdat_total });
            }
            media.seek(SeekFrom::Start(self.mdat_start - 8))?;
            media.write_all(&(mdat_total as u32).to_be_bytes())?;
            media.flush()?;
        }

        let params = self.finalize_params();
        let moov_data = moov::build_moov(
            &self.video,
            &self.audio,
            &self.config,
            &params,
            self.mdat_start,
        )?;
        self.append_moov(&moov_data)?;

        if let Some(mut index) = self.index.take() {
            index.close();
        }
        drop(self.lock.take());
        self.remove_sidecars();

        log::info!(
            "recording stopped: {} ({} samples, {} payload bytes)",
            self.media_path.display(),
            self.frame_count,
            self.mdat_size
        );
        Ok(())
    }

    fn finalize_params(&self) -> ParameterSets {
        match &self.params {
            Some(params) => params.clone(),
            None => {
                if !self.video.is_empty() {
                    log::warn!(
                        "{}: no SPS/PPS were provided; using fallback parameter sets",
                        self.media_path.display()
                    );
                }
                ParameterSets::fallback()
            }
        }
    }

    fn append_moov(&self, moov_data: &[u8]) -> Result<()> {
        let mut media = self.ops.open(&self.media_path, OpenMode::Append)?;
        media.write_all(moov_data)?;
        media.flush()?;
        media.sync()?;
        Ok(())
    }

    fn remove_sidecars(&self) {
        for suffix in [INDEX_SUFFIX, LOCK_SUFFIX] {
            let sidecar = sidecar_path(&self.media_path, suffix);
            if let Err(err) = self.ops.remove(&sidecar) {
                log::warn!("failed to remove {}: {}", sidecar.display(), err);
            }
        }
    }

    /// Rebuild a playable file from an interrupted recording at `path`.
    ///
    /// Reads the sample index (tolerating a torn trailing record), patches
    /// the `mdat` size to cover everything already on disk, extracts
    /// SPS/PPS from the payload, appends a fresh `moov`, and removes the
    /// sidecars. The media file is not touched unless the index is valid.
    pub fn recover(&mut self, path: &Path) -> Result<()> {
        if self.recording {
            return Err(Mp4RecError::AlreadyRecording);
        }
        log::info!("recovering incomplete recording: {}", path.display());

        let index_path = sidecar_path(path, INDEX_SUFFIX);
        let lock_path = sidecar_path(path, LOCK_SUFFIX);

        let mut index = IndexFile::open(self.ops.clone(), &index_path)?;
        let config = index.read_config()?;
        let (video, audio) = index.read_all()?;
        index.close();
        log::info!(
            "index read: {} video and {} audio records",
            video.len(),
            audio.len()
        );

        let file_size = self.ops.size(path)?;
        if file_size < MDAT_START {
            return Err(Mp4RecError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "media file too short to contain ftyp and mdat headers",
            )));
        }

        // Everything after ftyp belongs to mdat until moov is appended.
        let mdat_total = file_size - 32;
        if mdat_total > u64::from(u32::MAX) {
            return Err(Mp4RecError::OffsetOverflow { offset: mdat_total });
        }
        let mut media = self.ops.open(path, OpenMode::ReadWrite)?;
        media.seek(SeekFrom::Start(32))?;
        media.write_all(&(mdat_total as u32).to_be_bytes())?;
        media.flush()?;
        drop(media);

        let params = if video.is_empty() {
            ParameterSets::fallback()
        } else {
            match avc::extract_from_media(&self.ops, path, MDAT_START, &video) {
                Some(params) => params,
                None => {
                    log::warn!(
                        "{}: no SPS/PPS found in payload; using fallback parameter sets",
                        path.display()
                    );
                    ParameterSets::fallback()
                }
            }
        };

        let moov_data = moov::build_moov(&video, &audio, &config, &params, MDAT_START)?;
        let mut media = self.ops.open(path, OpenMode::Append)?;
        media.write_all(&moov_data)?;
        media.flush()?;
        media.sync()?;
        drop(media);

        for sidecar in [index_path, lock_path] {
            if let Err(err) = self.ops.remove(&sidecar) {
                log::warn!("failed to remove {}: {}", sidecar.display(), err);
            }
        }

        log::info!("recovery complete: {}", path.display());
        Ok(())
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

fn sample_size(data: &[u8]) -> Result<u32> {
    u32::try_from(data.len()).map_err(|_| Mp4RecError::OffsetOverflow {
        offset: data.len() as u64,
    })
}
