//! Append-only sample index sidecar.
//!
//! On-disk layout:
//!
//! ```text
//! offset 0:   magic   u32 = 0x4D503452 ("MP4R")
//! offset 4:   packed RecorderConfig (30 bytes)
//! offset 34:  packed SampleRecord[0] (30 bytes)
//! offset 64:  packed SampleRecord[1]
//! ...
//! ```
//!
//! A crash can leave a partial record at the tail; readers treat a short
//! trailing record as clean end-of-log. That tolerance is what makes
//! index truncation always safe.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Mp4RecError, Result};
use crate::file_ops::{FileIo, FileOps, OpenMode};
use crate::sample::{RecorderConfig, SampleRecord, TrackKind};

/// Magic at offset 0 of every index file: "MP4R".
pub const INDEX_MAGIC: u32 = 0x4D50_3452;

/// Bytes before the first record: magic + packed config.
pub const INDEX_HEADER_LEN: u64 = 4 + RecorderConfig::ENCODED_LEN as u64;

pub struct IndexFile {
    file: Option<Box<dyn FileIo>>,
    path: PathBuf,
    record_count: u64,
    dirty: bool,
}

impl IndexFile {
    /// Create (truncating) an index file for writing. The file pointer is
    /// left at 0 for the header write.
    pub fn create(ops: Arc<dyn FileOps>, path: &Path) -> Result<Self> {
        let file = ops.open(path, OpenMode::Write)?;
        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
            record_count: 0,
            dirty: false,
        })
    }

    /// Open an existing index for reading. Validates the magic and derives
    /// the record count from the file size.
    pub fn open(ops: Arc<dyn FileOps>, path: &Path) -> Result<Self> {
        let size = ops.size(path)?;
        let mut file = ops.open(path, OpenMode::Read)?;

        let mut magic_raw = [0u8; 4];
        if size < 4 || file.read_exact(&mut magic_raw).is_err() {
            return Err(Mp4RecError::CorruptIndex {
                context: "file too short for magic",
                magic: 0,
            });
        }
        let magic = u32::from_ne_bytes(magic_raw);
        if magic != INDEX_MAGIC {
            return Err(Mp4RecError::CorruptIndex {
                context: "bad magic",
                magic,
            });
        }
        file.seek(SeekFrom::Start(0))?;

        let record_count =
            size.saturating_sub(INDEX_HEADER_LEN) / SampleRecord::ENCODED_LEN as u64;
        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
            record_count,
            dirty: false,
        })
    }

    fn handle(&mut self) -> Result<&mut Box<dyn FileIo>> {
        self.file.as_mut().ok_or_else(|| {
            Mp4RecError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "index file is closed",
            ))
        })
    }

    /// Write magic + config at the head of a freshly created index, then
    /// flush and sync so recovery can always rely on the header.
    pub fn write_config(&mut self, config: &RecorderConfig) -> Result<()> {
        let file = self.handle()?;
        file.write_all(&INDEX_MAGIC.to_ne_bytes())?;
        file.write_all(&config.encode())?;
        file.flush()?;
        file.sync()?;
        log::debug!("index header written: {}", self.path.display());
        Ok(())
    }

    /// Read magic + config from the file head.
    pub fn read_config(&mut self) -> Result<RecorderConfig> {
        let file = self.handle()?;
        file.seek(SeekFrom::Start(0))?;

        let mut magic_raw = [0u8; 4];
        if file.read_exact(&mut magic_raw).is_err() {
            return Err(Mp4RecError::CorruptIndex {
                context: "file too short for magic",
                magic: 0,
            });
        }
        let magic = u32::from_ne_bytes(magic_raw);
        if magic != INDEX_MAGIC {
            return Err(Mp4RecError::CorruptIndex {
                context: "bad magic",
                magic,
            });
        }

        let mut config_raw = [0u8; RecorderConfig::ENCODED_LEN];
        if file.read_exact(&mut config_raw).is_err() {
            return Err(Mp4RecError::CorruptIndex {
                context: "truncated config header",
                magic,
            });
        }
        Ok(RecorderConfig::decode(&config_raw))
    }

    /// Append one packed record.
    pub fn append(&mut self, record: &SampleRecord) -> Result<()> {
        let file = self.handle()?;
        file.write_all(&record.encode())?;
        self.record_count += 1;
        self.dirty = true;
        Ok(())
    }

    /// Read every record after the header, demultiplexed by track.
    ///
    /// Records with an unknown track id are skipped. A short trailing
    /// record ends the iteration cleanly.
    pub fn read_all(&mut self) -> Result<(Vec<SampleRecord>, Vec<SampleRecord>)> {
        let reserve = self.record_count as usize;
        let file = self.handle()?;
        file.seek(SeekFrom::Start(INDEX_HEADER_LEN))?;

        let mut video = Vec::with_capacity(reserve);
        let mut audio = Vec::with_capacity(reserve);
        let mut raw = [0u8; SampleRecord::ENCODED_LEN];
        let mut skipped = 0u64;
        while file.read_exact(&mut raw).is_ok() {
            match SampleRecord::decode(&raw) {
                Some(record) => match record.track {
                    TrackKind::Video => video.push(record),
                    TrackKind::Audio => audio.push(record),
                },
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            log::warn!(
                "{}: skipped {} record(s) with unknown track id",
                self.path.display(),
                skipped
            );
        }
        Ok((video, audio))
    }

    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.handle()?.flush()?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.handle()?.sync()?;
        self.dirty = false;
        Ok(())
    }

    /// Close the underlying file. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }
}
