use thiserror::Error;

#[derive(Error, Debug)]
pub enum Mp4RecError {
    #[error("already recording")]
    AlreadyRecording,

    #[error("not recording")]
    NotRecording,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt index: {context} (magic 0x{magic:08X})")]
    CorruptIndex { context: &'static str, magic: u32 },

    #[error("offset 0x{offset:X} does not fit in a 32-bit box field")]
    OffsetOverflow { offset: u64 },

    #[error("invalid H.264 parameter set: {context}")]
    InvalidParameterSet { context: &'static str },
}

pub type Result<T> = std::result::Result<T, Mp4RecError>;
