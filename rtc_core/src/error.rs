use std::io;

use thiserror::Error;

/// Errors surfaced by the RTC1 block engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Seek/read/write/truncate failure on the backing file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A codec failed to encode or decode one block.
    #[error("codec failed on block {block}: {source}")]
    Codec {
        block: u64,
        #[source]
        source: anyhow::Error,
    },

    /// An earlier write failure poisoned the dataset; no further I/O is attempted.
    #[error("dataset poisoned by an earlier write failure: {0}")]
    Poisoned(String),

    #[error("block {id} out of range (total {count})")]
    BlockOutOfRange { id: u64, count: u64 },

    #[error("buffer of {got} bytes does not match block size {expected}")]
    BufferSize { expected: usize, got: usize },

    #[error("block {block} checksum mismatch: expected {expected:016x}, got {actual:016x}")]
    Checksum { block: u64, expected: u64, actual: u64 },

    /// Malformed header, index, or layout description.
    #[error("invalid RTC1 file: {0}")]
    Format(String),

    #[error("invalid option {key}={value}: {reason}")]
    InvalidOption {
        key: String,
        value: String,
        reason: String,
    },

    #[error("compression pool error: {0}")]
    Pool(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }
}
