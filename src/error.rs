use std::fmt::Display;

/// A specialized error type for BinPickle operations.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum BinPickleError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The file header or trailer bytes are invalid.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    /// The file is a BinPickle file, but its version is not supported.
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),
    /// The index failed its digest check or could not be decoded.
    #[error("corrupt index: {0}")]
    CorruptIndex(String),
    /// A stored buffer failed its digest check.
    #[error("corrupt buffer {index}: {detail}")]
    CorruptBuffer { index: usize, detail: String },
    /// A codec id is absent from the registry.
    #[error("unknown codec: {0}")]
    UnknownCodec(String),
    /// A codec chain produced a different length than the index declares.
    #[error("decode mismatch: expected {expected} bytes, produced {actual}")]
    DecodeMismatch { expected: u64, actual: u64 },
    /// A codec reported failure while encoding or decoding.
    #[error("codec error: {0}")]
    CodecError(String),
    /// Reader close attempted while mapped views are outstanding.
    #[error("{live} mapped buffer(s) still live")]
    BuffersStillLive { live: usize },
    /// The writer is in its terminal failed state.
    #[error("writer is in failed state")]
    WriterFailed,
    /// The requested buffer index does not exist.
    #[error("no buffer at index {0}")]
    NoSuchBuffer(usize),
    /// Invalid state transition or operation.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Index serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BinPickleError {
    /// Create a malformed-frame error from a displayable value.
    pub fn malformed<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::MalformedFrame(msg.to_string())
    }

    /// Create a corrupt-index error from a displayable value.
    pub fn corrupt_index<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::CorruptIndex(msg.to_string())
    }

    /// Create a corrupt-buffer error naming the offending entry.
    pub fn corrupt_buffer<T>(index: usize, detail: T) -> Self
    where
        T: Display,
    {
        Self::CorruptBuffer {
            index,
            detail: detail.to_string(),
        }
    }

    /// Create a codec error from a displayable value.
    pub fn codec<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::CodecError(msg.to_string())
    }

    /// Create an invalid-state error from a displayable value.
    pub fn invalid_state<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::InvalidState(msg.to_string())
    }

    /// Create a serialization error from a displayable value.
    pub fn serialization<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::Serialization(msg.to_string())
    }
}

/// A Result type alias for BinPickle operations.
pub type BinPickleResult<T> = Result<T, BinPickleError>;
