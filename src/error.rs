use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Something went wrong: {0}")]
    Failed(String),
    #[error("unknown storage: {0}")]
    UnknownStorage(String),
    #[error("number of bits must be between 1 and 64, got {0}")]
    InvalidBits(usize),
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("bucket holds {len} bytes, not a multiple of the element size {element_size}")]
    CorruptBucket { len: usize, element_size: usize },
    #[error(transparent)]
    SerializationFailed(#[from] std::boxed::Box<bincode::ErrorKind>),
    #[cfg(feature = "embedded-kv")]
    #[error(transparent)]
    SqlFailure(#[from] rusqlite::Error),
    #[cfg(feature = "remote-kv")]
    #[error(transparent)]
    RedisFailure(#[from] redis::RedisError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
