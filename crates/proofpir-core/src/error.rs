//! Error types shared across the dataset builder.
//!
//! The builder is a one-shot batch job: every variant here is fatal and the
//! run restarts from scratch. There is no recoverable-error path.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A key that must have been written earlier in the same pass is absent.
    #[error("missing key {0}")]
    MissingKey(String),

    #[error("no fragment stored for id {0}")]
    MissingFragment(u64),

    #[error("no proof ids stored for key {0}")]
    MissingProofIds(String),

    #[error("payload of {len} bytes exceeds table capacity {capacity}")]
    PayloadTooLarge { len: usize, capacity: usize },

    #[error("record padding of {padding} bytes does not fit in 16 bits")]
    PaddingOverflow { padding: usize },

    #[error("bucket id {0} has no backing table")]
    BucketOutOfRange(u8),

    #[error(
        "account needs more than {n_buckets} distinct buckets ({proof_len} non-tree-top fragments)"
    )]
    BucketsExhausted { proof_len: usize, n_buckets: usize },

    #[error("buffer too small: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
