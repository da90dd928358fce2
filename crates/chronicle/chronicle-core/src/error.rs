//! The closed error taxonomy surfaced to callers across queue, tailer and
//! appender operations.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChronicleError {
    #[error("queue directory {0:?} does not exist and creation was not requested")]
    DirectoryMissing(PathBuf),

    #[error("failed to create or open cycle file {path:?}")]
    CycleFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to map {path:?}")]
    Mmap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("directory-listing file is corrupt or has an unrecognized layout")]
    CorruptDirectoryListing,

    #[error("cycle file {0:?} is corrupt: a record header had an invalid state")]
    CorruptCycleFile(PathBuf),

    #[error("unsupported queue version {0}")]
    UnsupportedVersion(u32),

    #[error("unknown roll scheme {0:?}")]
    UnknownRollScheme(String),

    #[error("wire codec error")]
    Wire(#[from] chronicle_wire::WireError),

    #[error("encoder reported a size that did not match the bytes it wrote")]
    EncoderSizeMismatch,

    #[error("append payload exceeds the maximum record size")]
    PayloadTooLarge,

    #[error("queue was already closed")]
    AlreadyClosed,

    #[error("operation timed out waiting on a contended record header")]
    ContentionTimeout,
}

pub type Result<T> = std::result::Result<T, ChronicleError>;
