//! Error types for direct-I/O cached reads.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by [`DirectFile`](crate::DirectFile) and
/// [`CacheReader`](crate::CacheReader).
///
/// End-of-file is not an error: reads signal it by returning fewer bytes
/// than requested, down to zero.
#[derive(Debug, Error)]
pub enum ReadError {
    /// `open` was called while a file handle is already held.
    #[error("a file is already open, cannot open '{}'", .path.display())]
    AlreadyOpen {
        /// Path of the rejected open call.
        path: PathBuf,
    },

    /// The OS refused to open the file.
    ///
    /// Raised for missing files, permission problems, and filesystems that
    /// do not support `O_DIRECT`.
    #[error("cannot open file '{}': {source}", .path.display())]
    CannotOpen {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying OS error.
        source: io::Error,
    },

    /// A read, seek, or accessor was called on a closed reader.
    #[error("no file is open")]
    NotOpen,

    /// An OS-level read, seek, or allocation failure on an open reader.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ReadError>;
