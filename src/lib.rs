//! # dioread
//!
//! Arbitrary-size, arbitrary-offset reads over files opened with Linux
//! direct I/O.
//!
//! ## Overview
//!
//! A file opened with `O_DIRECT` bypasses the kernel page cache, and in
//! exchange the OS only accepts transfers whose buffer address, length,
//! and file offset are multiples of the transfer granularity of the
//! backing device. `dioread` hides that restriction behind a byte-granular
//! reader: [`CacheReader`] stages every device transfer through one
//! alignment-conforming buffer and decomposes each request into a minimal
//! number of full-buffer transfers, so callers read whatever sizes and
//! offsets they like.
//!
//! ## Features
//!
//! - Query the device's direct-I/O alignment via `statx`
//!   (`STATX_DIOALIGN`), with a page-size fallback
//! - One aligned cache buffer per reader, at least 4 MiB, every device
//!   transfer full-length
//! - Copying reads of any size plus a zero-copy span accessor for
//!   parse-in-place consumers
//! - Logical seek and tell that account for cached, undelivered bytes
//! - [`DirectFile`] for callers that want the raw unbuffered handle
//!
//! ## Example
//!
//! ```no_run
//! use dioread::CacheReader;
//! use std::path::Path;
//!
//! let mut reader = CacheReader::new();
//! reader.open(Path::new("/var/data/events.bin")).unwrap();
//!
//! let mut buf = vec![0u8; 5_000_000];
//! let n = reader.read_bin(&mut buf).unwrap();
//! println!("read {} bytes, alignment {}", n, reader.alignment());
//! ```
//!
//! ## Filesystem support
//!
//! Some filesystems refuse `O_DIRECT` opens (tmpfs most notably); that
//! surfaces as [`ReadError::CannotOpen`]. Readers are single-threaded and
//! not shareable; use one reader per thread.

mod buffer;
mod direct;
mod error;
mod reader;

pub use buffer::AlignedBuf;
pub use direct::{device_alignment, DirectFile};
pub use error::{ReadError, Result};
pub use reader::{CacheReader, ReadSeek, MIN_CACHE_SIZE};
