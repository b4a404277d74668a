//! Raw unbuffered file access and alignment discovery.
//!
//! [`DirectFile`] is the leaf of the stack: it owns the `O_DIRECT` handle
//! and forwards single read and seek calls to the OS with no size or
//! alignment correction. The aligned staging is the job of
//! [`CacheReader`](crate::CacheReader) one layer up.

use crate::error::{ReadError, Result};

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Unbuffered reader over a file opened with `O_DIRECT`.
///
/// Every read is handed to the OS as-is. The kernel rejects transfers whose
/// buffer address, length, or file offset violate the device's transfer
/// granularity, so callers are expected to stage reads through an aligned
/// buffer. Short reads are not retried; a zero-byte result marks
/// end-of-file.
#[derive(Debug, Default)]
pub struct DirectFile {
    file: Option<File>,
    eof: bool,
}

impl DirectFile {
    /// Create a closed reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `path` for unbuffered reading.
    ///
    /// Fails with [`ReadError::AlreadyOpen`] if a handle is already held,
    /// leaving that handle and its position untouched, and with
    /// [`ReadError::CannotOpen`] if the OS refuses the open.
    pub fn open(&mut self, path: &Path) -> Result<()> {
        if self.file.is_some() {
            return Err(ReadError::AlreadyOpen {
                path: path.to_path_buf(),
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECT)
            .open(path)
            .map_err(|source| ReadError::CannotOpen {
                path: path.to_path_buf(),
                source,
            })?;

        log::debug!("opened '{}' with O_DIRECT", path.display());
        self.file = Some(file);
        self.eof = false;
        Ok(())
    }

    /// Release the handle. No-op if not open.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            self.eof = false;
        }
    }

    /// True while a handle is held.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// True iff the most recent read transferred zero bytes.
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// Issue exactly one OS read for at most `buf.len()` bytes.
    ///
    /// Returns the count actually transferred, which may be less than
    /// requested, including 0 at end-of-file.
    pub fn read_bin(&mut self, buf: &mut [u8]) -> Result<usize> {
        let file = self.file.as_mut().ok_or(ReadError::NotOpen)?;
        let n = file.read(buf)?;
        self.eof = n == 0;
        Ok(n)
    }

    /// Reposition the handle and return the resulting absolute offset.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let file = self.file.as_mut().ok_or(ReadError::NotOpen)?;
        Ok(file.seek(pos)?)
    }

    /// Current absolute offset.
    pub fn tell(&mut self) -> Result<u64> {
        let file = self.file.as_mut().ok_or(ReadError::NotOpen)?;
        Ok(file.stream_position()?)
    }

    /// File size, computed by seeking to the end and back.
    ///
    /// Not reentrant with other positioning calls on the same instance.
    pub fn size(&mut self) -> Result<u64> {
        let saved = self.tell()?;
        let len = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(saved))?;
        Ok(len)
    }
}

/// Minimum direct-I/O transfer granularity for the device backing `path`.
///
/// Queried via `statx` with `STATX_DIOALIGN`. When the kernel or the
/// filesystem cannot answer, the OS page size is returned instead: sectors
/// are 512 or 4096 bytes on common hardware while pages are at least 4096,
/// so the page size is a safe, larger bound. The result is a power of two.
pub fn device_alignment(path: &Path) -> usize {
    match dio_alignment(path) {
        Some(align) => align,
        None => {
            let page = page_size();
            log::debug!(
                "no direct-I/O alignment reported for '{}', using page size {}",
                path.display(),
                page
            );
            page
        }
    }
}

fn dio_alignment(path: &Path) -> Option<usize> {
    use std::os::unix::ffi::OsStrExt;

    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes()).ok()?;
    // SAFETY: zero is a valid initial state for statx and the out-pointer
    // below is valid for the call.
    let mut stx = unsafe { std::mem::zeroed::<libc::statx>() };
    // SAFETY: `cpath` is a valid NUL-terminated string.
    let rc = unsafe {
        libc::statx(
            libc::AT_FDCWD,
            cpath.as_ptr(),
            0,
            libc::STATX_DIOALIGN,
            &mut stx,
        )
    };
    if rc != 0 || (stx.stx_mask & libc::STATX_DIOALIGN) == 0 {
        return None;
    }

    // Offset and buffer-address constraints can differ; the stricter of
    // the two satisfies both.
    let align = stx.stx_dio_offset_align.max(stx.stx_dio_mem_align) as usize;
    if align == 0 || !align.is_power_of_two() {
        return None;
    }
    Some(align)
}

pub(crate) fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page > 0 {
        page as usize
    } else {
        4096
    }
}
