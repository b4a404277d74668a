//! Alignment-conforming heap allocation for direct-I/O transfers.

use std::fmt;
use std::io;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

/// A heap allocation whose address satisfies a direct-I/O alignment.
///
/// The kernel rejects `O_DIRECT` transfers whose destination address is not
/// a multiple of the device's transfer granularity, and a plain `Vec<u8>`
/// gives no such guarantee. The block is obtained from `posix_memalign`,
/// zeroed once so every byte is initialized, and freed on drop.
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    len: usize,
    align: usize,
}

// The allocation is uniquely owned and has no interior mutability.
unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

impl AlignedBuf {
    /// Allocate `len` bytes aligned to `align`.
    ///
    /// `align` must be a power of two and a multiple of the pointer size
    /// (every real sector or page size is both). `len` must be nonzero.
    pub fn new(len: usize, align: usize) -> io::Result<Self> {
        if len == 0 || !align.is_power_of_two() || align % std::mem::size_of::<*const u8>() != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid aligned allocation: len={len} align={align}"),
            ));
        }

        let mut raw: *mut libc::c_void = std::ptr::null_mut();
        // SAFETY: `raw` is a valid out-pointer and the arguments were
        // validated above.
        let rc = unsafe { libc::posix_memalign(&mut raw, align, len) };
        if rc != 0 || raw.is_null() {
            return Err(io::Error::from_raw_os_error(rc));
        }
        // SAFETY: posix_memalign returned a unique block of `len` bytes.
        unsafe { std::ptr::write_bytes(raw.cast::<u8>(), 0, len) };
        // SAFETY: checked non-null above.
        let ptr = unsafe { NonNull::new_unchecked(raw.cast::<u8>()) };
        Ok(Self { ptr, len, align })
    }

    /// Size of the allocation in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; allocations are nonzero by construction.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Alignment the address conforms to.
    pub fn alignment(&self) -> usize {
        self.align
    }

    /// The full allocation as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: we own `len` initialized bytes at `ptr`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The full allocation as a mutable byte slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: we own `len` initialized bytes at `ptr`.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from posix_memalign and is freed exactly once.
        unsafe { libc::free(self.ptr.as_ptr().cast()) }
    }
}

impl Deref for AlignedBuf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl DerefMut for AlignedBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}

impl fmt::Debug for AlignedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuf")
            .field("len", &self.len)
            .field("align", &self.align)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_is_aligned() {
        for align in [512usize, 4096, 8192] {
            let buf = AlignedBuf::new(align * 3, align).unwrap();
            assert_eq!(buf.as_slice().as_ptr() as usize % align, 0);
            assert_eq!(buf.len(), align * 3);
            assert_eq!(buf.alignment(), align);
        }
    }

    #[test]
    fn test_starts_zeroed_and_is_writable() {
        let mut buf = AlignedBuf::new(4096, 512).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        buf.as_mut_slice()[100] = 0xAB;
        assert_eq!(buf[100], 0xAB);
    }

    #[test]
    fn test_rejects_bad_arguments() {
        assert!(AlignedBuf::new(0, 512).is_err());
        assert!(AlignedBuf::new(4096, 0).is_err());
        assert!(AlignedBuf::new(4096, 1000).is_err());
    }
}
