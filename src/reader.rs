//! Aligned read cache over a raw direct-I/O source.
//!
//! This module provides the [`ReadSeek`] capability trait and
//! [`CacheReader`], which turns arbitrary-size, arbitrary-offset read
//! requests into whole-buffer aligned transfers against the underlying
//! device.

use crate::buffer::AlignedBuf;
use crate::direct::{device_alignment, DirectFile};
use crate::error::{ReadError, Result};

use std::io::{self, SeekFrom};
use std::path::Path;

/// Smallest cache the reader will allocate. The actual size is rounded up
/// to the next multiple of the device's alignment granularity.
pub const MIN_CACHE_SIZE: usize = 4 << 20;

/// Abstract blocking read/seek capability.
///
/// Implemented by [`DirectFile`] and by [`CacheReader`] itself, so
/// byte-stream consumers can be written against the capability rather than
/// a concrete transport, and tests can substitute an in-memory source.
pub trait ReadSeek {
    /// Read at most `buf.len()` bytes into `buf`, returning the count
    /// transferred. Zero means end-of-file.
    fn read_bin(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Reposition the stream, returning the resulting absolute offset.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;
}

impl ReadSeek for DirectFile {
    fn read_bin(&mut self, buf: &mut [u8]) -> Result<usize> {
        DirectFile::read_bin(self, buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        DirectFile::seek(self, pos)
    }
}

/// Byte-granular reader over a source that only accepts aligned,
/// fixed-size transfers.
///
/// The reader owns one alignment-conforming buffer of
/// [`cache_size`](CacheReader::cache_size) bytes. Every device transfer
/// reads into that buffer at full length; arbitrary requests are served by
/// copying out of it, and requests larger than the buffer stream whole
/// transfers through it. Undelivered bytes persist across calls, so the
/// consumer-visible position runs behind the device cursor.
///
/// Instances are independent and single-threaded; `&mut self` on every
/// operation rules out concurrent use at compile time.
///
/// # Example
///
/// ```no_run
/// use dioread::CacheReader;
/// use std::io::SeekFrom;
/// use std::path::Path;
///
/// let mut reader = CacheReader::new();
/// reader.open(Path::new("/var/data/events.bin")).unwrap();
/// reader.seek(SeekFrom::Start(4096)).unwrap();
///
/// let mut buf = vec![0u8; 10_000];
/// let n = reader.read_bin(&mut buf).unwrap();
/// println!("read {n} bytes at offset 4096");
/// ```
#[derive(Debug)]
pub struct CacheReader<R = DirectFile> {
    raw: R,
    cache: Option<AlignedBuf>,
    align: usize,
    curr: usize,
    end: usize,
    eof: bool,
}

impl CacheReader<DirectFile> {
    /// Create a closed reader backed by a [`DirectFile`].
    pub fn new() -> Self {
        Self {
            raw: DirectFile::new(),
            cache: None,
            align: 0,
            curr: 0,
            end: 0,
            eof: false,
        }
    }

    /// Open `path`, discover the device alignment, and allocate the cache.
    ///
    /// Acquisition is all-or-nothing: on any failure the raw handle is
    /// released again and the reader stays fully closed.
    pub fn open(&mut self, path: &Path) -> Result<()> {
        self.raw.open(path)?;

        let align = device_alignment(path);
        let size = MIN_CACHE_SIZE.next_multiple_of(align);
        match AlignedBuf::new(size, align) {
            Ok(cache) => {
                log::debug!(
                    "cache for '{}': {} bytes aligned to {}",
                    path.display(),
                    size,
                    align
                );
                self.cache = Some(cache);
                self.align = align;
                self.curr = 0;
                self.end = 0;
                self.eof = false;
                Ok(())
            }
            Err(source) => {
                self.raw.close();
                Err(source.into())
            }
        }
    }

    /// Close the raw handle and free the cache. No-op if not open.
    pub fn close(&mut self) {
        self.raw.close();
        self.cache = None;
        self.align = 0;
        self.curr = 0;
        self.end = 0;
        self.eof = false;
    }
}

impl Default for CacheReader<DirectFile> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ReadSeek> CacheReader<R> {
    /// Wrap an already-positioned transport with an explicit alignment.
    ///
    /// This is the substitution point for non-file transports; `open` is
    /// the usual entry for files. `align` must be a power of two.
    pub fn from_raw(raw: R, align: usize) -> Result<Self> {
        if !align.is_power_of_two() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("alignment {align} is not a power of two"),
            )
            .into());
        }
        let size = MIN_CACHE_SIZE.next_multiple_of(align);
        let cache = AlignedBuf::new(size, align)?;
        Ok(Self {
            raw,
            cache: Some(cache),
            align,
            curr: 0,
            end: 0,
            eof: false,
        })
    }

    /// True while the reader holds its cache (and, for files, the handle).
    pub fn is_open(&self) -> bool {
        self.cache.is_some()
    }

    /// True iff the most recent device transfer returned zero bytes.
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// Alignment granularity discovered at open time. 0 when closed.
    pub fn alignment(&self) -> usize {
        self.align
    }

    /// Size of the cache buffer and of every device transfer. 0 when
    /// closed.
    pub fn cache_size(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.len())
    }

    /// Read up to `dst.len()` bytes, refilling the cache as needed.
    ///
    /// Requests smaller than the cache are served from it, with at most
    /// one device transfer. Requests of at least one cache size drain the
    /// window, stream whole transfers through the cache into `dst`, then
    /// refill once more so the remainder and its leftover stay cached.
    ///
    /// Returns the bytes delivered; fewer than requested only at
    /// end-of-file. A short or zero device transfer is never retried.
    pub fn read_bin(&mut self, dst: &mut [u8]) -> Result<usize> {
        let Some(cache) = self.cache.as_mut() else {
            return Err(ReadError::NotOpen);
        };
        let cache_size = cache.len();
        let size = dst.len();
        let avail = self.end - self.curr;

        if size >= cache_size {
            dst[..avail].copy_from_slice(&cache.as_slice()[self.curr..self.end]);
            self.curr = self.end;
            let mut delivered = avail;

            let whole = (size - avail) / cache_size;
            let rem = (size - avail) % cache_size;

            for _ in 0..whole {
                let batch = self.raw.read_bin(cache.as_mut_slice())?;
                self.eof = batch == 0;
                if batch == 0 {
                    return Ok(delivered);
                }
                dst[delivered..delivered + batch].copy_from_slice(&cache.as_slice()[..batch]);
                delivered += batch;
            }

            let batch = self.raw.read_bin(cache.as_mut_slice())?;
            self.eof = batch == 0;
            let lastbit = batch.min(rem);
            dst[delivered..delivered + lastbit].copy_from_slice(&cache.as_slice()[..lastbit]);
            delivered += lastbit;
            self.curr = lastbit;
            self.end = batch;
            Ok(delivered)
        } else if avail >= size {
            dst.copy_from_slice(&cache.as_slice()[self.curr..self.curr + size]);
            self.curr += size;
            Ok(size)
        } else {
            // avail < size < cache_size: one transfer covers the rest
            dst[..avail].copy_from_slice(&cache.as_slice()[self.curr..self.end]);
            let batch = self.raw.read_bin(cache.as_mut_slice())?;
            self.eof = batch == 0;
            let lastbit = batch.min(size - avail);
            dst[avail..avail + lastbit].copy_from_slice(&cache.as_slice()[..lastbit]);
            self.curr = lastbit;
            self.end = batch;
            Ok(avail + lastbit)
        }
    }

    /// Zero-copy accessor: a span directly into the cache of up to `size`
    /// valid bytes, advancing the cursor by `size`.
    ///
    /// If the advance reaches the end of the valid window, exactly one
    /// whole-buffer refill happens first and the span starts at the buffer
    /// start. The span is shorter than `size` only at end-of-file.
    /// Advancing by exactly the span lengths walks the file in order; a
    /// caller that advances past bytes it was never handed skips them.
    pub fn push_cache(&mut self, size: usize) -> Result<&[u8]> {
        let Some(cache) = self.cache.as_mut() else {
            return Err(ReadError::NotOpen);
        };

        let advanced = self.curr.saturating_add(size);
        if advanced >= self.end {
            let batch = self.raw.read_bin(cache.as_mut_slice())?;
            self.eof = batch == 0;
            let valid = batch.min(size);
            self.curr = valid;
            self.end = batch;
            Ok(&cache.as_slice()[..valid])
        } else {
            let start = self.curr;
            self.curr = advanced;
            Ok(&cache.as_slice()[start..advanced])
        }
    }

    /// Consumer-visible file offset.
    ///
    /// The device cursor sits ahead of the consumer by the cached bytes
    /// not yet delivered.
    pub fn tell(&mut self) -> Result<u64> {
        if self.cache.is_none() {
            return Err(ReadError::NotOpen);
        }
        let device = self.raw.seek(SeekFrom::Current(0))?;
        Ok(device - (self.end - self.curr) as u64)
    }

    /// Reposition the logical cursor.
    ///
    /// A relative move that stays inside the valid window only adjusts the
    /// cursor and touches no device state. Any other move invalidates the
    /// window and seeks the device to the absolute logical target.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        if self.cache.is_none() {
            return Err(ReadError::NotOpen);
        }

        if let SeekFrom::Current(delta) = pos {
            let moved = self.curr as i64 + delta;
            if moved >= 0 && (moved as u64) < self.end as u64 {
                self.curr = moved as usize;
                return self.tell();
            }

            let target = self.tell()? as i64 + delta;
            if target < 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "seek to a negative offset",
                )
                .into());
            }
            self.curr = 0;
            self.end = 0;
            return self.raw.seek(SeekFrom::Start(target as u64));
        }

        self.curr = 0;
        self.end = 0;
        self.raw.seek(pos)
    }
}

impl<R: ReadSeek> ReadSeek for CacheReader<R> {
    fn read_bin(&mut self, buf: &mut [u8]) -> Result<usize> {
        CacheReader::read_bin(self, buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        CacheReader::seek(self, pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory transport honoring the device contract: single-shot
    /// reads, absolute repositioning, short reads at the end of the data.
    struct MemReader {
        data: Vec<u8>,
        pos: usize,
    }

    impl MemReader {
        fn new(data: Vec<u8>) -> Self {
            Self { data, pos: 0 }
        }
    }

    impl ReadSeek for MemReader {
        fn read_bin(&mut self, buf: &mut [u8]) -> Result<usize> {
            let n = buf.len().min(self.data.len().saturating_sub(self.pos));
            if n > 0 {
                buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
                self.pos += n;
            }
            Ok(n)
        }

        fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
            let target = match pos {
                SeekFrom::Start(n) => n as i64,
                SeekFrom::Current(delta) => self.pos as i64 + delta,
                SeekFrom::End(delta) => self.data.len() as i64 + delta,
            };
            if target < 0 {
                return Err(
                    io::Error::new(io::ErrorKind::InvalidInput, "negative seek").into()
                );
            }
            self.pos = target as usize;
            Ok(target as u64)
        }
    }

    fn patterned(len: usize) -> Vec<u8> {
        let mut state = 0x2545f4914f6cdd1du64;
        (0..len)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                (state >> 33) as u8
            })
            .collect()
    }

    fn mem_reader(data: &[u8], align: usize) -> CacheReader<MemReader> {
        CacheReader::from_raw(MemReader::new(data.to_vec()), align).unwrap()
    }

    fn read_all(reader: &mut CacheReader<MemReader>, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            let n = reader.read_bin(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_chunked_reads_reconstruct_small_file() {
        let data = patterned(100_037);
        for chunk in [1usize, 7, 511, 512, 4096, 99_999, 100_037, 262_144] {
            let mut reader = mem_reader(&data, 512);
            assert_eq!(read_all(&mut reader, chunk), data, "chunk={chunk}");
        }
    }

    #[test]
    fn test_chunked_reads_reconstruct_large_file() {
        let data = patterned(10 * 1024 * 1024);
        for chunk in [
            512_000usize,
            MIN_CACHE_SIZE - 1,
            MIN_CACHE_SIZE,
            MIN_CACHE_SIZE + 1,
            5_000_000,
            9_999_999,
        ] {
            let mut reader = mem_reader(&data, 512);
            assert_eq!(read_all(&mut reader, chunk), data, "chunk={chunk}");
        }
    }

    #[test]
    fn test_file_sizes_around_the_cache_boundary() {
        for len in [
            MIN_CACHE_SIZE - 1,
            MIN_CACHE_SIZE,
            MIN_CACHE_SIZE + 1,
            2 * MIN_CACHE_SIZE,
        ] {
            let data = patterned(len);
            for chunk in [MIN_CACHE_SIZE, 2_097_152, 6_000_000] {
                let mut reader = mem_reader(&data, 512);
                assert_eq!(read_all(&mut reader, chunk), data, "len={len} chunk={chunk}");
            }
        }
    }

    #[test]
    fn test_eof_is_idempotent() {
        let data = patterned(10_000);
        let mut reader = mem_reader(&data, 512);
        let mut buf = vec![0u8; 20_000];
        assert_eq!(reader.read_bin(&mut buf).unwrap(), 10_000);
        assert!(!reader.eof());

        for _ in 0..3 {
            assert_eq!(reader.read_bin(&mut buf).unwrap(), 0);
            assert!(reader.eof());
        }
    }

    #[test]
    fn test_empty_source_and_empty_request() {
        let mut reader = mem_reader(&[], 512);
        let mut buf = [0u8; 16];
        assert_eq!(reader.read_bin(&mut buf).unwrap(), 0);
        assert!(reader.eof());
        assert_eq!(reader.read_bin(&mut []).unwrap(), 0);
    }

    #[test]
    fn test_cache_geometry() {
        for align in [512usize, 4096, 16_384] {
            let reader = mem_reader(&[], align);
            assert!(reader.is_open());
            assert!(reader.alignment().is_power_of_two());
            assert!(reader.cache_size() >= MIN_CACHE_SIZE);
            assert_eq!(reader.cache_size() % reader.alignment(), 0);
        }
        assert!(CacheReader::from_raw(MemReader::new(vec![]), 1000).is_err());
    }

    #[test]
    fn test_push_cache_matches_unit_advances() {
        let data = patterned(3000);

        let mut one = mem_reader(&data, 512);
        let span = one.push_cache(100).unwrap().to_vec();
        assert_eq!(span, &data[..100]);

        let mut unit = mem_reader(&data, 512);
        let mut bytes = Vec::new();
        for _ in 0..100 {
            let s = unit.push_cache(1).unwrap();
            assert_eq!(s.len(), 1);
            bytes.extend_from_slice(s);
        }
        assert_eq!(bytes, span);
    }

    #[test]
    fn test_push_cache_drains_across_refills() {
        let data = patterned(5 * 1024 * 1024);
        let mut reader = mem_reader(&data, 512);
        let cache_size = reader.cache_size();

        let mut out = Vec::new();
        loop {
            let span = reader.push_cache(cache_size).unwrap();
            if span.is_empty() {
                break;
            }
            out.extend_from_slice(span);
        }
        assert_eq!(out, data);
        assert!(reader.eof());
    }

    #[test]
    fn test_push_cache_continues_after_copying_reads() {
        let data = patterned(10_000);
        let mut reader = mem_reader(&data, 512);
        let mut head = [0u8; 100];
        reader.read_bin(&mut head).unwrap();
        assert_eq!(&head[..], &data[..100]);

        let span = reader.push_cache(50).unwrap();
        assert_eq!(span, &data[100..150]);
    }

    #[test]
    fn test_ten_mib_scenario() {
        let data = patterned(10 * 1024 * 1024);
        let mut reader = mem_reader(&data, 512);
        assert_eq!(reader.cache_size(), 4_194_304);

        let mut first = vec![0u8; 5_000_000];
        assert_eq!(reader.read_bin(&mut first).unwrap(), 5_000_000);
        assert_eq!(first, &data[..5_000_000]);
        assert_eq!(reader.tell().unwrap(), 5_000_000);

        let mut second = vec![0u8; 5_242_880];
        assert_eq!(reader.read_bin(&mut second).unwrap(), 5_242_880);
        assert_eq!(second, &data[5_000_000..10_242_880]);

        let mut rest = vec![0u8; 1_000_000];
        assert_eq!(reader.read_bin(&mut rest).unwrap(), 242_880);
        assert_eq!(&rest[..242_880], &data[10_242_880..]);

        assert_eq!(reader.read_bin(&mut rest).unwrap(), 0);
        assert!(reader.eof());
    }

    #[test]
    fn test_seek_and_tell() {
        let data = patterned(10 * 1024 * 1024);
        let mut reader = mem_reader(&data, 512);
        assert_eq!(reader.tell().unwrap(), 0);

        let mut buf = vec![0u8; 1000];
        reader.read_bin(&mut buf).unwrap();
        assert_eq!(reader.tell().unwrap(), 1000);

        // forward within the cached window: no device traffic
        assert_eq!(reader.seek(SeekFrom::Current(500)).unwrap(), 1500);
        reader.read_bin(&mut buf).unwrap();
        assert_eq!(buf, &data[1500..2500]);

        // backward within the window re-delivers cached bytes
        assert_eq!(reader.seek(SeekFrom::Current(-2000)).unwrap(), 500);
        reader.read_bin(&mut buf).unwrap();
        assert_eq!(buf, &data[500..1500]);

        // past the window: reseek to the absolute logical target
        assert_eq!(reader.seek(SeekFrom::Current(5_000_000)).unwrap(), 5_001_500);
        reader.read_bin(&mut buf).unwrap();
        assert_eq!(buf, &data[5_001_500..5_002_500]);

        assert_eq!(reader.seek(SeekFrom::Start(12_345)).unwrap(), 12_345);
        reader.read_bin(&mut buf).unwrap();
        assert_eq!(buf, &data[12_345..13_345]);

        let len = data.len();
        assert_eq!(reader.seek(SeekFrom::End(-100)).unwrap(), len as u64 - 100);
        let n = reader.read_bin(&mut buf).unwrap();
        assert_eq!(n, 100);
        assert_eq!(&buf[..100], &data[len - 100..]);
        assert_eq!(reader.tell().unwrap(), len as u64);

        assert!(reader.seek(SeekFrom::Current(-1_000_000_000)).is_err());
    }

    #[test]
    fn test_closed_reader_reports_not_open() {
        let mut reader = CacheReader::new();
        assert!(!reader.is_open());
        assert_eq!(reader.cache_size(), 0);

        let mut buf = [0u8; 8];
        assert!(matches!(reader.read_bin(&mut buf), Err(ReadError::NotOpen)));
        assert!(matches!(reader.push_cache(8), Err(ReadError::NotOpen)));
        assert!(matches!(
            reader.seek(SeekFrom::Start(0)),
            Err(ReadError::NotOpen)
        ));
        assert!(matches!(reader.tell(), Err(ReadError::NotOpen)));
    }

    #[test]
    fn test_open_failures() {
        let mut reader = CacheReader::new();
        assert!(matches!(
            reader.open(Path::new("/nonexistent/dioread-nope.bin")),
            Err(ReadError::CannotOpen { .. })
        ));
        assert!(!reader.is_open());
    }

    #[test]
    fn test_direct_file_roundtrip() {
        let data = patterned(1_000_000);
        let Some((_dir, path)) = crate::direct::tests::direct_fixture(&data) else {
            return;
        };

        let mut reader = CacheReader::new();
        reader.open(&path).unwrap();
        assert!(reader.is_open());
        assert!(reader.alignment().is_power_of_two());
        assert!(reader.cache_size() >= MIN_CACHE_SIZE);
        assert_eq!(reader.cache_size() % reader.alignment(), 0);

        assert!(matches!(
            reader.open(&path),
            Err(ReadError::AlreadyOpen { .. })
        ));
        assert!(reader.is_open());

        let mut out = Vec::new();
        let mut chunk = vec![0u8; 300_000];
        loop {
            let n = reader.read_bin(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(out, data);
        assert!(reader.eof());

        reader.close();
        assert!(!reader.is_open());
        reader.close();

        reader.open(&path).unwrap();
        let mut head = vec![0u8; 16];
        assert_eq!(reader.read_bin(&mut head).unwrap(), 16);
        assert_eq!(head, &data[..16]);
        reader.close();
    }
}
