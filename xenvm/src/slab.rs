//! Memory-mapped backing store for a persistent SPSC byte ring.
//!
//! This module implements the raw on-disk format shared by every `H-toLVM`
//! and `H-fromLVM` queue (and the `xenvm_journal` log, which is itself a
//! ring with a single reader): a fixed header followed by a power-of-two
//! byte buffer that items are framed into. [`crate::ring`] builds the
//! producer/consumer protocol on top of the raw byte read/write primitives
//! exposed here.
//!
//! # File Format
//!
//! ```text
//! [0..64)          Header (SlabHeader)
//! [64..64+cap)     Byte buffer, length a power of two
//! ```
//!
//! # Safety
//!
//! All unsafe blocks are bounds-checked during slab creation/opening; the
//! byte-buffer read/write helpers additionally reduce offsets modulo
//! `capacity`, so out-of-range accesses are impossible by construction
//! rather than by caller discipline.

use std::fs::OpenOptions;
use std::path::Path;
use std::ptr;

use memmap2::MmapMut;

use crate::error::RingError;

/// Magic bytes identifying a XenVM ring slab file.
const SLAB_MAGIC: [u8; 4] = *b"XVRQ";

/// Current slab format version.
const SLAB_VERSION: u32 = 1;

/// Size of the slab header in bytes.
const HEADER_SIZE: usize = 64;

/// Header structure written at the start of every ring-backing slab file.
#[repr(C)]
#[derive(Debug, Clone)]
struct SlabHeader {
    /// Magic bytes for file type identification.
    magic: [u8; 4],
    /// Slab format version number.
    version: u32,
    /// Capacity of the byte buffer, always a power of two.
    capacity: u64,
    /// Durable producer position (monotonically increasing byte count).
    producer_position: u64,
    /// Durable consumer position (monotonically increasing byte count).
    consumer_position: u64,
    /// Ring state: 0 = running, 1 = suspended.
    suspended: u32,
    /// Reserved space for future use (padding to 64 bytes).
    _reserved: [u8; 20],
}

impl SlabHeader {
    fn new(capacity: u64) -> Self {
        Self {
            magic: SLAB_MAGIC,
            version: SLAB_VERSION,
            capacity,
            producer_position: 0,
            consumer_position: 0,
            suspended: 0,
            _reserved: [0; 20],
        }
    }

    fn validate(&self, path: &str) -> Result<(), RingError> {
        if self.magic != SLAB_MAGIC {
            return Err(RingError::CorruptedRing {
                path: path.to_string(),
                reason: format!(
                    "invalid magic bytes: expected {SLAB_MAGIC:?}, found {:?}",
                    self.magic
                ),
            });
        }
        if self.version != SLAB_VERSION {
            return Err(RingError::CorruptedRing {
                path: path.to_string(),
                reason: format!(
                    "unsupported version: expected {SLAB_VERSION}, found {}",
                    self.version
                ),
            });
        }
        if !self.capacity.is_power_of_two() {
            return Err(RingError::CorruptedRing {
                path: path.to_string(),
                reason: format!("capacity {} is not a power of two", self.capacity),
            });
        }
        Ok(())
    }
}

/// Memory-mapped byte-ring backing file.
///
/// A slab is a fixed-size mmap'd file: a header carrying the producer and
/// consumer positions and the suspended flag, followed by a power-of-two
/// byte buffer. Multiple independent `Slab` handles (separate `mmap` calls)
/// may be opened onto the same file by different processes/tasks, matching
/// the real deployment where the daemon and the host-side allocator map the
/// same logical volume.
#[derive(Debug)]
pub struct Slab {
    mmap: MmapMut,
    capacity: u64,
    path: String,
}

// SAFETY: Slab is mapped read/write and all mutation goes through bounds-checked
// helpers; callers provide their own producer/consumer discipline (single
// producer, single consumer) the same way the on-disk ring protocol requires.
unsafe impl Send for Slab {}

// SAFETY: the memory mapping itself is safe to share; XenVM's single-writer
// discipline (one producer, one consumer, coordinated through the header
// positions) is what makes concurrent access race-free, not this impl.
unsafe impl Sync for Slab {}

impl Slab {
    /// Creates a new ring-backing slab file with an empty, running ring.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Io`] if file creation or memory mapping fails.
    pub fn create<P: AsRef<Path>>(path: P, capacity: u64) -> Result<Self, RingError> {
        debug_assert!(capacity.is_power_of_two(), "ring capacity must be a power of two");
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| RingError::Io { path: path_str.clone(), source: e })?;

        let file_size = HEADER_SIZE as u64 + capacity;
        file.set_len(file_size)
            .map_err(|e| RingError::Io { path: path_str.clone(), source: e })?;

        // SAFETY: the file was just created with the exact size we mmap.
        let mut mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| RingError::Io { path: path_str.clone(), source: e })?
        };

        let header = SlabHeader::new(capacity);
        // SAFETY: mmap is at least HEADER_SIZE bytes (file_size >= HEADER_SIZE)
        // and properly aligned for SlabHeader at the start of the mapping.
        unsafe {
            ptr::write(mmap.as_mut_ptr() as *mut SlabHeader, header);
        }

        Ok(Self { mmap, capacity, path: path_str })
    }

    /// Opens an existing ring-backing slab file.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Io`] if the file cannot be opened or mapped, or
    /// [`RingError::CorruptedRing`] if the header is invalid.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RingError> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| RingError::Io { path: path_str.clone(), source: e })?;

        // SAFETY: the file was opened read/write above.
        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| RingError::Io { path: path_str.clone(), source: e })?
        };

        if mmap.len() < HEADER_SIZE {
            return Err(RingError::CorruptedRing {
                path: path_str,
                reason: format!("file too small: {} bytes, expected at least {HEADER_SIZE}", mmap.len()),
            });
        }

        // SAFETY: we just checked the mapping is at least HEADER_SIZE bytes.
        let header = unsafe { ptr::read(mmap.as_ptr() as *const SlabHeader) };
        header.validate(&path_str)?;

        let expected_len = HEADER_SIZE as u64 + header.capacity;
        if mmap.len() as u64 != expected_len {
            return Err(RingError::CorruptedRing {
                path: path_str,
                reason: format!("file size mismatch: {} bytes, expected {expected_len}", mmap.len()),
            });
        }

        Ok(Self { mmap, capacity: header.capacity, path: path_str })
    }

    fn header(&self) -> SlabHeader {
        // SAFETY: validated during open/create.
        unsafe { ptr::read(self.mmap.as_ptr() as *const SlabHeader) }
    }

    fn header_mut(&mut self) -> *mut SlabHeader {
        self.mmap.as_mut_ptr() as *mut SlabHeader
    }

    /// Byte capacity of the ring's data region.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Durable producer position.
    pub fn producer_position(&self) -> u64 {
        self.header().producer_position
    }

    /// Sets the durable producer position.
    pub fn set_producer_position(&mut self, pos: u64) {
        let header_ptr = self.header_mut();
        // SAFETY: writes only the producer_position field of a valid header.
        unsafe { ptr::write(&mut (*header_ptr).producer_position, pos) }
    }

    /// Durable consumer position.
    pub fn consumer_position(&self) -> u64 {
        self.header().consumer_position
    }

    /// Sets the durable consumer position.
    pub fn set_consumer_position(&mut self, pos: u64) {
        let header_ptr = self.header_mut();
        // SAFETY: writes only the consumer_position field of a valid header.
        unsafe { ptr::write(&mut (*header_ptr).consumer_position, pos) }
    }

    /// Whether the ring is currently suspended.
    pub fn suspended(&self) -> bool {
        self.header().suspended != 0
    }

    /// Sets the suspended flag.
    pub fn set_suspended(&mut self, suspended: bool) {
        let header_ptr = self.header_mut();
        // SAFETY: writes only the suspended field of a valid header.
        unsafe { ptr::write(&mut (*header_ptr).suspended, u32::from(suspended)) }
    }

    /// Writes `data` into the byte buffer starting at `offset` (a
    /// monotonically increasing byte position, not yet reduced modulo
    /// capacity). Handles wraparound. Caller must ensure `data.len() <=
    /// capacity`.
    pub fn write_bytes(&mut self, offset: u64, data: &[u8]) {
        let cap = self.capacity;
        let base = HEADER_SIZE as u64;
        let start = offset % cap;
        let first_len = (cap - start).min(data.len() as u64) as usize;

        // SAFETY: start < capacity and first_len <= capacity - start, so the
        // write stays within the data region [HEADER_SIZE, HEADER_SIZE+capacity).
        unsafe {
            let dst = self.mmap.as_mut_ptr().add((base + start) as usize);
            ptr::copy_nonoverlapping(data.as_ptr(), dst, first_len);
        }

        if first_len < data.len() {
            let rest = &data[first_len..];
            // SAFETY: rest.len() <= capacity (caller contract) so this
            // wraparound write stays within the data region.
            unsafe {
                let dst = self.mmap.as_mut_ptr().add(base as usize);
                ptr::copy_nonoverlapping(rest.as_ptr(), dst, rest.len());
            }
        }
    }

    /// Reads `len` bytes from the byte buffer starting at `offset`. Handles
    /// wraparound. Caller must ensure `len <= capacity`.
    pub fn read_bytes(&self, offset: u64, len: usize) -> Vec<u8> {
        let cap = self.capacity;
        let base = HEADER_SIZE as u64;
        let start = offset % cap;
        let first_len = (cap - start).min(len as u64) as usize;

        let mut out = vec![0u8; len];
        // SAFETY: start < capacity and first_len <= capacity - start.
        unsafe {
            let src = self.mmap.as_ptr().add((base + start) as usize);
            ptr::copy_nonoverlapping(src, out.as_mut_ptr(), first_len);
        }

        if first_len < len {
            // SAFETY: len - first_len <= capacity (caller contract), wraparound
            // read from the start of the data region.
            unsafe {
                let src = self.mmap.as_ptr().add(base as usize);
                ptr::copy_nonoverlapping(src, out.as_mut_ptr().add(first_len), len - first_len);
            }
        }
        out
    }

    /// Syncs the memory mapping to disk.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Io`] if the flush fails.
    pub fn sync(&self) -> Result<(), RingError> {
        self.mmap
            .flush()
            .map_err(|e| RingError::Io { path: self.path.clone(), source: e })
    }

    /// Path to the backing file, for diagnostics.
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_and_open_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.slab");

        {
            let mut slab = Slab::create(&path, 1024).unwrap();
            assert_eq!(slab.capacity(), 1024);
            assert_eq!(slab.producer_position(), 0);
            assert!(!slab.suspended());
            slab.set_producer_position(42);
            slab.set_suspended(true);
            slab.sync().unwrap();
        }

        let slab = Slab::open(&path).unwrap();
        assert_eq!(slab.capacity(), 1024);
        assert_eq!(slab.producer_position(), 42);
        assert!(slab.suspended());
    }

    #[test]
    fn byte_roundtrip_without_wrap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.slab");
        let mut slab = Slab::create(&path, 16).unwrap();

        slab.write_bytes(0, b"hello");
        assert_eq!(slab.read_bytes(0, 5), b"hello");
    }

    #[test]
    fn byte_roundtrip_with_wrap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.slab");
        let mut slab = Slab::create(&path, 8).unwrap();

        // offset 6, 4 bytes: wraps after 2 bytes.
        slab.write_bytes(6, b"data");
        assert_eq!(slab.read_bytes(6, 4), b"data");
    }

    #[test]
    fn invalid_header_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.slab");
        std::fs::write(&path, vec![0u8; 64]).unwrap();

        let err = Slab::open(&path).unwrap_err();
        assert!(matches!(err, RingError::CorruptedRing { .. }));
    }

    #[test]
    fn file_too_small_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("small.slab");
        std::fs::write(&path, b"tiny").unwrap();

        let err = Slab::open(&path).unwrap_err();
        assert!(matches!(err, RingError::CorruptedRing { .. }));
    }
}

