//! The shared region: a memory-mapped temp file plus the three-lock
//! handshake that stands in for a cross-process semaphore pair.
//!
//! Three non-overlapping byte ranges of the backing file are locked
//! independently: the sync cell, the producer area (written by the primary)
//! and the consumer area (written by the simulation). Advisory byte-range
//! locks are available everywhere a mapped file is, so the protocol needs no
//! native semaphore support. The steady-state choreography:
//!
//! ```text
//!    Primary                          Simulation
//!   (holds Producer, Sync)           (holds Consumer)
//! [write commands]
//!    -> release Producer
//!                                    -> acquire Producer  (commands readable)
//!                                       [write consumer payload]
//!                                    -> release Consumer
//!    -> acquire Consumer
//!    -> release Sync
//!                                    -> acquire Sync      (primary has Consumer)
//!                                    -> release Producer
//!       [read consumer payload]
//!    -> acquire Producer
//!    -> release Consumer
//!                                    -> acquire Consumer
//!                                    -> release Sync
//!    -> acquire Sync
//! ```
//!
//! Each process always holds at least one lock and never all three; the
//! acquisition order (Consumer→Producer, Producer→Sync, Sync→Consumer) is
//! fixed and must never be reversed or the two processes deadlock. The sync
//! cell carries no data: acquiring it is purely an ordering point proving the
//! peer has observed the preceding release.

use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use sim_proto::layout::{
    CONSUMER_OFFSET_BYTES, PRODUCER_OFFSET_BYTES, PRODUCER_SIZE_BYTES, SYNC_OFFSET_BYTES,
    SYNC_SIZE_BYTES, WORD_BYTES,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockArea {
    Sync,
    Producer,
    Consumer,
}

impl LockArea {
    fn name(self) -> &'static str {
        match self {
            LockArea::Sync => "sync",
            LockArea::Producer => "producer",
            LockArea::Consumer => "consumer",
        }
    }

    fn byte_range(self, region_bytes: u64) -> (u64, u64) {
        match self {
            LockArea::Sync => (SYNC_OFFSET_BYTES, SYNC_SIZE_BYTES),
            LockArea::Producer => (PRODUCER_OFFSET_BYTES, PRODUCER_SIZE_BYTES),
            LockArea::Consumer => (
                CONSUMER_OFFSET_BYTES,
                region_bytes.saturating_sub(CONSUMER_OFFSET_BYTES),
            ),
        }
    }
}

impl std::fmt::Display for LockArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    #[error("failed to create shared region file {path:?}: {source}")]
    Create { path: PathBuf, source: io::Error },
    #[error("failed to open shared region file {path:?}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("failed to map shared region file: {0}")]
    Map(io::Error),
    #[error("shared region of {bytes} bytes is smaller than the producer prefix")]
    TooSmall { bytes: usize },
    #[error("failed to acquire {area} lock: {source}")]
    Lock { area: LockArea, source: io::Error },
    #[error("failed to release {area} lock: {source}")]
    Unlock { area: LockArea, source: io::Error },
}

/// The mapped backing file, shared word-addressed by both processes.
///
/// All accessors take `&self`: the mapping is mutated concurrently by two
/// processes, so Rust's aliasing guarantees cannot apply to its contents
/// regardless. Torn reads are prevented by the lock protocol, not the type
/// system; callers must hold the relevant area lock around any access.
#[derive(Debug)]
pub struct SharedRegion {
    file: File,
    map: MmapMut,
    path: PathBuf,
    bytes: usize,
    /// Whether this side created the file and should delete it on drop.
    owned: bool,
}

impl SharedRegion {
    /// Create the backing file in the OS temp directory and map it. Primary
    /// side only; the file is deleted best-effort when the region drops.
    pub fn create_temp(bytes: usize) -> Result<Self, RegionError> {
        let path = std::env::temp_dir().join(format!(
            "vivarium-{}-{:08x}.shm",
            std::process::id(),
            rand::random::<u32>()
        ));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| RegionError::Create {
                path: path.clone(),
                source,
            })?;
        Self::map_file(file, path.clone(), bytes, true).inspect_err(|_| {
            let _ = std::fs::remove_file(&path);
        })
    }

    /// Map an existing backing file. Simulation side; path and size arrive as
    /// launch parameters.
    pub fn open(path: &Path, bytes: usize) -> Result<Self, RegionError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| RegionError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Self::map_file(file, path.to_path_buf(), bytes, false)
    }

    fn map_file(file: File, path: PathBuf, bytes: usize, owned: bool) -> Result<Self, RegionError> {
        if (bytes as u64) < CONSUMER_OFFSET_BYTES + SYNC_SIZE_BYTES {
            return Err(RegionError::TooSmall { bytes });
        }
        file.set_len(bytes as u64).map_err(RegionError::Map)?;
        // SAFETY: the file stays open for the lifetime of the mapping and is
        // only resized here, before the map is created.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(RegionError::Map)?;
        Ok(Self {
            file,
            map,
            path,
            bytes,
            owned,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    fn base(&self) -> *mut i32 {
        self.map.as_ptr() as *mut i32
    }

    fn words(&self) -> usize {
        self.bytes / WORD_BYTES
    }

    /// Read one word. Volatile so the compiler never caches a value the peer
    /// process may have rewritten.
    pub fn word(&self, index: usize) -> i32 {
        assert!(index < self.words());
        // SAFETY: index is bounds-checked against the mapping; word-sized
        // aligned volatile reads cannot tear.
        unsafe { self.base().add(index).read_volatile() }
    }

    pub fn set_word(&self, index: usize, value: i32) {
        assert!(index < self.words());
        // SAFETY: as for `word`.
        unsafe { self.base().add(index).write_volatile(value) }
    }

    /// Run the codec over a word range of the region. The caller must hold
    /// the lock covering the range for the duration of the closure.
    pub fn with_words<R>(&self, range: std::ops::Range<usize>, f: impl FnOnce(&mut [i32]) -> R) -> R {
        assert!(range.start <= range.end && range.end <= self.words());
        // SAFETY: the range is bounds-checked; the mapping is page-aligned so
        // any word offset is i32-aligned. Exclusive access to the range is
        // guaranteed by the area lock the caller holds, which is what keeps
        // the peer process out of it.
        let slice = unsafe {
            std::slice::from_raw_parts_mut(self.base().add(range.start), range.end - range.start)
        };
        f(slice)
    }

    /// Zero the whole region. Used when a terminated simulation process is
    /// about to be replaced and stale frames must not survive into its
    /// successor.
    pub fn zero(&self) {
        for index in 0..self.words() {
            self.set_word(index, 0);
        }
    }

    /// Block until the given area's write lock is held by this process.
    pub fn lock(&self, area: LockArea) -> Result<(), RegionError> {
        self.fcntl(area, libc::F_WRLCK as libc::c_short)
            .map_err(|source| RegionError::Lock { area, source })
    }

    pub fn unlock(&self, area: LockArea) -> Result<(), RegionError> {
        self.fcntl(area, libc::F_UNLCK as libc::c_short)
            .map_err(|source| RegionError::Unlock { area, source })
    }

    fn fcntl(&self, area: LockArea, kind: libc::c_short) -> io::Result<()> {
        let (start, len) = area.byte_range(self.bytes as u64);
        // SAFETY: plain POSIX record-lock call on a valid fd; the struct is
        // fully initialised before use.
        let mut fl: libc::flock = unsafe { std::mem::zeroed() };
        fl.l_type = kind;
        fl.l_whence = libc::SEEK_SET as libc::c_short;
        fl.l_start = start as libc::off_t;
        fl.l_len = len as libc::off_t;
        loop {
            let rc = unsafe { libc::fcntl(self.file.as_raw_fd(), libc::F_SETLKW, &fl) };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if self.owned {
            // Best-effort: the region is ephemeral and never outlives the
            // primary process on purpose.
            if let Err(err) = std::fs::remove_file(&self.path) {
                tracing::debug!(path = ?self.path, %err, "could not remove shared region file");
            }
        }
    }
}
