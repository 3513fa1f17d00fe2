//! File-backed disk manager implementation.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{DiskError, DiskManager};
use crate::page::{PageId, PAGE_SIZE};

/// File-backed disk manager.
///
/// Stores pages as contiguous 8KB blocks in a single file.
///
/// # File Layout
///
/// ```text
/// +------------------+------------------+------------------+
/// | Page 0 (8KB)     | Page 1 (8KB)     | Page 2 (8KB)     | ...
/// +------------------+------------------+------------------+
/// ^ offset 0         ^ offset 8192      ^ offset 16384
/// ```
///
/// # Concurrency
///
/// A mutex around the file handle serializes seek+read/write pairs. The
/// disk scheduler already serializes I/O per page, so the mutex only orders
/// operations on distinct pages.
///
/// # Durability
///
/// `sync_all` forwards to `File::sync_all` to push OS buffers to the
/// physical disk. Without it, data may be lost on crash.
pub struct FileDisk {
    /// Path to the storage file.
    path: PathBuf,
    /// File handle; seek and transfer must happen under one lock hold.
    file: Mutex<File>,
    /// Number of pages the file currently covers.
    page_count: AtomicU64,
}

impl FileDisk {
    /// Opens or creates a storage file at the given path.
    ///
    /// If the file exists, its page count is derived from the file size.
    ///
    /// # Errors
    ///
    /// Returns `DiskError::Corrupted` if the file size is not a multiple of
    /// `PAGE_SIZE`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DiskError> {
        let path = path.into();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        if file_size % PAGE_SIZE as u64 != 0 {
            return Err(DiskError::Corrupted(format!(
                "file size {} is not a multiple of page size {}",
                file_size, PAGE_SIZE
            )));
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
            page_count: AtomicU64::new(file_size / PAGE_SIZE as u64),
        })
    }

    /// Returns the path to the storage file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of pages the file currently covers.
    pub fn page_count(&self) -> u64 {
        self.page_count.load(Ordering::Acquire)
    }

    /// Syncs all pending writes to the physical disk (fsync).
    pub fn sync_all(&self) -> Result<(), DiskError> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

fn check_buffer_size(len: usize) -> Result<(), DiskError> {
    if len != PAGE_SIZE {
        return Err(DiskError::InvalidBufferSize {
            expected: PAGE_SIZE,
            actual: len,
        });
    }
    Ok(())
}

impl DiskManager for FileDisk {
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<(), DiskError> {
        check_buffer_size(buf.len())?;

        // Pages past the end of the file have never been written; they read
        // back as zeroes like a hole in a sparse file.
        if page_id.page_num() >= self.page_count.load(Ordering::Acquire) {
            buf.fill(0);
            return Ok(());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id.byte_offset()))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<(), DiskError> {
        check_buffer_size(buf.len())?;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id.byte_offset()))?;
        file.write_all(buf)?;

        self.page_count
            .fetch_max(page_id.page_num() + 1, Ordering::AcqRel);
        Ok(())
    }
}
