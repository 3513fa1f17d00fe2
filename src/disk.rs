//! Disk manager contract and asynchronous request scheduling.
//!
//! The disk layer has two halves:
//! - the [`DiskManager`] trait, a blocking page I/O contract with
//!   [`MemoryDisk`] and [`FileDisk`] implementations;
//! - the [`DiskScheduler`], which turns synchronous read/write calls into
//!   queued requests served by dedicated worker threads, sharded by page id
//!   so that I/O for any single page stays in submission order.

pub mod error;
mod file;
mod memory;
pub mod scheduler;

pub use error::DiskError;
pub use file::FileDisk;
pub use memory::MemoryDisk;
pub use scheduler::{DiskData, DiskRequest, DiskScheduler};

use crate::page::PageId;

/// Blocking page I/O contract consumed by the disk scheduler.
///
/// Implementations must be thread-safe (`Send + Sync`): the scheduler calls
/// into them from several worker threads at once, though never concurrently
/// for the same page.
///
/// # Design Decisions
///
/// 1. **Blocking calls**: workers own dedicated OS threads, so the manager
///    can simply block; no async machinery leaks into the contract.
///
/// 2. **Caller-owned buffers**: the manager reads and writes raw bytes only.
///    Buffer lifetime and locking are the caller's concern (the buffer pool
///    in practice).
///
/// 3. **Page-level operations**: all I/O is page-sized for alignment with OS
///    pages and efficient disk access.
///
/// 4. **Sparse reads**: reading a page that was never written fills the
///    buffer with zeroes rather than failing. The buffer pool allocates page
///    ids without touching the disk, so the first read of a fresh page must
///    be well defined.
pub trait DiskManager: Send + Sync + 'static {
    /// Reads a page into the caller-provided buffer.
    ///
    /// The buffer must be exactly `PAGE_SIZE` bytes. Pages that were never
    /// written read back as all zeroes.
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<(), DiskError>;

    /// Persists a page from the caller-provided buffer.
    ///
    /// The buffer must be exactly `PAGE_SIZE` bytes.
    fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<(), DiskError>;
}
