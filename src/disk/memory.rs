//! In-memory disk manager implementation.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::{DiskError, DiskManager};
use crate::page::{PageData, PageId, PAGE_SIZE};

/// In-memory disk manager for testing and development.
///
/// Pages are stored sparsely in a hash map; reading a page that was never
/// written yields zeroes, mirroring a sparse file.
pub struct MemoryDisk {
    pages: Mutex<HashMap<PageId, PageData>>,
}

impl MemoryDisk {
    /// Creates a new empty in-memory disk.
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the number of pages that have been written at least once.
    pub fn page_count(&self) -> usize {
        self.pages.lock().len()
    }
}

impl Default for MemoryDisk {
    fn default() -> Self {
        Self::new()
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

impl DiskManager for MemoryDisk {
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<(), DiskError> {
        check_buffer_size(buf.len())?;

        let pages = self.pages.lock();
        match pages.get(&page_id) {
            Some(page) => buf.copy_from_slice(page.as_slice()),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<(), DiskError> {
        check_buffer_size(buf.len())?;

        let mut pages = self.pages.lock();
        let page = pages.entry(page_id).or_insert_with(PageData::new);
        page.as_mut_slice().copy_from_slice(buf);
        Ok(())
    }
}
