//! RAII guards for buffer pool page access.
//!
//! Guards hold a pin on their page and release it on drop. The read and
//! write variants additionally hold the frame's payload lock; the payload
//! lock is released before the unpin so a concurrent flush of the same
//! frame can make progress.

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use super::frame::FrameId;
use super::pool::BufferPoolManager;
use super::replacer::AccessType;
use crate::disk::DiskManager;
use crate::page::{PageData, PageId};

/// RAII guard holding only a pin on a page.
///
/// Keeps the page resident without taking the payload lock. Useful to keep
/// a page from being evicted across other operations.
pub struct PageGuard<'a, D: DiskManager> {
    pool: &'a BufferPoolManager<D>,
    page_id: PageId,
    frame_id: FrameId,
}

impl<'a, D: DiskManager> PageGuard<'a, D> {
    pub(super) fn new(
        pool: &'a BufferPoolManager<D>,
        page_id: PageId,
        frame_id: FrameId,
    ) -> Self {
        Self {
            pool,
            page_id,
            frame_id,
        }
    }

    /// Returns the PageId of this page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the id of the frame the page is pinned in.
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }
}

impl<D: DiskManager> Drop for PageGuard<'_, D> {
    fn drop(&mut self) {
        self.pool
            .unpin_page(self.page_id, false, AccessType::Unknown);
    }
}

/// RAII guard for shared, read-only page access.
///
/// Dereferences to the page bytes. Unpins the page on drop.
pub struct ReadPageGuard<'a, D: DiskManager> {
    pool: &'a BufferPoolManager<D>,
    page_id: PageId,
    frame_id: FrameId,
    data: Option<RwLockReadGuard<'a, PageData>>,
}

impl<'a, D: DiskManager> ReadPageGuard<'a, D> {
    pub(super) fn new(
        pool: &'a BufferPoolManager<D>,
        page_id: PageId,
        frame_id: FrameId,
        data: RwLockReadGuard<'a, PageData>,
    ) -> Self {
        Self {
            pool,
            page_id,
            frame_id,
            data: Some(data),
        }
    }

    /// Returns the PageId of this page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the id of the frame the page is pinned in.
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }
}

impl<D: DiskManager> Deref for ReadPageGuard<'_, D> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data
            .as_ref()
            .expect("payload lock held until drop")
            .as_slice()
    }
}

impl<D: DiskManager> Drop for ReadPageGuard<'_, D> {
    fn drop(&mut self) {
        // Release the payload lock first; the unpin may have to wait on
        // another thread that is flushing this frame.
        self.data.take();
        self.pool
            .unpin_page(self.page_id, false, AccessType::Unknown);
    }
}

/// RAII guard for exclusive, mutable page access.
///
/// Dereferences to the page bytes; mutable access marks the page dirty.
/// Unpins the page on drop, carrying the dirty flag into the pool.
pub struct WritePageGuard<'a, D: DiskManager> {
    pool: &'a BufferPoolManager<D>,
    page_id: PageId,
    frame_id: FrameId,
    data: Option<RwLockWriteGuard<'a, PageData>>,
    dirtied: bool,
}

impl<'a, D: DiskManager> WritePageGuard<'a, D> {
    pub(super) fn new(
        pool: &'a BufferPoolManager<D>,
        page_id: PageId,
        frame_id: FrameId,
        data: RwLockWriteGuard<'a, PageData>,
    ) -> Self {
        Self {
            pool,
            page_id,
            frame_id,
            data: Some(data),
            dirtied: false,
        }
    }

    /// Returns the PageId of this page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the id of the frame the page is pinned in.
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }
}

impl<D: DiskManager> Deref for WritePageGuard<'_, D> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data
            .as_ref()
            .expect("payload lock held until drop")
            .as_slice()
    }
}

impl<D: DiskManager> DerefMut for WritePageGuard<'_, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.dirtied = true;
        self.data
            .as_mut()
            .expect("payload lock held until drop")
            .as_mut_slice()
    }
}

impl<D: DiskManager> Drop for WritePageGuard<'_, D> {
    fn drop(&mut self) {
        self.data.take();
        self.pool
            .unpin_page(self.page_id, self.dirtied, AccessType::Unknown);
    }
}
