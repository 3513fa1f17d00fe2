//! Frame management for the buffer pool.
//!
//! A frame is a slot in the buffer pool that holds one page at a time. The
//! metadata (resident page, pin count, dirty flag) lives under a per-frame
//! mutex; the payload has its own reader/writer lock shared with the disk
//! scheduler for I/O staging.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::page::{PageData, PageId};

/// Index of a slot in the buffer pool's frame array.
///
/// Frames are numbered `0..pool_size` and only meaningful to the pool that
/// issued them. Which logical page a frame holds changes as pages come and
/// go, so a `FrameId` carries no durable page identity; pair it with the
/// page table for that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(usize);

impl FrameId {
    /// Wraps a raw frame index.
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Raw frame index, usable to address the frame array.
    pub const fn as_usize(&self) -> usize {
        self.0
    }
}

/// Metadata of one frame, guarded by the frame's mutex.
pub(super) struct FrameMeta {
    /// The `PageId` currently resident in this frame, if any.
    pub(super) page_id: Option<PageId>,

    /// Number of outstanding references to this frame.
    ///
    /// A frame cannot be evicted or reassigned while `pin_count > 0`.
    pub(super) pin_count: u32,

    /// Whether the resident page has been modified since it was loaded or
    /// last flushed.
    pub(super) is_dirty: bool,
}

/// A buffer pool frame.
///
/// # Lifecycle
///
/// 1. **Empty**: `page_id = None`, the frame is on the free list
/// 2. **Resident**: a page occupies the frame, `page_id = Some(...)`
/// 3. **Pinned**: `pin_count > 0`, the page cannot be evicted
/// 4. **Unpinned**: `pin_count = 0`, the replacer may pick it as a victim
/// 5. **Evicted**: written back if dirty, then reassigned or freed
pub(super) struct Frame {
    /// Frame metadata; the per-frame lock of the pool's locking protocol.
    pub(super) meta: Mutex<FrameMeta>,

    /// Page payload. Shared with the disk scheduler so reads can be staged
    /// directly into the frame while the pool holds its reservation.
    pub(super) data: Arc<RwLock<PageData>>,
}

impl Frame {
    pub(super) fn new() -> Self {
        Self {
            meta: Mutex::new(FrameMeta {
                page_id: None,
                pin_count: 0,
                is_dirty: false,
            }),
            data: Arc::new(RwLock::new(PageData::new())),
        }
    }
}

impl FrameMeta {
    /// Takes one more reference on the frame.
    pub(super) fn pin(&mut self) {
        assert!(self.pin_count < u32::MAX, "pin count would overflow");
        self.pin_count += 1;
    }
}
