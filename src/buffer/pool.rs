//! Buffer pool manager implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{MutexGuard, RwLock};
use tokio::sync::oneshot;

use super::frame::{Frame, FrameId, FrameMeta};
use super::guard::{PageGuard, ReadPageGuard, WritePageGuard};
use super::replacer::{AccessType, LruKReplacer};
use crate::disk::scheduler::{DiskData, DiskRequest, DiskScheduler};
use crate::disk::DiskManager;
use crate::page::PageId;

/// Configuration for the buffer pool manager.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the buffer pool.
    ///
    /// This determines the maximum number of pages that can be cached in
    /// memory simultaneously. Common values:
    /// - 128 frames = 1MB (for testing)
    /// - 1024 frames = 8MB (small database)
    /// - 131072 frames = 1GB (production)
    pub pool_size: usize,

    /// History depth K of the LRU-K replacement policy.
    pub replacer_k: usize,

    /// Number of disk scheduler shards (worker threads).
    pub num_workers: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 1024, // 1024 * 8KB = 8MB
            replacer_k: 2,
            num_workers: 4,
        }
    }
}

/// Mutable pool state behind the pool-wide reader/writer lock.
struct PoolState {
    /// Maps `PageId` to the `FrameId` where it is resident.
    page_table: HashMap<PageId, FrameId>,

    /// Frames not currently holding any page.
    free_list: VecDeque<FrameId>,
}

/// The buffer pool manager caches disk pages in a fixed array of frames.
///
/// # Architecture
///
/// ```text
/// +------------------+     +------------------+
/// | fetch_page()     |---->| Page Table       |
/// | unpin_page()     |     | (PageId->FrameId)|
/// +------------------+     +------------------+
///          |                       |
///          v                       v
/// +------------------+     +------------------+
/// | LRU-K Replacer   |     | Frame Array      |
/// | (victim choice)  |     | [Frame; pool_sz] |
/// +------------------+     +------------------+
///                                   |
///                                   v
///                          +------------------+
///                          |  DiskScheduler   |
///                          +------------------+
/// ```
///
/// # Latch Hierarchy
///
/// To prevent deadlocks, locks are acquired in strict order:
/// 1. pool state lock (page_table + free_list), shared or exclusive
/// 2. per-frame metadata mutex (in FrameId ascending order if multiple)
/// 3. frame payload lock
///
/// The replacer synchronizes internally and is only called while pool locks
/// are held; it never calls back into the pool.
///
/// Operations that only touch one frame's state take the pool lock shared;
/// operations that change the page table or free list take it exclusively.
/// The miss path of `fetch_page` and `delete_page` re-check residency after
/// upgrading from shared to exclusive, since the shared-mode observation is
/// stale by then.
///
/// # Thread Safety
///
/// The pool is safe to share across threads via `Arc<BufferPoolManager<D>>`.
/// Disk I/O waits happen on scheduler worker threads that never take pool
/// locks, so blocking on a completion while holding the pool lock cannot
/// deadlock.
pub struct BufferPoolManager<D: DiskManager> {
    /// The underlying disk manager, shared with the scheduler workers.
    disk: Arc<D>,

    /// Asynchronous disk request scheduler.
    scheduler: DiskScheduler,

    /// Page table and free list behind the pool-wide lock.
    state: RwLock<PoolState>,

    /// Frame array. The Vec itself is immutable after construction; each
    /// frame carries its own locks.
    frames: Vec<Frame>,

    /// Victim selection for frames not on the free list.
    replacer: LruKReplacer,

    /// Next page id handed out by `new_page`.
    next_page_id: AtomicU64,

    /// Configuration (immutable after construction).
    config: BufferPoolConfig,
}

impl<D: DiskManager> BufferPoolManager<D> {
    /// Creates a new buffer pool manager over `disk`.
    ///
    /// # Panics
    ///
    /// Panics if `pool_size`, `replacer_k` or `num_workers` is 0.
    pub fn new(disk: D, config: BufferPoolConfig) -> Self {
        assert!(config.pool_size > 0, "pool_size must be > 0");

        let disk = Arc::new(disk);
        let scheduler = DiskScheduler::new(Arc::clone(&disk), config.num_workers);

        let frames: Vec<Frame> = (0..config.pool_size).map(|_| Frame::new()).collect();
        let free_list: VecDeque<FrameId> = (0..config.pool_size).map(FrameId::new).collect();

        Self {
            disk,
            scheduler,
            state: RwLock::new(PoolState {
                page_table: HashMap::with_capacity(config.pool_size),
                free_list,
            }),
            frames,
            replacer: LruKReplacer::new(config.pool_size, config.replacer_k),
            next_page_id: AtomicU64::new(0),
            config,
        }
    }

    /// Returns the buffer pool configuration.
    pub fn config(&self) -> &BufferPoolConfig {
        &self.config
    }

    /// Returns the number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.config.pool_size
    }

    /// Returns the underlying disk manager.
    pub fn disk(&self) -> &D {
        &self.disk
    }

    /// Returns the number of pages currently resident in the pool.
    pub fn resident_page_count(&self) -> usize {
        self.state.read().page_table.len()
    }

    /// Returns the pin count of a page, or `None` if it is not resident.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.read();
        let frame_id = *state.page_table.get(&page_id)?;
        Some(self.frames[frame_id.as_usize()].meta.lock().pin_count)
    }

    /// Allocates a fresh page id, reserves a frame for it and pins the
    /// frame. The page starts zeroed and clean; no disk read is issued.
    ///
    /// Returns `None` when every frame is pinned and the free list is
    /// empty. The caller releases the pin with [`unpin_page`].
    ///
    /// [`unpin_page`]: Self::unpin_page
    pub fn new_page(&self) -> Option<(PageId, FrameId)> {
        let mut state = self.state.write();
        let frame_id = self.find_free_frame(&mut state)?;
        let page_id = PageId::new(self.next_page_id.fetch_add(1, Ordering::Relaxed));
        state.page_table.insert(page_id, frame_id);

        let frame = &self.frames[frame_id.as_usize()];
        let mut meta = frame.meta.lock();
        self.replacer.record_access(frame_id, AccessType::Unknown);
        self.replacer.set_evictable(frame_id, false);
        drop(state);

        meta.page_id = Some(page_id);
        meta.is_dirty = false;
        meta.pin();
        frame.data.write().as_mut_slice().fill(0);

        Some((page_id, frame_id))
    }

    /// Fetches a page into the pool and pins its frame.
    ///
    /// A resident page only has its pin count incremented. Otherwise a
    /// frame is reserved (evicting if needed) and the page is read from
    /// disk before this call returns. Returns `None` when no frame can be
    /// reserved. The caller releases the pin with [`unpin_page`].
    ///
    /// [`unpin_page`]: Self::unpin_page
    pub fn fetch_page(&self, page_id: PageId, access_type: AccessType) -> Option<FrameId> {
        // Fast path: residency check under the shared lock.
        {
            let state = self.state.read();
            if let Some(&frame_id) = state.page_table.get(&page_id) {
                let mut meta = self.frames[frame_id.as_usize()].meta.lock();
                self.replacer.record_access(frame_id, access_type);
                self.replacer.set_evictable(frame_id, false);
                drop(state);
                meta.pin();
                return Some(frame_id);
            }
        }

        // Slow path: the shared-mode miss is stale once the lock is
        // dropped, so look up again under the exclusive lock.
        let mut state = self.state.write();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let mut meta = self.frames[frame_id.as_usize()].meta.lock();
            self.replacer.record_access(frame_id, access_type);
            self.replacer.set_evictable(frame_id, false);
            drop(state);
            meta.pin();
            return Some(frame_id);
        }

        let frame_id = self.find_free_frame(&mut state)?;
        state.page_table.insert(page_id, frame_id);

        // Stage the read directly into the reserved frame. Waiting here
        // with the pool lock held is fine: the workers completing the
        // request never take pool locks.
        let frame = &self.frames[frame_id.as_usize()];
        let (done, completion) = oneshot::channel();
        self.scheduler.schedule(DiskRequest {
            page_id,
            data: DiskData::Read(Arc::clone(&frame.data)),
            done,
        });
        let ok = completion.blocking_recv().unwrap_or(false);
        assert!(ok, "disk read assumed to succeed");

        let mut meta = frame.meta.lock();
        self.replacer.record_access(frame_id, access_type);
        self.replacer.set_evictable(frame_id, false);
        drop(state);

        meta.page_id = Some(page_id);
        meta.is_dirty = false;
        meta.pin();

        Some(frame_id)
    }

    /// Releases one pin on a page, OR-ing `is_dirty` into its dirty flag.
    /// When the pin count reaches zero the frame becomes evictable.
    ///
    /// Returns `false` if the page is not resident or its pin count is
    /// already zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool, _access_type: AccessType) -> bool {
        let state = self.state.read();
        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return false,
        };
        // The shared pool lock stays held: set_evictable below must not
        // race with an exclusive-mode reservation of this frame.
        let mut meta = self.frames[frame_id.as_usize()].meta.lock();
        if meta.pin_count == 0 {
            return false;
        }
        meta.is_dirty = meta.is_dirty || is_dirty;
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Writes a page out through the scheduler and clears its dirty flag,
    /// blocking until the write completes. The write is issued even if the
    /// page is clean, so flushing is idempotent.
    ///
    /// Returns `false` if the page is not resident.
    ///
    /// The calling thread must not hold the page's write guard, since the
    /// flush takes a shared snapshot of the payload.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        let state = self.state.read();
        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return false,
        };
        let frame = &self.frames[frame_id.as_usize()];
        let mut meta = frame.meta.lock();
        drop(state);
        self.flush_frame(page_id, frame, &mut meta);
        true
    }

    /// Writes every resident page out through the scheduler and blocks
    /// until all writes complete, clearing the dirty flags.
    pub fn flush_all_pages(&self) {
        let mut metas: Vec<MutexGuard<'_, FrameMeta>> =
            self.frames.iter().map(|frame| frame.meta.lock()).collect();

        // Issue all writes first so the shards work in parallel, then wait.
        let mut pending = Vec::new();
        for (i, meta) in metas.iter().enumerate() {
            let page_id = match meta.page_id {
                Some(page_id) => page_id,
                None => continue,
            };
            let snapshot: Box<[u8]> = self.frames[i].data.read().as_slice().into();
            let (done, completion) = oneshot::channel();
            self.scheduler.schedule(DiskRequest {
                page_id,
                data: DiskData::Write(snapshot),
                done,
            });
            pending.push((i, completion));
        }
        for (i, completion) in pending {
            let ok = completion.blocking_recv().unwrap_or(false);
            assert!(ok, "disk write assumed to succeed");
            metas[i].is_dirty = false;
        }
    }

    /// Drops a page from the pool, returning its frame to the free list.
    ///
    /// Returns `true` if the page is not resident (vacuous success) or was
    /// deleted; `false` if the page is pinned. The frame's memory is wiped
    /// and its access history removed from the replacer.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let frame_id = {
            let state = self.state.read();
            match state.page_table.get(&page_id) {
                Some(&frame_id) => frame_id,
                None => return true,
            }
        };

        // Upgrade to the exclusive lock and re-verify: the frame may have
        // been evicted and reassigned while no lock was held.
        let mut state = self.state.write();
        let frame = &self.frames[frame_id.as_usize()];
        let mut meta = frame.meta.lock();
        if meta.page_id != Some(page_id) {
            return true;
        }
        if meta.pin_count > 0 {
            return false;
        }

        state.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        state.free_list.push_back(frame_id);
        meta.page_id = None;
        meta.is_dirty = false;
        frame.data.write().as_mut_slice().fill(0);
        tracing::trace!(page_id = page_id.page_num(), "deleted page");
        true
    }

    /// Reserves a frame for a new tenant: pops the free list, or evicts the
    /// replacer's victim, writing it back first if dirty.
    ///
    /// The caller holds the pool state lock exclusively.
    fn find_free_frame(&self, state: &mut PoolState) -> Option<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Some(frame_id);
        }

        let victim = self.replacer.evict()?;
        let frame = &self.frames[victim.as_usize()];
        let mut meta = frame.meta.lock();
        if let Some(old_page_id) = meta.page_id {
            if meta.is_dirty {
                tracing::debug!(
                    page_id = old_page_id.page_num(),
                    frame_id = victim.as_usize(),
                    "writing back dirty victim"
                );
                self.flush_frame(old_page_id, frame, &mut meta);
            }
            state.page_table.remove(&old_page_id);
        }
        meta.page_id = None;
        Some(victim)
    }

    /// Schedules a write of the frame's payload and blocks until it
    /// completes, then clears the dirty flag. The caller holds the frame's
    /// metadata lock.
    fn flush_frame(&self, page_id: PageId, frame: &Frame, meta: &mut FrameMeta) {
        let snapshot: Box<[u8]> = frame.data.read().as_slice().into();
        let (done, completion) = oneshot::channel();
        self.scheduler.schedule(DiskRequest {
            page_id,
            data: DiskData::Write(snapshot),
            done,
        });
        let ok = completion.blocking_recv().unwrap_or(false);
        assert!(ok, "disk write assumed to succeed");
        meta.is_dirty = false;
    }

    /// Fetches a page and returns a guard holding only the pin.
    pub fn fetch_page_basic(&self, page_id: PageId) -> Option<PageGuard<'_, D>> {
        let frame_id = self.fetch_page(page_id, AccessType::Unknown)?;
        Some(PageGuard::new(self, page_id, frame_id))
    }

    /// Fetches a page and returns a guard with shared access to its bytes.
    pub fn fetch_page_read(&self, page_id: PageId) -> Option<ReadPageGuard<'_, D>> {
        let frame_id = self.fetch_page(page_id, AccessType::Unknown)?;
        let data = self.frames[frame_id.as_usize()].data.read();
        Some(ReadPageGuard::new(self, page_id, frame_id, data))
    }

    /// Fetches a page and returns a guard with exclusive access to its
    /// bytes. Writing through the guard marks the page dirty.
    pub fn fetch_page_write(&self, page_id: PageId) -> Option<WritePageGuard<'_, D>> {
        let frame_id = self.fetch_page(page_id, AccessType::Unknown)?;
        let data = self.frames[frame_id.as_usize()].data.write();
        Some(WritePageGuard::new(self, page_id, frame_id, data))
    }

    /// Allocates a new page and returns a write guard over it.
    pub fn new_page_guarded(&self) -> Option<WritePageGuard<'_, D>> {
        let (page_id, frame_id) = self.new_page()?;
        let data = self.frames[frame_id.as_usize()].data.write();
        Some(WritePageGuard::new(self, page_id, frame_id, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemoryDisk;
    use crate::page::PAGE_SIZE;

    fn small_pool(pool_size: usize) -> BufferPoolManager<MemoryDisk> {
        BufferPoolManager::new(
            MemoryDisk::new(),
            BufferPoolConfig {
                pool_size,
                replacer_k: 2,
                num_workers: 2,
            },
        )
    }

    #[test]
    fn test_new_pool_is_empty() {
        let pool = small_pool(4);
        assert_eq!(pool.pool_size(), 4);
        assert_eq!(pool.resident_page_count(), 0);
    }

    #[test]
    fn test_new_page_allocates_monotonic_ids() {
        let pool = small_pool(4);
        let (p0, _) = pool.new_page().unwrap();
        let (p1, _) = pool.new_page().unwrap();
        assert_eq!(p0, PageId::new(0));
        assert_eq!(p1, PageId::new(1));
        assert_eq!(pool.resident_page_count(), 2);
        assert_eq!(pool.get_pin_count(p0), Some(1));
        assert_eq!(pool.get_pin_count(p1), Some(1));
    }

    #[test]
    fn test_new_page_issues_no_disk_io() {
        let pool = small_pool(4);
        pool.new_page().unwrap();
        assert_eq!(pool.disk().page_count(), 0);
    }

    #[test]
    fn test_fetch_resident_page_increments_pin() {
        let pool = small_pool(4);
        let (page_id, frame_id) = pool.new_page().unwrap();
        let fetched = pool.fetch_page(page_id, AccessType::Lookup).unwrap();
        assert_eq!(fetched, frame_id);
        assert_eq!(pool.get_pin_count(page_id), Some(2));
    }

    #[test]
    fn test_unpin_page_semantics() {
        let pool = small_pool(4);
        let (page_id, _) = pool.new_page().unwrap();

        assert!(pool.unpin_page(page_id, false, AccessType::Unknown));
        assert_eq!(pool.get_pin_count(page_id), Some(0));

        // A second unpin at zero fails.
        assert!(!pool.unpin_page(page_id, false, AccessType::Unknown));

        // Unpinning a page that is not resident fails.
        assert!(!pool.unpin_page(PageId::new(999), false, AccessType::Unknown));
    }

    #[test]
    fn test_unpin_dirty_is_sticky() {
        let pool = small_pool(4);
        let (page_id, frame_id) = pool.new_page().unwrap();
        pool.fetch_page(page_id, AccessType::Unknown).unwrap();

        assert!(pool.unpin_page(page_id, true, AccessType::Unknown));
        // A later clean unpin must not clear the dirty flag.
        assert!(pool.unpin_page(page_id, false, AccessType::Unknown));
        assert!(pool.frames[frame_id.as_usize()].meta.lock().is_dirty);
    }

    #[test]
    fn test_capacity_exhaustion_returns_none() {
        let pool = small_pool(3);
        let _a = pool.new_page().unwrap();
        let _b = pool.new_page().unwrap();
        let _c = pool.new_page().unwrap();
        assert!(pool.new_page().is_none());
        assert!(pool.fetch_page(PageId::new(99), AccessType::Unknown).is_none());
    }

    #[test]
    fn test_eviction_reuses_frames() {
        let pool = small_pool(2);
        let (p0, _) = pool.new_page().unwrap();
        pool.unpin_page(p0, false, AccessType::Unknown);
        let (p1, _) = pool.new_page().unwrap();
        pool.unpin_page(p1, false, AccessType::Unknown);

        // Two more pages force both originals out.
        let (p2, _) = pool.new_page().unwrap();
        pool.unpin_page(p2, false, AccessType::Unknown);
        let (p3, _) = pool.new_page().unwrap();
        pool.unpin_page(p3, false, AccessType::Unknown);

        assert_eq!(pool.resident_page_count(), 2);
        assert_eq!(pool.get_pin_count(p0), None);
        assert_eq!(pool.get_pin_count(p1), None);
    }

    #[test]
    fn test_dirty_eviction_writes_back() {
        let pool = small_pool(1);
        let (p0, _) = pool.new_page().unwrap();
        {
            let frame = &pool.frames[0];
            frame.data.write().as_mut_slice()[0] = 77;
        }
        pool.unpin_page(p0, true, AccessType::Unknown);

        // Evicts p0, which must hit the disk first.
        let (_p1, _) = pool.new_page().unwrap();
        let mut buf = vec![0u8; PAGE_SIZE];
        pool.disk().read_page(p0, &mut buf).unwrap();
        assert_eq!(buf[0], 77);
    }

    #[test]
    fn test_flush_page_clears_dirty() {
        let pool = small_pool(4);
        let (page_id, frame_id) = pool.new_page().unwrap();
        pool.unpin_page(page_id, true, AccessType::Unknown);

        assert!(pool.flush_page(page_id));
        assert!(!pool.frames[frame_id.as_usize()].meta.lock().is_dirty);

        // Not resident -> false.
        assert!(!pool.flush_page(PageId::new(999)));
    }

    #[test]
    fn test_flush_all_pages_clears_all_dirty() {
        let pool = small_pool(4);
        let mut pages = Vec::new();
        for _ in 0..3 {
            let (page_id, frame_id) = pool.new_page().unwrap();
            pool.unpin_page(page_id, true, AccessType::Unknown);
            pages.push((page_id, frame_id));
        }

        pool.flush_all_pages();
        for (page_id, frame_id) in pages {
            assert!(!pool.frames[frame_id.as_usize()].meta.lock().is_dirty);
            assert_eq!(pool.get_pin_count(page_id), Some(0));
        }
        assert_eq!(pool.disk().page_count(), 3);
    }

    #[test]
    fn test_delete_page_lifecycle() {
        let pool = small_pool(4);
        let (page_id, _) = pool.new_page().unwrap();

        // Pinned -> refused.
        assert!(!pool.delete_page(page_id));

        pool.unpin_page(page_id, false, AccessType::Unknown);
        assert!(pool.delete_page(page_id));
        assert_eq!(pool.resident_page_count(), 0);

        // Not resident -> vacuous success.
        assert!(pool.delete_page(page_id));
        assert!(pool.delete_page(PageId::new(999)));
    }

    #[test]
    fn test_deleted_frame_is_reusable() {
        let pool = small_pool(1);
        let (p0, _) = pool.new_page().unwrap();
        pool.unpin_page(p0, false, AccessType::Unknown);
        assert!(pool.delete_page(p0));

        // The single frame is free again.
        let (p1, _) = pool.new_page().unwrap();
        assert_eq!(pool.get_pin_count(p1), Some(1));
    }

    #[test]
    fn test_guard_unpins_on_drop() {
        let pool = small_pool(4);
        let (page_id, _) = pool.new_page().unwrap();
        pool.unpin_page(page_id, false, AccessType::Unknown);

        {
            let _guard = pool.fetch_page_basic(page_id).unwrap();
            assert_eq!(pool.get_pin_count(page_id), Some(1));
        }
        assert_eq!(pool.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn test_write_guard_marks_dirty() {
        let pool = small_pool(4);
        let page_id = {
            let mut guard = pool.new_page_guarded().unwrap();
            guard[0] = 42;
            guard.page_id()
        };

        let frame_id = *pool.state.read().page_table.get(&page_id).unwrap();
        assert!(pool.frames[frame_id.as_usize()].meta.lock().is_dirty);
        assert_eq!(pool.get_pin_count(page_id), Some(0));

        let guard = pool.fetch_page_read(page_id).unwrap();
        assert_eq!(guard[0], 42);
    }

    #[test]
    fn test_read_guards_share_access() {
        let pool = small_pool(4);
        let (page_id, _) = pool.new_page().unwrap();
        pool.unpin_page(page_id, false, AccessType::Unknown);

        let g1 = pool.fetch_page_read(page_id).unwrap();
        let g2 = pool.fetch_page_read(page_id).unwrap();
        assert_eq!(g1.page_id(), g2.page_id());
        assert_eq!(pool.get_pin_count(page_id), Some(2));
    }

    #[test]
    fn test_new_page_reuses_zeroed_frame() {
        let pool = small_pool(1);
        let page_id = {
            let mut guard = pool.new_page_guarded().unwrap();
            guard[0] = 0xFF;
            guard.page_id()
        };
        assert!(pool.delete_page(page_id));

        // The recycled frame must not leak the previous tenant's bytes.
        let guard = pool.new_page_guarded().unwrap();
        assert!(guard.iter().all(|&b| b == 0));
    }
}
