//! LRU-K replacement policy for the buffer pool.
//!
//! The replacer tracks the last K access timestamps of each frame and
//! evicts the evictable frame whose backward K-distance is largest, which
//! is the frame whose K-th most recent access lies furthest in the past.
//! Frames with fewer than K recorded accesses have infinite K-distance and
//! are preferred; among those, classical LRU on the first-seen timestamp
//! breaks the tie.

use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};

use super::frame::FrameId;

/// Hint describing why a page is being accessed.
///
/// Recorded alongside each access; the replacement decision itself does not
/// depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessType {
    #[default]
    Unknown,
    Lookup,
    Scan,
    Index,
}

/// Timestamp value standing in for "no K-th previous access". Real
/// timestamps start at 1, so 0 sorts before every real timestamp.
const TIMESTAMP_NEG_INF: u64 = 0;

/// Per-frame access history.
struct LruKNode {
    /// Last K access timestamps, oldest at the front.
    history: VecDeque<u64>,
    /// Timestamp of the first access; tie-breaker for frames that have not
    /// reached K accesses yet.
    added_at: u64,
    is_evictable: bool,
    /// Whether a usable heap entry for this node is believed to exist.
    /// Cleared when an up-to-date entry is discarded because the node was
    /// not evictable; `set_evictable(true)` then pushes a fresh one.
    in_heap: bool,
}

impl LruKNode {
    fn new(timestamp: u64) -> Self {
        let mut history = VecDeque::new();
        history.push_back(timestamp);
        Self {
            history,
            added_at: timestamp,
            is_evictable: false,
            in_heap: true,
        }
    }

    /// K-th most recent access timestamp, or `TIMESTAMP_NEG_INF` while the
    /// history holds fewer than K entries.
    fn kth_last(&self, k: usize) -> u64 {
        if self.history.len() == k {
            self.history[0]
        } else {
            TIMESTAMP_NEG_INF
        }
    }

    /// Oldest timestamp inside the current window.
    fn earliest(&self) -> u64 {
        self.history[0]
    }
}

/// Snapshot of a node's ordering keys at push time.
///
/// Entries are not updated in place; `evict` compares the snapshot against
/// the live node and discards or refreshes entries that went stale.
#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    frame_id: FrameId,
    kth_last: u64,
    earliest: u64,
}

impl HeapEntry {
    fn snapshot(frame_id: FrameId, k: usize, node: &LruKNode) -> Self {
        Self {
            frame_id,
            kth_last: node.kth_last(k),
            earliest: node.earliest(),
        }
    }
}

// `BinaryHeap` pops the maximum, so the ordering is reversed to surface the
// entry with the smallest (kth_last, earliest) pair, i.e. the largest
// backward K-distance.
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (other.kth_last, other.earliest, other.frame_id).cmp(&(
            self.kth_last,
            self.earliest,
            self.frame_id,
        ))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// LRU-K replacer over a fixed range of frame ids.
///
/// # Thread Safety
///
/// All operations take `&self`; synchronization is internal. A global latch
/// is held shared by the single-frame operations and exclusively by
/// `evict`, per-node mutexes serialize updates to one frame's history, and
/// the lazy heap sits behind its own mutex acquired last.
pub struct LruKReplacer {
    k: usize,
    /// Per-frame nodes, indexed by frame id. `None` until the frame's first
    /// recorded access and again after eviction or removal.
    nodes: Vec<Mutex<Option<LruKNode>>>,
    /// Lazy priority heap of ordering-key snapshots.
    heap: Mutex<BinaryHeap<HeapEntry>>,
    /// Global latch: shared for per-frame updates, exclusive for eviction.
    latch: RwLock<()>,
    /// Monotonic access clock. Starts at 1; 0 is `TIMESTAMP_NEG_INF`.
    clock: AtomicU64,
    /// Number of frames currently tracked and evictable.
    num_evictable: AtomicUsize,
}

impl LruKReplacer {
    /// Creates a replacer tracking frames `0..num_frames` with history
    /// depth `k`.
    ///
    /// # Panics
    ///
    /// Panics if `num_frames` is 0 or `k` is 0.
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(num_frames > 0, "replacer needs at least one frame");
        assert!(k >= 1, "k must be at least 1");
        Self {
            k,
            nodes: (0..num_frames).map(|_| Mutex::new(None)).collect(),
            heap: Mutex::new(BinaryHeap::new()),
            latch: RwLock::new(()),
            clock: AtomicU64::new(1),
            num_evictable: AtomicUsize::new(0),
        }
    }

    fn check_frame_id(&self, frame_id: FrameId) {
        assert!(
            frame_id.as_usize() < self.nodes.len(),
            "frame id {} out of range (replacer tracks {} frames)",
            frame_id.as_usize(),
            self.nodes.len()
        );
    }

    /// Records an access to `frame_id` at the next clock tick.
    ///
    /// The first access creates the frame's node (non-evictable) and its
    /// heap entry; later accesses only update the history, leaving stale
    /// heap entries to be reconciled during `evict`.
    ///
    /// # Panics
    ///
    /// Panics if `frame_id` is out of range.
    pub fn record_access(&self, frame_id: FrameId, access_type: AccessType) {
        self.check_frame_id(frame_id);
        let _latch = self.latch.read();
        let mut slot = self.nodes[frame_id.as_usize()].lock();
        let timestamp = self.clock.fetch_add(1, Ordering::Relaxed);
        match &mut *slot {
            Some(node) => {
                if node.history.len() == self.k {
                    node.history.pop_front();
                }
                node.history.push_back(timestamp);
            }
            empty => {
                let node = LruKNode::new(timestamp);
                self.heap
                    .lock()
                    .push(HeapEntry::snapshot(frame_id, self.k, &node));
                *empty = Some(node);
            }
        }
        tracing::trace!(
            frame_id = frame_id.as_usize(),
            ?access_type,
            timestamp,
            "recorded access"
        );
    }

    /// Marks `frame_id` evictable or not, updating the replacer size.
    ///
    /// A no-op when the state already matches or the frame has no recorded
    /// access.
    ///
    /// # Panics
    ///
    /// Panics if `frame_id` is out of range.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        self.check_frame_id(frame_id);
        let _latch = self.latch.read();
        let mut slot = self.nodes[frame_id.as_usize()].lock();
        let node = match slot.as_mut() {
            Some(node) => node,
            None => return,
        };
        if node.is_evictable == evictable {
            return;
        }
        node.is_evictable = evictable;
        if evictable {
            if !node.in_heap {
                self.heap
                    .lock()
                    .push(HeapEntry::snapshot(frame_id, self.k, node));
                node.in_heap = true;
            }
            self.num_evictable.fetch_add(1, Ordering::Relaxed);
        } else {
            self.num_evictable.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Drops `frame_id`'s access history, regardless of its K-distance.
    ///
    /// A no-op when the frame has no recorded access.
    ///
    /// # Panics
    ///
    /// Panics if `frame_id` is out of range or the frame is not evictable.
    pub fn remove(&self, frame_id: FrameId) {
        self.check_frame_id(frame_id);
        let _latch = self.latch.read();
        let mut slot = self.nodes[frame_id.as_usize()].lock();
        let node = match slot.as_ref() {
            Some(node) => node,
            None => return,
        };
        assert!(
            node.is_evictable,
            "cannot remove non-evictable frame {}",
            frame_id.as_usize()
        );
        *slot = None;
        self.num_evictable.fetch_sub(1, Ordering::Relaxed);
    }

    /// Evicts the evictable frame with the largest backward K-distance and
    /// drops its history. Returns `None` when no frame is evictable.
    ///
    /// Heap entries are reconciled lazily here: entries of dropped nodes
    /// are discarded, entries with outdated ordering keys are replaced by a
    /// fresh snapshot, and an up-to-date entry of a non-evictable node is
    /// discarded with the node flagged for re-insertion on the next
    /// `set_evictable(true)`.
    pub fn evict(&self) -> Option<FrameId> {
        let _latch = self.latch.write();
        let mut heap = self.heap.lock();
        while let Some(top) = heap.pop() {
            let mut slot = self.nodes[top.frame_id.as_usize()].lock();
            let node = match slot.as_mut() {
                Some(node) => node,
                // The node was evicted or removed after this entry was
                // pushed; its current incarnation (if any) has its own.
                None => continue,
            };
            if node.added_at > top.earliest {
                // Entry predates a remove-and-recreate of this frame.
                continue;
            }
            if top.kth_last != node.kth_last(self.k) || top.earliest != node.earliest() {
                // The history moved on since the snapshot; re-enter the
                // node with its current keys and keep going.
                heap.push(HeapEntry::snapshot(top.frame_id, self.k, node));
                continue;
            }
            if !node.is_evictable {
                node.in_heap = false;
                continue;
            }
            *slot = None;
            self.num_evictable.fetch_sub(1, Ordering::Relaxed);
            tracing::debug!(frame_id = top.frame_id.as_usize(), "evicted frame");
            return Some(top.frame_id);
        }
        None
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        let _latch = self.latch.read();
        self.num_evictable.load(Ordering::Relaxed)
    }
}
