//! Buffer pool for page caching.
//!
//! The buffer pool manager maps logical pages onto a fixed array of
//! in-memory frames, pins them on behalf of callers, and writes dirty
//! frames back through the disk scheduler before they are reused. Victim
//! frames are chosen by an LRU-K replacer.
//!
//! # Example
//!
//! ```no_run
//! use pagecache::buffer::{BufferPoolConfig, BufferPoolManager};
//! use pagecache::disk::MemoryDisk;
//!
//! let pool = BufferPoolManager::new(MemoryDisk::new(), BufferPoolConfig::default());
//!
//! // Allocate and write a new page
//! let page_id = {
//!     let mut guard = pool.new_page_guarded().unwrap();
//!     guard[0..5].copy_from_slice(b"hello");
//!     guard.page_id()
//! }; // Unpins and marks dirty
//!
//! // Read the page back
//! let guard = pool.fetch_page_read(page_id).unwrap();
//! assert_eq!(&guard[0..5], b"hello");
//! ```

mod frame;
mod guard;
mod pool;
mod replacer;

pub use frame::FrameId;
pub use guard::{PageGuard, ReadPageGuard, WritePageGuard};
pub use pool::{BufferPoolConfig, BufferPoolManager};
pub use replacer::{AccessType, LruKReplacer};
