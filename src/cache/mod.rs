//! Cache coordination.
//!
//! Maps each source key to exactly one [`CacheEntry`]. The first `prepare`
//! for a key inserts a pending entry and spawns its acquisition: resolve the
//! link, download into `cache_dir/<sha256(key)>.bin`, optionally persist to
//! the chunk store. Readers can stream from the entry while it is pending.

mod coordinator;
mod download;
mod entry;

pub use coordinator::{start_cleanup_task, CacheCoordinator, CoordinatorOptions, PrepareRequest};
pub use entry::{Backing, CacheEntry, EntryStatus, EntryView};
