//! Process-unique request identifiers for shared-memory exchanges.
//!
//! # Why not the thread id? (for beginners)
//!
//! Every Pageant request uses a named shared-memory region.  If two requests
//! that are in flight at the same time pick the same name, they overwrite each
//! other's data.  A thread id looks unique, but the OS recycles it as soon as
//! the thread exits, and an async runtime runs many connections on the same
//! worker thread.  A counter that only ever goes up cannot repeat within the
//! process, and mixing in the process id keeps two bridge processes apart.
//!
//! # Thread safety
//!
//! The counter is an `AtomicU64`: `fetch_add` reads and increments in a single
//! indivisible step, so concurrent callers never receive the same value.

use std::sync::atomic::{AtomicU64, Ordering};

/// Prefix of every shared-memory region name, as expected by Pageant.
pub const REGION_NAME_PREFIX: &str = "PageantRequest";

/// Hands out request ids that are unique for the lifetime of the process.
///
/// # Examples
///
/// ```rust
/// use agent_bridge_core::RequestIdGenerator;
///
/// let ids = RequestIdGenerator::new();
/// assert_ne!(ids.next_region_name(), ids.next_region_name());
/// ```
#[derive(Debug)]
pub struct RequestIdGenerator {
    process_id: u32,
    counter: AtomicU64,
}

impl RequestIdGenerator {
    /// Creates a generator for the current process, starting at 0.
    pub fn new() -> Self {
        Self::with_process_id(std::process::id())
    }

    /// Creates a generator with an explicit process id (useful in tests).
    pub fn with_process_id(process_id: u32) -> Self {
        Self {
            process_id,
            counter: AtomicU64::new(0),
        }
    }

    /// Returns the next id and atomically increments the counter.
    pub fn next_id(&self) -> u64 {
        // Relaxed: the value only has to be unique, it orders no other memory.
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns a fresh shared-memory region name.
    ///
    /// Format: `PageantRequest{pid:08x}{id:016x}`, always 38 ASCII characters.
    pub fn next_region_name(&self) -> String {
        format!(
            "{REGION_NAME_PREFIX}{:08x}{:016x}",
            self.process_id,
            self.next_id()
        )
    }

    /// Number of ids handed out so far.
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
