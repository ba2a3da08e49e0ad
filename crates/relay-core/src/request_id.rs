//! Request id allocation.

use std::sync::atomic::{AtomicI32, Ordering};

/// Hands out positive request ids that increase until they wrap at `i32::MAX`.
///
/// One allocator is shared by every ingestion task; ids are unique within
/// the allocator's lifetime but not across process restarts.
#[derive(Debug, Default)]
pub struct RequestIdAllocator {
    last: AtomicI32,
}

impl RequestIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts allocation after `last`, so the first id is `last + 1`.
    pub fn starting_after(last: i32) -> Self {
        Self {
            last: AtomicI32::new(last.max(0)),
        }
    }

    /// Returns the next id. After `i32::MAX` allocation wraps back to 1.
    pub fn next_id(&self) -> i32 {
        let advance = |last: i32| Some(if last >= i32::MAX { 1 } else { last + 1 });
        match self
            .last
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, advance)
        {
            Ok(previous) | Err(previous) => advance(previous).unwrap_or(1),
        }
    }

    /// Returns `requested` when it is positive, otherwise a freshly allocated id.
    pub fn resolve(&self, requested: i32) -> i32 {
        if requested > 0 {
            requested
        } else {
            self.next_id()
        }
    }
}
