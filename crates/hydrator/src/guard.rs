//! Profile mutation guard.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts profile edits in flight. Own-profile hydration is skipped while any
/// edit is open, so it never races an optimistic update.
#[derive(Debug, Clone, Default)]
pub struct MutationGuard {
    depth: Arc<AtomicUsize>,
}

/// Open profile edit. Dropping the ticket ends it.
#[derive(Debug)]
#[must_use = "the mutation ends when the ticket is dropped"]
pub struct MutationTicket {
    depth: Arc<AtomicUsize>,
}

impl MutationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> MutationTicket {
        self.depth.fetch_add(1, Ordering::SeqCst);
        MutationTicket { depth: self.depth.clone() }
    }

    pub fn is_in_flight(&self) -> bool {
        self.depth.load(Ordering::SeqCst) > 0
    }
}

impl Drop for MutationTicket {
    fn drop(&mut self) {
        let _ = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| Some(depth.saturating_sub(1)));
    }
}
