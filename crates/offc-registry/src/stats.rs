use std::sync::atomic::{AtomicU64, Ordering};

/// Diagnostic counters for [`crate::migrate_batch`].
#[derive(Debug, Default)]
pub struct DispatchStats {
    batches: AtomicU64,
    batches_offloaded: AtomicU64,
    pairs_offloaded: AtomicU64,
    pairs_rejected: AtomicU64,
    backend_failures: AtomicU64,
    pairs_default: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    /// Non-empty batches seen.
    pub batches: u64,
    /// Batches a backend completed (fully or for its admissible subset).
    pub batches_offloaded: u64,
    pub pairs_offloaded: u64,
    /// Pairs a backend's predicate declined.
    pub pairs_rejected: u64,
    /// Backend calls that returned an error.
    pub backend_failures: u64,
    /// Pairs copied by the default path for any reason.
    pub pairs_default: u64,
}

impl DispatchStats {
    pub(crate) fn batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn offloaded(&self, pairs: usize) {
        self.batches_offloaded.fetch_add(1, Ordering::Relaxed);
        self.pairs_offloaded
            .fetch_add(pairs as u64, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self, pairs: usize) {
        self.pairs_rejected
            .fetch_add(pairs as u64, Ordering::Relaxed);
    }

    pub(crate) fn backend_failure(&self) {
        self.backend_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn default_copy(&self, pairs: usize) {
        self.pairs_default
            .fetch_add(pairs as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            batches_offloaded: self.batches_offloaded.load(Ordering::Relaxed),
            pairs_offloaded: self.pairs_offloaded.load(Ordering::Relaxed),
            pairs_rejected: self.pairs_rejected.load(Ordering::Relaxed),
            backend_failures: self.backend_failures.load(Ordering::Relaxed),
            pairs_default: self.pairs_default.load(Ordering::Relaxed),
        }
    }
}
