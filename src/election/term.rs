use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic term counter shared between the driver loop and in-flight RPC
/// tasks. A term never decreases for the lifetime of the node; it lives in
/// memory only, so election safety across process restarts is not guaranteed.
#[derive(Debug, Default)]
pub struct TermRegister {
    value: AtomicU64,
}

impl TermRegister {
    pub fn new(initial: u64) -> Self {
        Self {
            value: AtomicU64::new(initial),
        }
    }

    /// Read the current term.
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Increment and return the new term (new election).
    pub fn next(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Raise the term to `term` if it is ahead; otherwise leave it alone.
    pub fn update_to(&self, term: u64) {
        self.value.fetch_max(term, Ordering::SeqCst);
    }

    /// Whether the current term is strictly behind `term`.
    pub fn is_before(&self, term: u64) -> bool {
        self.current() < term
    }
}
