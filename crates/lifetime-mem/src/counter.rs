//! Atomic observer count shared by every handle attached to one record.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of shared handles currently attached to a record.
///
/// The owning handle is not counted: a freshly created record starts at zero
/// and only observers move the count.
#[derive(Debug, Default)]
pub(crate) struct ObserverCount(AtomicUsize);

impl ObserverCount {
    /// Create a counter with no observers.
    #[inline]
    pub(crate) const fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    #[inline]
    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// Attach one observer, returning the new count.
    #[inline]
    pub(crate) fn increment(&self) -> usize {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Detach one observer, returning the new count.
    #[inline]
    pub(crate) fn decrement(&self) -> usize {
        let prev = self.0.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "Decrementing zero observer count");
        prev - 1
    }
}
