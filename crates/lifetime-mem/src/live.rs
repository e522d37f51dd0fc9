//! The set of reachable objects a factory created, with its own lock.

use crate::collector::{Collector, Unreachable};
use crate::error::contract_violation;
use crate::owning::OwningHandle;
use crate::shared::SharedHandle;
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::Weak;
use tracing::{debug, error, trace};

struct Owners<T: ?Sized> {
    owners: Vec<OwningHandle<T>>,
    /// Owners taken out of the set whose objects are not destroyed yet.
    retired: usize,
    /// Clean-ups currently dropping drained owners.
    teardowns: usize,
}

/// Owning handles of every object a factory created that still has observers.
pub(crate) struct LiveSet<T: ?Sized> {
    inner: Mutex<Owners<T>>,
}

/// Snapshot of a live set's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LiveCounts {
    pub(crate) live: usize,
    pub(crate) retired: usize,
}

impl<T: ?Sized> LiveSet<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Owners {
                owners: Vec::with_capacity(capacity),
                retired: 0,
                teardowns: 0,
            }),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().owners.len()
    }

    pub(crate) fn counts(&self) -> LiveCounts {
        let inner = self.inner.lock();
        LiveCounts {
            live: inner.owners.len(),
            retired: inner.retired,
        }
    }

    pub(crate) fn is_empty_mut(&mut self) -> bool {
        self.inner.get_mut().owners.is_empty()
    }

    /// Take ownership of `object` and hand out its first observer.
    ///
    /// # Safety
    ///
    /// Same contract as [`OwningHandle::new`].
    pub(crate) unsafe fn register(
        &self,
        factory: &str,
        object: NonNull<T>,
        collector: Weak<dyn Collector<T>>,
    ) -> SharedHandle<T> {
        // SAFETY: forwarded caller contract.
        let owner = unsafe { OwningHandle::new(object, collector) };
        let mut inner = self.inner.lock();
        let handle = owner.share();
        inner.owners.push(owner);
        trace!(factory, live = inner.owners.len(), "object registered");
        handle
    }

    /// Remove and return the owner of `object`.
    ///
    /// Objects drained by a running clean-up are no longer in the set; they
    /// are skipped while that clean-up is in progress. Any other miss means a
    /// handle outlived the factory's bookkeeping.
    pub(crate) fn collect(
        &self,
        factory: &str,
        object: Unreachable<'_, T>,
    ) -> Option<OwningHandle<T>> {
        let mut inner = self.inner.lock();
        match inner.owners.iter().position(|owner| object.is_owned_by(owner)) {
            Some(index) => {
                let owner = inner.owners.swap_remove(index);
                inner.retired += 1;
                trace!(factory, live = inner.owners.len(), "object collected");
                Some(owner)
            }
            None if inner.teardowns > 0 => None,
            None => {
                error!(factory, "collected object is not owned by this factory");
                contract_violation("Collected an object the factory does not own")
            }
        }
    }

    /// Record that a collected or drained object has been destroyed.
    pub(crate) fn settle(&self) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.retired > 0, "Settled more objects than were retired");
        inner.retired = inner.retired.saturating_sub(1);
    }

    /// Destroy every live object, returning how many there were.
    ///
    /// Owners are drained under the lock and dropped outside it, so objects
    /// whose destruction releases handles to siblings can re-enter the set.
    pub(crate) fn clean_up(&self, factory: &str) -> usize {
        let drained = {
            let mut inner = self.inner.lock();
            inner.teardowns += 1;
            inner.retired += inner.owners.len();
            std::mem::take(&mut inner.owners)
        };
        let count = drained.len();
        {
            // Cleared even if a destructor unwinds.
            let _teardown = Teardown(self);
            drop(drained);
        }
        debug!(factory, destroyed = count, "live set cleaned up");
        count
    }
}

struct Teardown<'a, T: ?Sized>(&'a LiveSet<T>);

impl<T: ?Sized> Drop for Teardown<'_, T> {
    fn drop(&mut self) {
        self.0.inner.lock().teardowns -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::Arc;

    struct Node {
        peer: Option<SharedHandle<Node>>,
        explode: bool,
    }

    impl Drop for Node {
        fn drop(&mut self) {
            if self.explode {
                panic!("node destructor failed");
            }
        }
    }

    /// Minimal collector over boxed nodes backed by a live set.
    struct Tracker {
        live: LiveSet<Node>,
        this: Weak<Self>,
    }

    impl Tracker {
        fn new() -> Arc<Self> {
            Arc::new_cyclic(|this| Self {
                live: LiveSet::with_capacity(0),
                this: this.clone(),
            })
        }

        fn collector(&self) -> Weak<dyn Collector<Node>> {
            self.this.clone()
        }

        fn boxed(peer: Option<SharedHandle<Node>>, explode: bool) -> NonNull<Node> {
            NonNull::from(Box::leak(Box::new(Node { peer, explode })))
        }

        fn register(&self, node: NonNull<Node>) -> SharedHandle<Node> {
            unsafe { self.live.register("tracker", node, self.collector()) }
        }

        /// An owner this tracker collects for but never registered.
        fn foreign(&self) -> OwningHandle<Node> {
            unsafe { OwningHandle::new(Self::boxed(None, false), self.collector()) }
        }

        fn teardowns(&self) -> usize {
            self.live.inner.lock().teardowns
        }
    }

    impl Collector<Node> for Tracker {
        fn collect(&self, object: Unreachable<'_, Node>) -> Option<OwningHandle<Node>> {
            self.live.collect("tracker", object)
        }

        unsafe fn destroy(&self, object: NonNull<Node>) {
            drop(unsafe { Box::from_raw(object.as_ptr()) });
        }
    }

    #[test]
    fn test_collect_removes_and_retires() {
        let tracker = Tracker::new();
        let handle = tracker.register(Tracker::boxed(None, false));
        assert_eq!(tracker.live.counts(), LiveCounts { live: 1, retired: 0 });

        drop(handle);
        assert_eq!(tracker.live.counts(), LiveCounts { live: 0, retired: 1 });
        tracker.live.settle();
        assert_eq!(tracker.live.counts(), LiveCounts { live: 0, retired: 0 });
    }

    #[test]
    #[should_panic(expected = "does not own")]
    fn test_collect_of_unowned_object_fails_fast() {
        let tracker = Tracker::new();
        let owner = tracker.foreign();
        let observer = owner.share();
        drop(observer);
    }

    #[test]
    fn test_collect_miss_ignored_during_clean_up() {
        let tracker = Tracker::new();
        let owner = tracker.foreign();

        // The only observer of the foreign object lives inside a registered
        // node, so clean-up releases it while draining.
        let holder = tracker.register(Tracker::boxed(Some(owner.share()), false));
        assert!(holder.object().peer.is_some());
        assert_eq!(owner.observer_count(), 1);

        assert_eq!(tracker.live.clean_up("tracker"), 1);
        assert_eq!(owner.observer_count(), 0);
        assert!(owner.get().is_some());
        assert!(!holder.is_alive());
        assert_eq!(tracker.teardowns(), 0);
    }

    #[test]
    fn test_teardown_mark_cleared_when_destructor_panics() {
        let tracker = Tracker::new();
        let fine = tracker.register(Tracker::boxed(None, false));
        let failing = tracker.register(Tracker::boxed(None, true));

        let result = catch_unwind(AssertUnwindSafe(|| tracker.live.clean_up("tracker")));
        assert!(result.is_err());
        assert_eq!(tracker.teardowns(), 0);
        assert_eq!(tracker.live.len(), 0);
        assert!(!fine.is_alive());
        assert!(!failing.is_alive());

        // Misses are fatal again once the clean-up is over
        let owner = tracker.foreign();
        let observer = owner.share();
        let miss = catch_unwind(AssertUnwindSafe(move || drop(observer)));
        assert!(miss.is_err());
    }
}
