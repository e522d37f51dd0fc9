//! Counter record backing every handle to one object.

use crate::collector::Collector;
use crate::counter::ObserverCount;
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use std::ptr::NonNull;
use std::sync::{Arc, Weak};

/// Shared state behind one object: observer count, object pointer, collector.
///
/// The object pointer is `Some` until the object is physically destroyed (or
/// its scope ends). Records are reference counted through `Arc`: the owning
/// or scoped handle holds one reference, each observer another, so the record
/// itself is freed once the owner has let go and the last observer detaches.
pub(crate) struct Record<T: ?Sized> {
    observers: ObserverCount,
    object: RwLock<Option<NonNull<T>>>,
    collector: Option<Weak<dyn Collector<T>>>,
}

// SAFETY: the record hands out `&T` to any thread holding a handle and may
// drop `T` on whichever thread resets the owner, so `T` must be both.
unsafe impl<T: ?Sized + Send + Sync> Send for Record<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for Record<T> {}

impl<T: ?Sized> Record<T> {
    pub(crate) fn new(object: NonNull<T>, collector: Option<Weak<dyn Collector<T>>>) -> Arc<Self> {
        Arc::new(Self {
            observers: ObserverCount::new(),
            object: RwLock::new(Some(object)),
            collector,
        })
    }

    #[inline]
    pub(crate) fn observers(&self) -> &ObserverCount {
        &self.observers
    }

    /// Current object pointer, `None` once detached.
    #[inline]
    pub(crate) fn object_ptr(&self) -> Option<NonNull<T>> {
        *self.object.read_recursive()
    }

    /// Read-lock the object. `None` if it was already detached.
    ///
    /// Recursive read so a thread holding one guard can take another while a
    /// detach is pending on a different thread.
    pub(crate) fn read(&self) -> Option<MappedRwLockReadGuard<'_, T>> {
        RwLockReadGuard::try_map(self.object.read_recursive(), |slot| {
            // SAFETY: the pointer stays valid while the read lock is held;
            // detaching requires the write lock.
            (*slot).map(|object| unsafe { &*object.as_ptr() })
        })
        .ok()
    }

    /// Read-locked raw view of the slot, used to pin the object while its
    /// collector is notified.
    pub(crate) fn pin(&self) -> RwLockReadGuard<'_, Option<NonNull<T>>> {
        self.object.read_recursive()
    }

    /// Detach the object pointer, waiting for every outstanding reader.
    pub(crate) fn detach(&self) -> Option<NonNull<T>> {
        self.object.write().take()
    }

    /// Upgrade the collector reference, if there is one and it is still alive.
    pub(crate) fn collector(&self) -> Option<Arc<dyn Collector<T>>> {
        self.collector.as_ref().and_then(Weak::upgrade)
    }
}
