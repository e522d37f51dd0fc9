//! Unique strong ownership of a collector-managed object.

use crate::collector::Collector;
use crate::error::contract_violation;
use crate::record::Record;
use crate::shared::SharedHandle;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::{Arc, Weak};

/// The single strong owner of a heap object.
///
/// An `OwningHandle` is move-only. Resetting or dropping it asks the object's
/// collector to destroy the object. Observers ([`SharedHandle`]s) attached to
/// it keep the record alive and see the object as dead from then on.
///
/// Factories keep their owning handles in a live set; application code usually
/// only ever sees shared handles.
///
/// # Example
///
/// ```
/// use lifetime_mem::{ConcreteFactory, SystemAllocator};
/// use std::sync::Arc;
///
/// let factory = ConcreteFactory::<u64>::new(Arc::new(SystemAllocator));
/// let handle = factory.create_from(7).unwrap();
/// assert_eq!(*handle.object(), 7);
/// drop(handle);
/// assert_eq!(factory.live_count(), 0);
/// ```
pub struct OwningHandle<T: ?Sized> {
    record: Option<Arc<Record<T>>>,
}

impl<T: ?Sized> OwningHandle<T> {
    /// Take ownership of `object`, reporting its destruction to `collector`.
    ///
    /// # Safety
    ///
    /// `object` must be valid for reads from any thread until `collector`'s
    /// [`Collector::destroy`] is called with it, and nothing else may destroy
    /// it. The collector must be able to destroy it.
    pub unsafe fn new(object: NonNull<T>, collector: Weak<dyn Collector<T>>) -> Self {
        debug_assert!(
            collector.strong_count() > 0,
            "Owning handle constructed without a live collector"
        );
        Self {
            record: Some(Record::new(object, Some(collector))),
        }
    }

    /// An owning handle that owns nothing.
    #[inline]
    pub const fn empty() -> Self {
        Self { record: None }
    }

    /// Move ownership out of `self`, leaving it empty.
    #[inline]
    pub fn transfer(&mut self) -> Self {
        Self {
            record: self.record.take(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.record.is_none()
    }

    /// Get a reference to the owned object.
    ///
    /// Only the owner can detach its own object, and that needs `&mut self`,
    /// so the reference is valid for as long as the borrow.
    pub fn get(&self) -> Option<&T> {
        let object = self.as_ptr()?;
        // SAFETY: see above; the pointer stays attached while `self` is borrowed.
        Some(unsafe { &*object.as_ptr() })
    }

    /// Raw pointer to the owned object.
    #[inline]
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.record.as_ref().and_then(|record| record.object_ptr())
    }

    /// Whether this handle owns exactly `object` (address comparison).
    pub fn points_to(&self, object: NonNull<T>) -> bool {
        self.as_ptr()
            .is_some_and(|own| std::ptr::addr_eq(own.as_ptr(), object.as_ptr()))
    }

    /// Number of shared handles observing the owned object.
    pub fn observer_count(&self) -> usize {
        self.record
            .as_ref()
            .map_or(0, |record| record.observers().get())
    }

    /// Attach a new observer.
    pub fn share(&self) -> SharedHandle<T> {
        SharedHandle::from(self)
    }

    pub(crate) fn record(&self) -> Option<&Arc<Record<T>>> {
        self.record.as_ref()
    }

    /// Destroy the owned object and leave the handle empty.
    ///
    /// Observers keep the record alive and see a dead object; with no
    /// observers the record is freed here. Resetting an empty handle is a no-op.
    pub fn reset(&mut self) {
        let Some(record) = self.record.take() else {
            return;
        };
        let Some(object) = record.detach() else {
            return;
        };
        match record.collector() {
            // SAFETY: `detach` handed us the only copy of the pointer.
            Some(collector) => unsafe { collector.destroy(object) },
            None => tracing::warn!("collector dropped before its object; object leaked"),
        }
    }
}

impl<T: ?Sized> Default for OwningHandle<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized> Drop for OwningHandle<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Deref for OwningHandle<T> {
    type Target = T;

    #[track_caller]
    fn deref(&self) -> &T {
        match self.get() {
            Some(object) => object,
            None => contract_violation("Dereferenced an empty owning handle"),
        }
    }
}

/// Two owning handles are equal when they own the same record, or are both empty.
impl<T: ?Sized> PartialEq for OwningHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.record, &other.record) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: ?Sized> Eq for OwningHandle<T> {}

impl<T: ?Sized> std::fmt::Debug for OwningHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwningHandle")
            .field("object", &self.as_ptr().map(|p| p.as_ptr() as *const ()))
            .field("observers", &self.observer_count())
            .finish()
    }
}
