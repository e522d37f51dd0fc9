//! Copyable observer handles that report unreachability to their collector.

use crate::collector::Unreachable;
use crate::error::contract_violation;
use crate::owning::OwningHandle;
use crate::record::Record;
use crate::scoped::ScopedHandle;
use parking_lot::MappedRwLockReadGuard;
use std::ptr::NonNull;
use std::sync::Arc;

/// Read guard over an object reached through a [`SharedHandle`].
///
/// While a guard is alive the object cannot be destroyed; a destroy started
/// on another thread waits for it.
pub type ObjectRef<'a, T> = MappedRwLockReadGuard<'a, T>;

/// A reference-counted observer of a collector-managed object.
///
/// Shared handles do not own the object. Each one counts once in the object's
/// observer count; when the last one is released while the object is still
/// alive, the object's collector is told that it became unreachable
/// ([`Collector::collect`](crate::Collector::collect)). If the owner destroyed
/// the object first, handles stay attached but see it as dead.
///
/// # Example
///
/// ```
/// use lifetime_mem::{ConcreteFactory, SystemAllocator};
/// use std::sync::Arc;
///
/// let factory = ConcreteFactory::<String>::new(Arc::new(SystemAllocator));
/// let a = factory.create_from("shared".to_string()).unwrap();
/// let b = a.clone();
///
/// assert_eq!(a, b);
/// assert_eq!(a.count(), 2);
/// assert_eq!(b.get().as_deref().map(String::as_str), Some("shared"));
/// ```
pub struct SharedHandle<T: ?Sized> {
    record: Option<Arc<Record<T>>>,
}

impl<T: ?Sized> SharedHandle<T> {
    /// A handle attached to nothing.
    #[inline]
    pub const fn empty() -> Self {
        Self { record: None }
    }

    fn attach(record: Option<&Arc<Record<T>>>) -> Self {
        let record = record.map(|record| {
            record.observers().increment();
            Arc::clone(record)
        });
        Self { record }
    }

    /// Read-lock the object. `None` when empty or when the object is dead.
    pub fn get(&self) -> Option<ObjectRef<'_, T>> {
        self.record.as_ref().and_then(|record| record.read())
    }

    /// Read-lock the object, failing fast when there is none.
    #[track_caller]
    pub fn object(&self) -> ObjectRef<'_, T> {
        match self.get() {
            Some(object) => object,
            None => contract_violation("Dereferenced an empty or expired shared handle"),
        }
    }

    /// Current observer count, `0` when empty.
    pub fn count(&self) -> usize {
        self.record
            .as_ref()
            .map_or(0, |record| record.observers().get())
    }

    /// Raw object pointer, `None` when empty or dead.
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.record.as_ref().and_then(|record| record.object_ptr())
    }

    /// Whether the handle resolves to a live object.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.as_ptr().is_some()
    }

    /// Whether the handle is attached to a record, alive or not.
    #[inline]
    pub fn is_attached(&self) -> bool {
        self.record.is_some()
    }

    /// Whether the handle resolves to exactly `object` (address comparison).
    pub fn points_to(&self, object: NonNull<T>) -> bool {
        self.as_ptr()
            .is_some_and(|own| std::ptr::addr_eq(own.as_ptr(), object.as_ptr()))
    }

    /// Re-attach to the object owned by `owner`.
    pub fn assign_owner(&mut self, owner: &OwningHandle<T>) {
        *self = Self::from(owner);
    }

    /// Detach from the record.
    ///
    /// Releasing the last observer of a live object notifies its collector.
    /// Releasing the last observer of a dead object frees the record.
    /// Resetting an empty handle is a no-op.
    pub fn reset(&mut self) {
        if let Some(record) = self.record.take() {
            release(record);
        }
    }
}

fn release<T: ?Sized>(record: Arc<Record<T>>) {
    if record.observers().decrement() != 0 {
        return;
    }
    // Pin the object while reporting it so the owner cannot destroy it in
    // between; the collector hands the owner back and it is dropped unpinned.
    let pinned = record.pin();
    let reclaimed = match (*pinned, record.collector()) {
        (Some(object), Some(collector)) => collector.collect(Unreachable::new(&record, object)),
        _ => None,
    };
    drop(pinned);
    drop(reclaimed);
}

impl<T: ?Sized> Default for SharedHandle<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized> Clone for SharedHandle<T> {
    fn clone(&self) -> Self {
        Self::attach(self.record.as_ref())
    }

    fn clone_from(&mut self, source: &Self) {
        // Copy then swap: attaching first keeps self-assignment from
        // releasing the last observer.
        let mut attached = source.clone();
        std::mem::swap(self, &mut attached);
    }
}

impl<T: ?Sized> Drop for SharedHandle<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> From<&OwningHandle<T>> for SharedHandle<T> {
    fn from(owner: &OwningHandle<T>) -> Self {
        Self::attach(owner.record())
    }
}

impl<T: ?Sized> From<&ScopedHandle<'_, T>> for SharedHandle<T> {
    fn from(scoped: &ScopedHandle<'_, T>) -> Self {
        Self::attach(Some(scoped.record()))
    }
}

/// Equal when attached to the same record, or when both resolve to no object.
impl<T: ?Sized> PartialEq for SharedHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.record, &other.record) {
            (Some(a), Some(b)) if Arc::ptr_eq(a, b) => true,
            _ => !self.is_alive() && !other.is_alive(),
        }
    }
}

impl<T: ?Sized> Eq for SharedHandle<T> {}

impl<T: ?Sized> std::fmt::Debug for SharedHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedHandle")
            .field("object", &self.as_ptr().map(|p| p.as_ptr() as *const ()))
            .field("count", &self.count())
            .finish()
    }
}
