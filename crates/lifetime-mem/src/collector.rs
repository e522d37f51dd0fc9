//! The callback pair every collector-backed object model implements.

use crate::owning::OwningHandle;
use crate::record::Record;
use std::ptr::NonNull;
use std::sync::Arc;

/// Receives the two lifetime events of objects it is responsible for.
///
/// - [`collect`](Collector::collect) fires when the last [`SharedHandle`]
///   attached to a still-alive object is released. The object is unreachable
///   but has not been destroyed yet.
/// - [`destroy`](Collector::destroy) fires when the [`OwningHandle`] of an
///   object is reset. The object must be physically released.
///
/// `collect` runs while the object is pinned, so it must not drop the owning
/// handle it is tracking: it hands it back instead and the caller drops it
/// once the pin is released. Dropping it inline deadlocks.
///
/// [`SharedHandle`]: crate::SharedHandle
pub trait Collector<T: ?Sized>: Send + Sync {
    /// The last observer of `object` is gone.
    ///
    /// Returns the owning handle of `object` if this collector was tracking
    /// it, which the caller then drops (triggering [`Collector::destroy`]).
    fn collect(&self, object: Unreachable<'_, T>) -> Option<OwningHandle<T>>;

    /// Physically release `object`.
    ///
    /// # Safety
    ///
    /// `object` must have been produced by this collector's allocation path,
    /// must not be accessed afterwards, and must be destroyed only once. Owning
    /// handles uphold this by taking the pointer out of their record first.
    unsafe fn destroy(&self, object: NonNull<T>);
}

/// An object whose last observer was just released, pinned alive for the
/// duration of [`Collector::collect`].
///
/// Identity is the object's record, not its address: zero-sized objects
/// share addresses, and freed addresses get reused.
pub struct Unreachable<'a, T: ?Sized> {
    record: &'a Arc<Record<T>>,
    object: NonNull<T>,
}

impl<'a, T: ?Sized> Unreachable<'a, T> {
    pub(crate) fn new(record: &'a Arc<Record<T>>, object: NonNull<T>) -> Self {
        Self { record, object }
    }

    #[inline]
    pub fn as_ptr(&self) -> NonNull<T> {
        self.object
    }

    /// Whether `owner` is the owning handle of this object.
    pub fn is_owned_by(&self, owner: &OwningHandle<T>) -> bool {
        owner
            .record()
            .is_some_and(|record| Arc::ptr_eq(record, self.record))
    }
}

impl<T: ?Sized> std::fmt::Debug for Unreachable<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Unreachable")
            .field(&(self.object.as_ptr() as *const ()))
            .finish()
    }
}
