//! Scope-bound self-handles for objects that are not factory managed.

use crate::record::Record;
use crate::shared::SharedHandle;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

/// Lets an object that lives on the stack (or inside another value) hand out
/// [`SharedHandle`]s to itself.
///
/// The handle does not own the object and has no collector: releasing the last
/// observer does nothing, and when the scope ends the object is detached so
/// that observers which outlive it see a dead object instead of dangling
/// memory.
///
/// # Example
///
/// ```
/// use lifetime_mem::ScopedHandle;
///
/// let config = String::from("settings");
/// let escaped = ScopedHandle::scope(&config, |this| {
///     let observer = this.share();
///     assert_eq!(observer.object().as_str(), "settings");
///     observer
/// });
///
/// // The scope has ended, the observer outlived it.
/// assert!(escaped.get().is_none());
/// ```
pub struct ScopedHandle<'a, T: ?Sized> {
    record: Arc<Record<T>>,
    _scope: PhantomData<&'a T>,
}

impl<'a, T: ?Sized> ScopedHandle<'a, T> {
    /// Run `f` with a self-handle to `object`, detaching it afterwards.
    ///
    /// The handle is detached when `f` returns or unwinds. Detaching waits
    /// until no [`ObjectRef`](crate::ObjectRef) to the object is held, so a
    /// guard must not outlive `f`: one held by the calling thread across the
    /// end of the scope blocks it forever, and one held by another thread
    /// delays the return until that thread lets go.
    pub fn scope<R>(object: &'a T, f: impl FnOnce(&ScopedHandle<'a, T>) -> R) -> R {
        // SAFETY: the handle never leaves this frame, so it is dropped (and
        // the object detached) before the borrow of `object` ends.
        let handle = unsafe { Self::new(object) };
        f(&handle)
    }

    /// Create a self-handle to `object`.
    ///
    /// # Safety
    ///
    /// The handle must be dropped before `object` is moved or destroyed.
    /// Forgetting the handle leaves observers with a dangling pointer.
    pub unsafe fn new(object: &'a T) -> Self {
        Self {
            record: Record::new(NonNull::from(object), None),
            _scope: PhantomData,
        }
    }

    /// Attach a new observer.
    pub fn share(&self) -> SharedHandle<T> {
        SharedHandle::from(self)
    }

    /// Whether this handle refers to `object`.
    pub fn points_to(&self, object: &T) -> bool {
        self.record
            .object_ptr()
            .is_some_and(|own| std::ptr::addr_eq(own.as_ptr(), object as *const T))
    }

    pub fn observer_count(&self) -> usize {
        self.record.observers().get()
    }

    pub(crate) fn record(&self) -> &Arc<Record<T>> {
        &self.record
    }
}

impl<T: ?Sized> Drop for ScopedHandle<'_, T> {
    fn drop(&mut self) {
        // Waits for observers currently reading the object.
        self.record.detach();
    }
}

impl<T: ?Sized> std::fmt::Debug for ScopedHandle<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedHandle")
            .field("observers", &self.observer_count())
            .finish()
    }
}
