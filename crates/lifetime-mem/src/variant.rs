//! Checked views of one variant of a closed object hierarchy.
//!
//! Objects that come in several kinds are modelled as one type (usually an
//! enum) implementing [`Downcast`] for each kind. A [`SharedHandle`] to the
//! whole type can then be narrowed into a [`VariantHandle`] that observes the
//! same object and dereferences to the kind, or `None` if the object is a
//! different kind.

use crate::error::contract_violation;
use crate::shared::{ObjectRef, SharedHandle};
use parking_lot::MappedRwLockReadGuard;
use std::marker::PhantomData;

/// Safe view of `Self` as one of its kinds.
pub trait Downcast<U: ?Sized> {
    fn downcast_ref(&self) -> Option<&U>;
}

/// A [`SharedHandle`] narrowed to one kind of its object.
///
/// It is a full observer: it counts in the object's observer count and
/// releasing it may notify the collector like any shared handle.
pub struct VariantHandle<T: ?Sized, U: ?Sized> {
    handle: SharedHandle<T>,
    _kind: PhantomData<fn() -> *const U>,
}

impl<T: ?Sized> SharedHandle<T> {
    /// Attach a handle that views the object as kind `U`.
    ///
    /// Returns `None` when the object is not a `U`, and when there is no live
    /// object to check.
    pub fn downcast<U: ?Sized>(&self) -> Option<VariantHandle<T, U>>
    where
        T: Downcast<U>,
    {
        let matches = self
            .get()
            .is_some_and(|object| <T as Downcast<U>>::downcast_ref(&*object).is_some());
        matches.then(|| VariantHandle {
            handle: self.clone(),
            _kind: PhantomData,
        })
    }
}

impl<T: ?Sized + Downcast<U>, U: ?Sized> VariantHandle<T, U> {
    /// Read-lock the object as `U`. `None` once the object is dead.
    pub fn get(&self) -> Option<ObjectRef<'_, U>> {
        let object = self.handle.get()?;
        MappedRwLockReadGuard::try_map(object, <T as Downcast<U>>::downcast_ref).ok()
    }

    /// Read-lock the object as `U`, failing fast when it is dead.
    #[track_caller]
    pub fn object(&self) -> ObjectRef<'_, U> {
        match self.get() {
            Some(object) => object,
            None => contract_violation("Dereferenced an expired variant handle"),
        }
    }
}

impl<T: ?Sized, U: ?Sized> VariantHandle<T, U> {
    /// The underlying handle to the whole object.
    pub fn as_handle(&self) -> &SharedHandle<T> {
        &self.handle
    }

    /// Widen back into a handle to the whole object.
    pub fn into_handle(self) -> SharedHandle<T> {
        self.handle
    }

    pub fn count(&self) -> usize {
        self.handle.count()
    }

    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }
}

impl<T: ?Sized, U: ?Sized> Clone for VariantHandle<T, U> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _kind: PhantomData,
        }
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq for VariantHandle<T, U> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl<T: ?Sized, U: ?Sized> std::fmt::Debug for VariantHandle<T, U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("VariantHandle").field(&self.handle).finish()
    }
}
