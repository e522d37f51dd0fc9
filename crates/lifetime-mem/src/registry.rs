//! Builder registry: maps type keys to object builders.

use crate::error::FactoryError;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::ptr::NonNull;
use std::sync::Arc;

/// Builds objects of one concrete kind behind an abstract interface `A`.
///
/// Closures returning `Option<Box<A>>` are builders.
pub trait Builder<A: ?Sized>: Send + Sync {
    /// Build a fresh object, `None` if it could not be built.
    fn build(&self) -> Option<Box<A>>;
}

impl<A: ?Sized, F> Builder<A> for F
where
    F: Fn() -> Option<Box<A>> + Send + Sync,
{
    fn build(&self) -> Option<Box<A>> {
        self()
    }
}

/// Key to builder table, plus a count of the objects built and not yet
/// released through it.
///
/// The same builder may be registered under several keys.
pub struct BuilderRegistry<A: ?Sized, K = u32> {
    name: String,
    builders: HashMap<K, Arc<dyn Builder<A>>>,
    live: usize,
}

impl<A: ?Sized, K: Eq + Hash + Debug> BuilderRegistry<A, K> {
    /// An empty registry; `name` is used in errors.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            builders: HashMap::new(),
            live: 0,
        }
    }

    /// Register `builder` under `key`.
    ///
    /// A key maps to one builder; registering it again fails and keeps the
    /// existing entry.
    pub fn register(&mut self, key: K, builder: Arc<dyn Builder<A>>) -> Result<(), FactoryError> {
        if self.builders.contains_key(&key) {
            return Err(FactoryError::AlreadyRegistered {
                factory: self.name.clone(),
                kind: format!("{key:?}"),
            });
        }
        self.builders.insert(key, builder);
        Ok(())
    }

    /// Remove every key bound to `builder`, returning how many were removed.
    pub fn unregister(&mut self, builder: &Arc<dyn Builder<A>>) -> usize {
        let before = self.builders.len();
        self.builders
            .retain(|_, registered| !Arc::ptr_eq(registered, builder));
        before - self.builders.len()
    }

    /// Build an object of kind `key`.
    ///
    /// The returned pointer comes from a `Box` and must eventually be handed
    /// back to [`release`](Self::release).
    pub fn create(&mut self, key: &K) -> Result<NonNull<A>, FactoryError> {
        let builder = self
            .builders
            .get(key)
            .ok_or_else(|| FactoryError::UnknownType {
                factory: self.name.clone(),
                kind: format!("{key:?}"),
            })?;
        let object = builder.build().ok_or_else(|| FactoryError::BuildFailed {
            factory: self.name.clone(),
            kind: format!("{key:?}"),
        })?;
        self.live += 1;
        Ok(NonNull::from(Box::leak(object)))
    }

    /// Take back an object built by [`create`](Self::create).
    ///
    /// The box is returned rather than dropped so the caller can run the
    /// object's destructor outside whatever lock guards the registry.
    ///
    /// # Safety
    ///
    /// `object` must come from `create` on this registry and must not be
    /// released twice or used afterwards.
    pub unsafe fn release(&mut self, object: NonNull<A>) -> Box<A> {
        debug_assert!(self.live > 0, "Released more objects than were built");
        self.live -= 1;
        // SAFETY: caller contract; `create` leaked this box.
        unsafe { Box::from_raw(object.as_ptr()) }
    }

    /// Objects built and not yet released.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.builders.contains_key(key)
    }
}

impl<A: ?Sized, K> std::fmt::Debug for BuilderRegistry<A, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderRegistry")
            .field("name", &self.name)
            .field("builders", &self.builders.len())
            .field("live", &self.live)
            .finish()
    }
}
