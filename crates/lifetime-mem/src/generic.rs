//! Thread-safe factory for objects behind a shared interface, built by key.

use crate::collector::{Collector, Unreachable};
use crate::config::FactoryConfig;
use crate::error::FactoryError;
use crate::live::LiveSet;
use crate::owning::OwningHandle;
use crate::registry::{Builder, BuilderRegistry};
use crate::shared::SharedHandle;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::hash::Hash;
use std::ptr::NonNull;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Creates objects of heterogeneous concrete types behind interface `A`,
/// selected by a type key `K`.
///
/// Builders are registered per key; objects are created through the builder
/// registered for the requested key and tracked in a live set exactly like
/// [`ConcreteFactory`](crate::ConcreteFactory) does. Objects are released back
/// to the registry on destruction.
///
/// Builders run with the registry locked and must not call back into the
/// factory.
///
/// # Example
///
/// ```
/// use lifetime_mem::{Builder, GenericFactory};
/// use std::sync::Arc;
///
/// trait Shape: Send + Sync {
///     fn area(&self) -> f64;
/// }
///
/// struct Square(f64);
/// impl Shape for Square {
///     fn area(&self) -> f64 {
///         self.0 * self.0
///     }
/// }
///
/// let shapes = GenericFactory::<dyn Shape>::new();
/// let squares: Arc<dyn Builder<dyn Shape>> =
///     Arc::new(|| Some(Box::new(Square(2.0)) as Box<dyn Shape>));
/// shapes.register(1, squares).unwrap();
///
/// let square = shapes.create(&1).unwrap();
/// assert_eq!(square.object().area(), 4.0);
/// assert!(shapes.create(&2).is_err());
///
/// drop(square);
/// assert_eq!(shapes.live_count(), 0);
/// ```
pub struct GenericFactory<A, K = u32>
where
    A: ?Sized + Send + Sync + 'static,
    K: Eq + Hash + Debug + Send + Sync + 'static,
{
    config: FactoryConfig,
    registry: Mutex<BuilderRegistry<A, K>>,
    live: LiveSet<A>,
    this: Weak<Self>,
}

impl<A, K> GenericFactory<A, K>
where
    A: ?Sized + Send + Sync + 'static,
    K: Eq + Hash + Debug + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Self::with_config(FactoryConfig::default())
    }

    pub fn with_config(config: FactoryConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            registry: Mutex::new(BuilderRegistry::new(config.name())),
            live: LiveSet::with_capacity(config.live_capacity()),
            config,
            this: this.clone(),
        })
    }

    /// Register `builder` for objects of kind `key`.
    pub fn register(&self, key: K, builder: Arc<dyn Builder<A>>) -> Result<(), FactoryError> {
        self.registry.lock().register(key, builder)?;
        debug!(factory = self.name(), "builder registered");
        Ok(())
    }

    /// Remove `builder` from every key it was registered under.
    ///
    /// Objects it already built are unaffected.
    pub fn unregister(&self, builder: &Arc<dyn Builder<A>>) -> usize {
        let removed = self.registry.lock().unregister(builder);
        debug!(factory = self.name(), removed, "builder unregistered");
        removed
    }

    /// Create an object of kind `key`.
    pub fn create(&self, key: &K) -> Result<SharedHandle<A>, FactoryError> {
        // [Critical section] registry, then live set
        let mut registry = self.registry.lock();
        let object = registry.create(key)?;
        // SAFETY: the registry built `object` and only `destroy` releases it.
        Ok(unsafe { self.live.register(self.name(), object, self.collector()) })
    }

    fn collector(&self) -> Weak<dyn Collector<A>> {
        self.this.clone()
    }

    /// Destroy every live object. Same contract as
    /// [`ConcreteFactory::clean_up`](crate::ConcreteFactory::clean_up).
    pub fn clean_up(&self) {
        self.live.clean_up(self.name());

        // Registering and releasing both happen under the registry lock, so
        // every object the registry built is either live or collected and
        // waiting for its destructor to run.
        if cfg!(debug_assertions) {
            let (built, counts) = {
                let registry = self.registry.lock();
                (registry.live_count(), self.live.counts())
            };
            debug_assert!(
                built == counts.live + counts.retired,
                "Factory `{}` registry out of step: {built} built, {} live, {} retired",
                self.name(),
                counts.live,
                counts.retired
            );
            debug!(factory = self.name(), built, live = counts.live, "clean-up cross-check");
        }
    }

    /// Number of objects with at least one outstanding shared handle.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Number of objects the registry built and has not released yet.
    ///
    /// Equal to [`live_count`](Self::live_count) whenever no create or destroy
    /// is in flight.
    pub fn registry_live_count(&self) -> usize {
        self.registry.lock().live_count()
    }

    /// Whether a builder is registered for `key`.
    pub fn is_registered(&self, key: &K) -> bool {
        self.registry.lock().contains(key)
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }
}

impl<A, K> Collector<A> for GenericFactory<A, K>
where
    A: ?Sized + Send + Sync + 'static,
    K: Eq + Hash + Debug + Send + Sync + 'static,
{
    fn collect(&self, object: Unreachable<'_, A>) -> Option<OwningHandle<A>> {
        self.live.collect(self.name(), object)
    }

    unsafe fn destroy(&self, object: NonNull<A>) {
        // [Critical section] registry, then live set
        let boxed = {
            let mut registry = self.registry.lock();
            // SAFETY: the owning handle detached `object`, which this registry built.
            let boxed = unsafe { registry.release(object) };
            self.live.settle();
            boxed
        };
        // Outside the registry lock: the object may hold handles into this factory.
        drop(boxed);
        trace!(factory = self.name(), "object destroyed");
    }
}

impl<A, K> Drop for GenericFactory<A, K>
where
    A: ?Sized + Send + Sync + 'static,
    K: Eq + Hash + Debug + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if !std::thread::panicking() {
            assert!(
                self.live.is_empty_mut(),
                "Factory `{}` dropped with live objects; call clean_up first",
                self.config.name()
            );
        }
    }
}

impl<A, K> std::fmt::Debug for GenericFactory<A, K>
where
    A: ?Sized + Send + Sync + 'static,
    K: Eq + Hash + Debug + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericFactory")
            .field("name", &self.name())
            .field("live", &self.live_count())
            .field("registry", &*self.registry.lock())
            .finish()
    }
}
