//! Thread-safe factory for objects of one concrete type.

use crate::alloc::{AllocTag, Allocator};
use crate::collector::{Collector, Unreachable};
use crate::config::FactoryConfig;
use crate::error::FactoryError;
use crate::live::LiveSet;
use crate::owning::OwningHandle;
use crate::shared::SharedHandle;
use parking_lot::Mutex;
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Storage block of one object: the allocator that provided it, then the
/// object itself.
#[repr(C)]
struct Slot<T> {
    allocator: Arc<dyn Allocator>,
    value: T,
}

impl<T> Slot<T> {
    const LAYOUT: Layout = Layout::new::<Self>();

    /// Recover the slot holding `value`.
    ///
    /// # Safety
    ///
    /// `value` must point at the `value` field of a live `Slot<T>`.
    unsafe fn containing(value: NonNull<T>) -> NonNull<Self> {
        let offset = std::mem::offset_of!(Self, value);
        // SAFETY: caller contract; the slot starts `offset` bytes earlier.
        unsafe { NonNull::new_unchecked(value.as_ptr().cast::<u8>().sub(offset).cast()) }
    }
}

/// Creates objects of type `T` in storage from a pluggable [`Allocator`] and
/// tracks every reachable one in a live set.
///
/// `create` returns a [`SharedHandle`]; the factory keeps the object's
/// [`OwningHandle`]. When the last shared handle goes away the factory is
/// notified, drops the owner, and the object is destroyed and deallocated on
/// the spot.
///
/// The allocator and the live set are guarded by separate locks: allocation
/// never blocks live-set lookups, and vice versa. Each object's storage
/// remembers the allocator it came from and is returned to it, whatever the
/// factory's allocator is by then.
///
/// # Example
///
/// ```
/// use lifetime_mem::{ConcreteFactory, CountingAllocator, SystemAllocator};
/// use std::sync::Arc;
///
/// #[derive(Default)]
/// struct Widget {
///     id: u32,
/// }
///
/// let allocator = Arc::new(CountingAllocator::new(SystemAllocator));
/// let widgets = ConcreteFactory::<Widget>::new(allocator.clone());
///
/// let h1 = widgets.create().unwrap();
/// let h2 = h1.clone();
/// assert_eq!(h1.count(), 2);
/// assert_eq!(h2.object().id, 0);
///
/// drop(h1);
/// drop(h2);
/// assert_eq!(widgets.live_count(), 0);
/// assert_eq!(allocator.deallocations(), 1);
/// ```
pub struct ConcreteFactory<T: Send + Sync + 'static> {
    config: FactoryConfig,
    allocator: Mutex<Arc<dyn Allocator>>,
    live: LiveSet<T>,
    this: Weak<Self>,
}

impl<T: Send + Sync + 'static> ConcreteFactory<T> {
    pub fn new(allocator: Arc<dyn Allocator>) -> Arc<Self> {
        Self::with_config(allocator, FactoryConfig::default())
    }

    pub fn with_config(allocator: Arc<dyn Allocator>, config: FactoryConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            live: LiveSet::with_capacity(config.live_capacity()),
            config,
            allocator: Mutex::new(allocator),
            this: this.clone(),
        })
    }

    /// Create a default-initialized object.
    pub fn create(&self) -> Result<SharedHandle<T>, FactoryError>
    where
        T: Default,
    {
        self.create_with(T::default)
    }

    /// Create an object holding `value`.
    pub fn create_from(&self, value: T) -> Result<SharedHandle<T>, FactoryError> {
        self.create_with(|| value)
    }

    /// Create an object initialized by `init`.
    ///
    /// `init` runs before any factory lock is taken. If the allocator is
    /// exhausted the value is dropped and [`FactoryError::OutOfMemory`] is
    /// returned; the live set is left untouched. The storage requested is
    /// slightly larger than `T`: it also holds a reference to the allocator.
    pub fn create_with(&self, init: impl FnOnce() -> T) -> Result<SharedHandle<T>, FactoryError> {
        let value = init();
        let layout = Slot::<T>::LAYOUT;

        // [Critical section] allocator
        let object = {
            let allocator = self.allocator.lock();
            let storage = allocator
                .allocate(layout, AllocTag::FactoryNew)
                .ok_or_else(|| FactoryError::OutOfMemory {
                    factory: self.name().to_string(),
                    size: layout.size(),
                })?;
            let slot = storage.cast::<Slot<T>>().as_ptr();
            // SAFETY: freshly allocated storage sized and aligned for the slot.
            unsafe {
                slot.write(Slot {
                    allocator: Arc::clone(&allocator),
                    value,
                });
                NonNull::new_unchecked(std::ptr::addr_of_mut!((*slot).value))
            }
        };

        // [Critical section] live set
        // SAFETY: `object` is initialized and only `destroy` releases it.
        Ok(unsafe { self.live.register(self.name(), object, self.collector()) })
    }

    fn collector(&self) -> Weak<dyn Collector<T>> {
        self.this.clone()
    }

    /// Destroy every live object.
    ///
    /// Shared handles still held elsewhere see their objects as dead
    /// afterwards. Must not be called while holding a read guard on one of
    /// this factory's objects.
    pub fn clean_up(&self) {
        self.live.clean_up(self.name());
    }

    /// Number of objects with at least one outstanding shared handle.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn allocator(&self) -> Arc<dyn Allocator> {
        Arc::clone(&self.allocator.lock())
    }

    /// Replace the allocator used for new objects.
    ///
    /// Objects created before the swap keep their allocator alive and are
    /// returned to it when destroyed.
    pub fn set_allocator(&self, allocator: Arc<dyn Allocator>) {
        *self.allocator.lock() = allocator;
        debug!(factory = self.name(), live = self.live.len(), "allocator replaced");
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }
}

impl<T: Send + Sync + 'static> Collector<T> for ConcreteFactory<T> {
    fn collect(&self, object: Unreachable<'_, T>) -> Option<OwningHandle<T>> {
        self.live.collect(self.name(), object)
    }

    unsafe fn destroy(&self, object: NonNull<T>) {
        // SAFETY: `object` was written by `create_with` into a slot and is
        // destroyed once.
        let slot = unsafe { Slot::containing(object) }.as_ptr();

        // Dropped outside the allocator lock: the value may own handles to
        // other objects of this factory.
        // SAFETY: see above; the allocator field is moved out exactly once.
        let allocator = unsafe {
            std::ptr::drop_in_place(object.as_ptr());
            std::ptr::addr_of!((*slot).allocator).read()
        };

        // [Critical section] allocator
        {
            let _serialized = self.allocator.lock();
            // SAFETY: the slot came from this allocator with this layout.
            unsafe {
                allocator.deallocate(
                    NonNull::new_unchecked(slot).cast(),
                    Slot::<T>::LAYOUT,
                    AllocTag::FactoryDelete,
                );
            }
        }
        drop(allocator);

        self.live.settle();
        trace!(factory = self.name(), "object destroyed");
    }
}

impl<T: Send + Sync + 'static> Drop for ConcreteFactory<T> {
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

impl<T: Send + Sync + 'static> std::fmt::Debug for ConcreteFactory<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcreteFactory")
            .field("name", &self.name())
            .field("live", &self.live_count())
            .finish()
    }
}
