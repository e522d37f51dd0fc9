//! Pluggable raw-storage allocators used by concrete factories.
//!
//! A factory never reaches for global allocation state: it is handed an
//! [`Allocator`] at construction and may have it swapped later with
//! [`ConcreteFactory::set_allocator`](crate::ConcreteFactory::set_allocator).

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Why a factory is asking for or returning storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocTag {
    /// Storage for a new factory object.
    FactoryNew,
    /// Storage of a destroyed factory object.
    FactoryDelete,
}

/// Source of raw storage for factory objects.
pub trait Allocator: Send + Sync {
    /// Allocate storage for `layout`, or `None` when exhausted.
    fn allocate(&self, layout: Layout, tag: AllocTag) -> Option<NonNull<u8>>;

    /// Return storage previously obtained from [`Allocator::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this allocator with the same
    /// `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout, tag: AllocTag);
}

/// The process global allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

impl Allocator for SystemAllocator {
    fn allocate(&self, layout: Layout, _tag: AllocTag) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            // Aligned, never dereferenced for reads of any byte.
            return NonNull::new(layout.align() as *mut u8);
        }
        // SAFETY: layout has a non-zero size.
        NonNull::new(unsafe { alloc(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout, _tag: AllocTag) {
        if layout.size() != 0 {
            // SAFETY: forwarded caller contract.
            unsafe { dealloc(ptr.as_ptr(), layout) };
        }
    }
}

/// Allocator wrapper that keeps allocation statistics and can enforce a limit
/// on live bytes.
///
/// Allocations that would push live bytes over the limit fail instead of
/// reaching the inner allocator.
///
/// # Example
///
/// ```
/// use lifetime_mem::{AllocTag, Allocator, CountingAllocator, SystemAllocator};
/// use std::alloc::Layout;
///
/// let allocator = CountingAllocator::with_limit(SystemAllocator, 8);
/// let layout = Layout::new::<u64>();
///
/// let block = allocator.allocate(layout, AllocTag::FactoryNew).unwrap();
/// assert!(allocator.allocate(layout, AllocTag::FactoryNew).is_none());
///
/// unsafe { allocator.deallocate(block, layout, AllocTag::FactoryDelete) };
/// assert_eq!(allocator.live_bytes(), 0);
/// ```
#[derive(Debug, Default)]
pub struct CountingAllocator<A = SystemAllocator> {
    inner: A,
    limit: Option<usize>,
    live_bytes: AtomicUsize,
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
    failures: AtomicUsize,
}

impl<A: Allocator> CountingAllocator<A> {
    /// Count every call without limiting anything.
    pub fn new(inner: A) -> Self {
        Self::build(inner, None)
    }

    /// Fail allocations once live bytes would exceed `max_bytes`.
    pub fn with_limit(inner: A, max_bytes: usize) -> Self {
        Self::build(inner, Some(max_bytes))
    }

    fn build(inner: A, limit: Option<usize>) -> Self {
        Self {
            inner,
            limit,
            live_bytes: AtomicUsize::new(0),
            allocations: AtomicUsize::new(0),
            deallocations: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// Successful allocations so far.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn deallocations(&self) -> usize {
        self.deallocations.load(Ordering::SeqCst)
    }

    /// Allocations refused by the limit or the inner allocator.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::SeqCst)
    }

    pub fn live_blocks(&self) -> usize {
        self.allocations().saturating_sub(self.deallocations())
    }
}

impl<A: Allocator> Allocator for CountingAllocator<A> {
    fn allocate(&self, layout: Layout, tag: AllocTag) -> Option<NonNull<u8>> {
        let size = layout.size();
        let total = self.live_bytes.fetch_add(size, Ordering::SeqCst) + size;

        if self.limit.is_some_and(|max| total > max) {
            // Roll back so refused requests do not use up the quota.
            self.live_bytes.fetch_sub(size, Ordering::SeqCst);
            self.failures.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(size, live = total - size, "allocation refused by limit");
            return None;
        }

        match self.inner.allocate(layout, tag) {
            Some(ptr) => {
                self.allocations.fetch_add(1, Ordering::SeqCst);
                Some(ptr)
            }
            None => {
                self.live_bytes.fetch_sub(size, Ordering::SeqCst);
                self.failures.fetch_add(1, Ordering::SeqCst);
                None
            }
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout, tag: AllocTag) {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.deallocate(ptr, layout, tag) };
        self.live_bytes.fetch_sub(layout.size(), Ordering::SeqCst);
        self.deallocations.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_allocator_roundtrip() {
        let layout = Layout::new::<[u64; 4]>();
        let ptr = SystemAllocator.allocate(layout, AllocTag::FactoryNew).unwrap();
        assert_eq!(ptr.as_ptr() as usize % layout.align(), 0);
        unsafe { SystemAllocator.deallocate(ptr, layout, AllocTag::FactoryDelete) };
    }

    #[test]
    fn test_zero_sized_layout() {
        let layout = Layout::new::<()>();
        let ptr = SystemAllocator.allocate(layout, AllocTag::FactoryNew);
        assert!(ptr.is_some());
        unsafe { SystemAllocator.deallocate(ptr.unwrap(), layout, AllocTag::FactoryDelete) };
    }

    #[test]
    fn test_counting_allocator_stats() {
        let allocator = CountingAllocator::new(SystemAllocator);
        let layout = Layout::new::<u32>();

        let a = allocator.allocate(layout, AllocTag::FactoryNew).unwrap();
        let b = allocator.allocate(layout, AllocTag::FactoryNew).unwrap();
        assert_eq!(allocator.allocations(), 2);
        assert_eq!(allocator.live_bytes(), 8);
        assert_eq!(allocator.live_blocks(), 2);

        unsafe {
            allocator.deallocate(a, layout, AllocTag::FactoryDelete);
            allocator.deallocate(b, layout, AllocTag::FactoryDelete);
        }
        assert_eq!(allocator.deallocations(), 2);
        assert_eq!(allocator.live_bytes(), 0);
        assert_eq!(allocator.failures(), 0);
    }

    #[test]
    fn test_limit_rolls_back_refused_request() {
        let allocator = CountingAllocator::with_limit(SystemAllocator, 16);
        let layout = Layout::new::<[u8; 12]>();

        let first = allocator.allocate(layout, AllocTag::FactoryNew).unwrap();
        assert!(allocator.allocate(layout, AllocTag::FactoryNew).is_none());
        assert_eq!(allocator.failures(), 1);
        assert_eq!(allocator.live_bytes(), 12);

        unsafe { allocator.deallocate(first, layout, AllocTag::FactoryDelete) };
        assert!(allocator.allocate(Layout::new::<u8>(), AllocTag::FactoryNew).is_some());
    }
}
