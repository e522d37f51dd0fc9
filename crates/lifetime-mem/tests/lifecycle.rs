//! End-to-end lifetime tests
//!
//! These exercise the factories, handles and allocators together:
//! - creation and collection through concrete and generic factories
//! - clean-up racing with handles released on other threads
//! - objects holding handles to siblings in the same factory
//! - allocator accounting across whole lifecycles

use lifetime_mem::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

/// Counts how many times values holding it were dropped.
#[derive(Clone, Default)]
struct DropCounter(Arc<AtomicUsize>);

impl DropCounter {
    fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

struct Tracked {
    value: u64,
    drops: DropCounter,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn counting() -> Arc<CountingAllocator> {
    Arc::new(CountingAllocator::new(SystemAllocator))
}

// =============================================================================
// CONCRETE FACTORY: single-threaded lifecycle
// =============================================================================

mod concrete_lifecycle {
    use super::*;

    #[derive(Default)]
    struct Widget {
        id: u32,
    }

    #[test]
    fn widget_lifecycle() {
        let allocator = counting();
        let widgets = ConcreteFactory::<Widget>::with_config(
            allocator.clone(),
            FactoryConfig::default().named("widgets"),
        );

        let h1 = widgets.create().unwrap();
        let h2 = h1.clone();
        assert_eq!(h1.count(), 2);
        assert_eq!(h1, h2);
        assert_eq!(h2.object().id, 0);

        drop(h1);
        assert_eq!(h2.count(), 1);
        assert_eq!(widgets.live_count(), 1);
        assert_eq!(allocator.deallocations(), 0);

        drop(h2);
        assert_eq!(widgets.live_count(), 0);
        assert_eq!(allocator.allocations(), 1);
        assert_eq!(allocator.deallocations(), 1);
        assert_eq!(allocator.live_bytes(), 0);
    }

    #[test]
    fn destroyed_exactly_once() {
        let drops = DropCounter::default();
        let factory = ConcreteFactory::<Tracked>::new(counting());

        let handle = factory
            .create_from(Tracked {
                value: 1,
                drops: drops.clone(),
            })
            .unwrap();
        let copies: Vec<_> = (0..16).map(|_| handle.clone()).collect();
        assert_eq!(handle.count(), 17);

        drop(copies);
        assert_eq!(drops.get(), 0);
        drop(handle);
        assert_eq!(drops.get(), 1);
        assert_eq!(factory.live_count(), 0);
    }

    #[test]
    fn reset_is_idempotent() {
        let factory = ConcreteFactory::<u32>::new(counting());
        let mut handle = factory.create_from(3).unwrap();

        handle.reset();
        handle.reset();
        assert!(!handle.is_attached());
        assert_eq!(handle.count(), 0);
        assert_eq!(factory.live_count(), 0);
    }

    #[test]
    fn reassignment_collects_previous_object() {
        let drops = DropCounter::default();
        let factory = ConcreteFactory::<Tracked>::new(counting());
        let make = |value| {
            factory
                .create_from(Tracked {
                    value,
                    drops: drops.clone(),
                })
                .unwrap()
        };

        let mut handle = make(1);
        let other = make(2);
        handle.clone_from(&other);

        assert_eq!(drops.get(), 1);
        assert_eq!(handle.object().value, 2);
        assert_eq!(other.count(), 2);
        assert_eq!(factory.live_count(), 1);
    }

    #[test]
    fn observers_after_clean_up_see_dead_objects() {
        let drops = DropCounter::default();
        let factory = ConcreteFactory::<Tracked>::new(counting());
        let a = factory
            .create_from(Tracked {
                value: 1,
                drops: drops.clone(),
            })
            .unwrap();
        let b = factory
            .create_from(Tracked {
                value: 2,
                drops: drops.clone(),
            })
            .unwrap();
        assert_ne!(a, b);

        factory.clean_up();
        assert_eq!(drops.get(), 2);
        assert!(a.get().is_none());
        assert!(b.as_ptr().is_none());

        // Both dead: they compare equal to each other and to an empty handle
        assert_eq!(a, b);
        assert_eq!(a, SharedHandle::empty());
    }

    #[test]
    fn out_of_memory_then_recovery() {
        // Storage per object, including the factory's bookkeeping
        let per_object = {
            let measuring = Arc::new(CountingAllocator::new(SystemAllocator));
            let factory = ConcreteFactory::<u64>::new(measuring.clone());
            let handle = factory.create_from(0).unwrap();
            let size = measuring.live_bytes();
            drop(handle);
            size
        };
        assert!(per_object >= 8);

        let allocator = Arc::new(CountingAllocator::with_limit(SystemAllocator, 3 * per_object));
        let factory = ConcreteFactory::<u64>::with_config(
            allocator.clone(),
            FactoryConfig::default().named("numbers"),
        );

        let held: Vec<_> = (0..3).map(|i| factory.create_from(i).unwrap()).collect();
        let err = factory.create_from(3).unwrap_err();
        assert!(matches!(err, FactoryError::OutOfMemory { size, .. } if size == per_object));
        assert!(err.to_string().contains("numbers"));
        assert_eq!(factory.live_count(), 3);

        drop(held);
        let handle = factory.create_from(4).unwrap();
        assert_eq!(*handle.object(), 4);
        assert_eq!(allocator.failures(), 1);
    }
}

// =============================================================================
// NESTED OBJECTS: handles to siblings held inside factory objects
// =============================================================================

mod nested_patterns {
    use super::*;

    struct Node {
        name: &'static str,
        child: Option<SharedHandle<Node>>,
        drops: DropCounter,
    }

    impl Drop for Node {
        fn drop(&mut self) {
            self.drops.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn chain(factory: &ConcreteFactory<Node>, drops: &DropCounter, len: usize) -> SharedHandle<Node> {
        let mut head: Option<SharedHandle<Node>> = None;
        for _ in 0..len {
            let node = factory
                .create_from(Node {
                    name: "node",
                    child: head.take(),
                    drops: drops.clone(),
                })
                .unwrap();
            head = Some(node);
        }
        head.unwrap()
    }

    #[test]
    fn dropping_head_collects_whole_chain() {
        let drops = DropCounter::default();
        let factory = ConcreteFactory::<Node>::new(counting());
        let head = chain(&factory, &drops, 10);
        assert_eq!(factory.live_count(), 10);
        assert_eq!(head.object().name, "node");

        drop(head);
        assert_eq!(drops.get(), 10);
        assert_eq!(factory.live_count(), 0);
    }

    #[test]
    fn clean_up_with_nested_handles() {
        let drops = DropCounter::default();
        let allocator = counting();
        let factory = ConcreteFactory::<Node>::new(allocator.clone());
        let head = chain(&factory, &drops, 10);
        let child = {
            let object = head.object();
            object.child.clone()
        };

        factory.clean_up();
        assert_eq!(drops.get(), 10);
        assert_eq!(factory.live_count(), 0);
        assert!(!head.is_alive());
        assert!(child.is_some_and(|handle| !handle.is_alive()));
        assert_eq!(allocator.live_blocks(), 0);
    }
}

// =============================================================================
// CONCURRENCY: observers shared across threads
// =============================================================================

mod concurrent_patterns {
    use super::*;

    #[test]
    fn clone_and_drop_from_many_threads() {
        let allocator = counting();
        let factory = ConcreteFactory::<String>::new(allocator.clone());
        let handle = factory.create_from("shared".to_string()).unwrap();

        thread::scope(|scope| {
            for _ in 0..8 {
                let local = handle.clone();
                scope.spawn(move || {
                    for _ in 0..10_000 {
                        let copy = local.clone();
                        assert_eq!(copy.object().as_str(), "shared");
                        drop(copy);
                    }
                });
            }
        });

        assert_eq!(handle.count(), 1);
        assert_eq!(factory.live_count(), 1);
        drop(handle);
        assert_eq!(factory.live_count(), 0);
        assert_eq!(allocator.deallocations(), 1);
    }

    #[test]
    fn clean_up_while_other_thread_holds_handles() {
        let drops = DropCounter::default();
        let factory = ConcreteFactory::<Tracked>::new(counting());
        let mut handles: Vec<_> = (0..100)
            .map(|value| {
                factory
                    .create_from(Tracked {
                        value,
                        drops: drops.clone(),
                    })
                    .unwrap()
            })
            .collect();
        let theirs = handles.split_off(50);
        let barrier = Barrier::new(2);

        thread::scope(|scope| {
            scope.spawn(|| {
                barrier.wait();
                for handle in &theirs {
                    assert!(!handle.is_alive());
                }
                drop(theirs);
            });

            factory.clean_up();
            barrier.wait();
        });

        assert_eq!(drops.get(), 100);
        assert!(handles.iter().all(|handle| handle.get().is_none()));
        drop(handles);
        assert_eq!(factory.live_count(), 0);
    }

    #[test]
    fn clean_up_racing_with_releases() {
        let drops = DropCounter::default();
        let allocator = counting();
        let factory = ConcreteFactory::<Tracked>::new(allocator.clone());
        let handles: Vec<_> = (0..1_000)
            .map(|value| {
                factory
                    .create_from(Tracked {
                        value,
                        drops: drops.clone(),
                    })
                    .unwrap()
            })
            .collect();
        let barrier = Barrier::new(2);

        thread::scope(|scope| {
            scope.spawn(|| {
                barrier.wait();
                drop(handles);
            });

            barrier.wait();
            factory.clean_up();
        });

        // Every object destroyed once, by whichever side got to it first
        assert_eq!(drops.get(), 1_000);
        assert_eq!(factory.live_count(), 0);
        assert_eq!(allocator.live_blocks(), 0);
    }

    #[test]
    fn concurrent_creation() {
        let allocator = counting();
        let factory = ConcreteFactory::<u64>::new(allocator.clone());

        thread::scope(|scope| {
            for t in 0..4 {
                let factory = &factory;
                scope.spawn(move || {
                    let handles: Vec<_> = (0..500)
                        .map(|i| factory.create_from(t * 1_000 + i).unwrap())
                        .collect();
                    for (i, handle) in (0_u64..).zip(&handles) {
                        assert_eq!(*handle.object(), t * 1_000 + i);
                    }
                });
            }
        });

        assert_eq!(factory.live_count(), 0);
        assert_eq!(allocator.allocations(), 2_000);
        assert_eq!(allocator.deallocations(), 2_000);
    }
}

// =============================================================================
// GENERIC FACTORY: keyed creation behind an interface
// =============================================================================

mod generic_patterns {
    use super::*;

    trait Shape: Send + Sync {
        fn area(&self) -> f64;
    }

    struct Circle {
        radius: f64,
    }

    impl Shape for Circle {
        fn area(&self) -> f64 {
            std::f64::consts::PI * self.radius * self.radius
        }
    }

    struct Rect {
        w: f64,
        h: f64,
    }

    impl Shape for Rect {
        fn area(&self) -> f64 {
            self.w * self.h
        }
    }

    #[derive(Debug, PartialEq, Eq, Hash)]
    enum Kind {
        Circle,
        Rect,
        Polygon,
    }

    fn shapes() -> Arc<GenericFactory<dyn Shape, Kind>> {
        let factory = GenericFactory::<dyn Shape, Kind>::with_config(
            FactoryConfig::default().named("shapes").with_live_capacity(64),
        );
        factory
            .register(
                Kind::Circle,
                Arc::new(|| Some(Box::new(Circle { radius: 1.0 }) as Box<dyn Shape>)),
            )
            .unwrap();
        factory
            .register(
                Kind::Rect,
                Arc::new(|| Some(Box::new(Rect { w: 2.0, h: 3.0 }) as Box<dyn Shape>)),
            )
            .unwrap();
        factory
    }

    #[test]
    fn create_each_kind() {
        let factory = shapes();
        let circle = factory.create(&Kind::Circle).unwrap();
        let rect = factory.create(&Kind::Rect).unwrap();

        assert!((circle.object().area() - std::f64::consts::PI).abs() < 1e-9);
        assert_eq!(rect.object().area(), 6.0);

        let err = factory.create(&Kind::Polygon).unwrap_err();
        assert_eq!(
            err.to_string(),
            "factory `shapes`: no builder registered for type Polygon"
        );
    }

    #[test]
    fn registry_and_live_set_stay_in_lockstep() {
        let factory = shapes();

        thread::scope(|scope| {
            for t in 0..4 {
                let factory = &factory;
                scope.spawn(move || {
                    let kind = if t % 2 == 0 { Kind::Circle } else { Kind::Rect };
                    let mut kept = Vec::new();
                    for i in 0..1_000 {
                        let shape = factory.create(&kind).unwrap();
                        if i % 10 == 0 {
                            kept.push(shape);
                        }
                    }
                    assert_eq!(kept.len(), 100);
                });
            }
        });

        assert_eq!(factory.live_count(), 0);
        assert_eq!(factory.registry_live_count(), 0);

        let held: Vec<_> = (0..20).map(|_| factory.create(&Kind::Rect).unwrap()).collect();
        assert_eq!(factory.live_count(), 20);
        assert_eq!(factory.registry_live_count(), 20);

        factory.clean_up();
        assert_eq!(factory.live_count(), 0);
        assert_eq!(factory.registry_live_count(), 0);
        assert!(held.iter().all(|shape| !shape.is_alive()));
    }
}

// =============================================================================
// SCOPED AND VARIANT HANDLES
// =============================================================================

mod view_patterns {
    use super::*;

    struct Mesh {
        vertices: usize,
    }

    struct Light {
        lumens: u32,
    }

    enum Asset {
        Mesh(Mesh),
        Light(Light),
    }

    impl Downcast<Mesh> for Asset {
        fn downcast_ref(&self) -> Option<&Mesh> {
            match self {
                Asset::Mesh(mesh) => Some(mesh),
                Asset::Light(_) => None,
            }
        }
    }

    impl Downcast<Light> for Asset {
        fn downcast_ref(&self) -> Option<&Light> {
            match self {
                Asset::Light(light) => Some(light),
                Asset::Mesh(_) => None,
            }
        }
    }

    #[test]
    fn variant_handle_counts_as_observer() {
        let factory = ConcreteFactory::<Asset>::new(counting());
        let asset = factory
            .create_from(Asset::Mesh(Mesh { vertices: 42 }))
            .unwrap();

        assert!(asset.downcast::<Light>().is_none());
        let mesh = asset.downcast::<Mesh>().unwrap();
        assert_eq!(mesh.object().vertices, 42);
        assert_eq!(asset.count(), 2);

        // The narrowed handle alone keeps the object reachable
        drop(asset);
        assert_eq!(factory.live_count(), 1);
        assert_eq!(mesh.get().map(|mesh| mesh.vertices), Some(42));

        drop(mesh);
        assert_eq!(factory.live_count(), 0);
    }

    #[test]
    fn variant_handle_on_light() {
        let factory = ConcreteFactory::<Asset>::new(counting());
        let asset = factory
            .create_from(Asset::Light(Light { lumens: 800 }))
            .unwrap();
        let light = asset.downcast::<Light>().unwrap();

        factory.clean_up();
        assert!(!light.is_alive());
        assert!(light.get().is_none());
        assert_eq!(light.into_handle(), asset);
    }

    #[test]
    fn scoped_handle_inside_thread_scope() {
        let settings = String::from("fullscreen");

        ScopedHandle::scope(&settings, |this| {
            thread::scope(|scope| {
                for _ in 0..4 {
                    let observer = this.share();
                    scope.spawn(move || {
                        assert_eq!(observer.object().as_str(), "fullscreen");
                    });
                }
            });
            assert_eq!(this.observer_count(), 0);
        });
    }
}
