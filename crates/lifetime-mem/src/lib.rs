//! # Lifetime-Mem
//!
//! Deterministic, thread-safe object lifetimes without a tracing collector.
//!
//! Every object has exactly one strong owner and any number of observers.
//! Losing the last observer tells the object's collector that it became
//! unreachable; resetting the owner destroys it on the spot. Observers that
//! outlive the object see it as dead instead of dangling.
//!
//! ## Features
//!
//! - **Owning handles**: move-only strong ownership, destroy on reset
//! - **Shared handles**: atomic observer counting, unreachability notification
//! - **Scoped handles**: observers of objects that live on the stack or inside another object
//! - **Variant handles**: checked views of one kind of a closed hierarchy
//! - **Concrete factories**: typed creation over a pluggable [`Allocator`]
//! - **Generic factories**: keyed creation through registered [`Builder`]s
//! - **Clean-up**: bulk destruction of everything a factory still tracks
//!
//! ## Quick Start
//!
//! ```rust
//! use lifetime_mem::{ConcreteFactory, SystemAllocator};
//! use std::sync::Arc;
//!
//! let factory = ConcreteFactory::<String>::new(Arc::new(SystemAllocator));
//! let handle = factory.create_from("hello".to_string()).unwrap();
//! let observer = handle.clone();
//! println!("{}", *observer.object());
//!
//! drop(handle);
//! drop(observer); // Unreachable: collected and destroyed here
//! assert_eq!(factory.live_count(), 0);
//! ```

mod alloc;
mod collector;
mod concrete;
mod config;
mod counter;
mod error;
mod generic;
mod live;
mod owning;
mod record;
mod registry;
mod scoped;
mod shared;
mod variant;

pub use alloc::{AllocTag, Allocator, CountingAllocator, SystemAllocator};
pub use collector::{Collector, Unreachable};
pub use concrete::ConcreteFactory;
pub use config::FactoryConfig;
pub use error::FactoryError;
pub use generic::GenericFactory;
pub use owning::OwningHandle;
pub use registry::{Builder, BuilderRegistry};
pub use scoped::ScopedHandle;
pub use shared::{ObjectRef, SharedHandle};
pub use variant::{Downcast, VariantHandle};
