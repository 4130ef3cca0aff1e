//! Stores Core
//!
//! This crate provides observable stores and an effect runtime on top of
//! them. It implements:
//!
//! - Stores with lazily started producers (start/stop handlers)
//! - Derived stores computed from one, many or named sources
//! - Effects that track the stores they read and re-run on change
//! - Batching of effect re-runs and disposal of effect groups
//!
//! Everything is single-threaded: stores are `Rc`-based and the effect
//! runtime is confined to the thread that uses it.
//!
//! # Architecture
//!
//! - `store`: store types, subscriptions and the derive engine
//! - `effect`: reactive roots, effect tracking and batching
//! - `error`: the error type shared by the effect layer
//!
//! # Example
//!
//! ```rust,ignore
//! use stores_core::prelude::*;
//!
//! let count = Store::new(1);
//! let doubled = derive(count.clone(), |n| n * 2);
//!
//! let root = make_reactive_root();
//! let d = doubled.clone();
//! root.make_effect(move || {
//!     println!("doubled: {}", d.watch());
//! })?; // prints "doubled: 2"
//!
//! count.set(5)?; // prints "doubled: 10"
//! root.dispose()?;
//! ```

pub mod effect;
pub mod error;
pub mod store;

pub use effect::{
    batch_effects, make_reactive_root, runtime_stats, Cleanup, EffectId, ReactiveRoot, RootId,
    RuntimeStats,
};
pub use error::ReactiveError;
pub use store::{derive, derive_with_config, Readable, ReadonlyStore, Store, StoreConfig, Unsubscribe};

/// The types most programs need.
pub mod prelude {
    pub use crate::effect::{batch_effects, make_reactive_root, Cleanup, ReactiveRoot};
    pub use crate::error::ReactiveError;
    pub use crate::store::{
        derive, derive_with_config, DerivedStoreConfig, Readable, ReadonlyStore, Setter, Store,
        StoreConfig, Unsubscribe,
    };
}
