//! Stores: observable values with lazily activated producers.
//!
//! - [`Store`] can be written to directly
//! - [`ReadonlyStore`] only changes through its start handler
//! - [`derive`] builds a read-only store from other stores

mod config;
mod derived;
mod readonly;
mod subscriber;
mod writable;

pub use config::{DerivedStoreConfig, EqualityComparator, StartHandler, StopHandler, StoreConfig};
pub use derived::{derive, derive_with_config, OnReport, SourceHandles, SourceShape, Sources};
pub use readonly::{Readable, ReadonlyStore, Setter, StoreId};
pub use subscriber::{Subscriber, SubscriberId, Unsubscribe};
pub use writable::Store;
