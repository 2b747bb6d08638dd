pub mod controller;
pub mod storage;
pub mod ttl_store;
pub mod types;

pub use controller::CacheController;
pub use storage::CacheStorage;
pub use ttl_store::TtlStore;
pub use types::{AccessMode, DeferredValue, Fields, Increment, StoreStats};
