//! # hookcache
//!
//! Cache-aside orchestration over pluggable key/value backends.
//!
//! ```text
//! CacheAside::run ──> Hook (SingleObject | MultiObject | SingleCollection | MultiCollection)
//!                       └─> CacheController (prefix, mode, TTL, error policy)
//!                             └─> dyn CacheStorage (TtlStore or your backend)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use hookcache::{CacheAside, CacheController, CacheError, MultiObject, TtlStore};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CacheError> {
//!     let cache = CacheController::with_defaults(Arc::new(TtlStore::new()));
//!     let users = cache.add_prefix(["Users"]);
//!
//!     let names: HashMap<u32, String> = CacheAside::new()
//!         .run(MultiObject::new(users, [1, 2]), |info| async move {
//!             // Only ids missing from the cache reach the producer
//!             Ok::<_, CacheError>(
//!                 info.not_found
//!                     .into_iter()
//!                     .map(|id| (id, format!("user-{id}")))
//!                     .collect(),
//!             )
//!         })
//!         .await?;
//!
//!     assert_eq!(names.len(), 2);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod hooks;

pub use config::CacheConfig;
pub use core::{
    AccessMode, CacheController, CacheStorage, DeferredValue, Fields, Increment, StoreStats,
    TtlStore,
};
pub use error::{CacheError, Result};
pub use hooks::{
    CacheAside, CacheId, Cached, CollectionInfo, Hook, Members, MultiCollection, MultiObject,
    MultiObjectInfo, ObjectInfo, OwnerInfo, SENTINEL, SingleCollection, SingleObject, Validator,
    WriteMode,
};
