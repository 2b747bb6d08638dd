//! Storage capability contract.
//!
//! Every backend the controller can drive (the in-process [`TtlStore`] or a
//! networked store) implements [`CacheStorage`]. Keys reaching a backend are
//! already namespaced by the controller; values are opaque JSON.
//!
//! [`TtlStore`]: super::ttl_store::TtlStore

use super::types::{DeferredValue, Fields, Increment};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Pluggable key/hash store.
///
/// # Errors
///
/// Backend failures should be reported as [`CacheError::Backend`] or
/// [`CacheError::Unavailable`]; the controller turns them into misses.
/// Accessing a scalar key as a hash (or the reverse) must be reported as
/// [`CacheError::WrongType`].
///
/// # TTL
///
/// `ttl` of `None` or zero means the entry never expires. Every write resets
/// the expiry of the key it touches.
///
/// [`CacheError::Backend`]: crate::CacheError::Backend
/// [`CacheError::Unavailable`]: crate::CacheError::Unavailable
/// [`CacheError::WrongType`]: crate::CacheError::WrongType
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Backend name used in log lines.
    fn name(&self) -> &str;

    /// Whether a scalar value is stored under `key`.
    async fn exists_key(&self, key: &str) -> Result<bool>;

    /// Presence of the selected hash fields.
    ///
    /// With [`Fields::All`] only present fields are reported.
    async fn exists_hash_fields(&self, key: &str, fields: &Fields)
    -> Result<HashMap<String, bool>>;

    async fn read_key(&self, key: &str) -> Result<Option<Value>>;

    /// Values of the selected hash fields. Missing fields are left out.
    async fn read_hash_fields(&self, key: &str, fields: &Fields) -> Result<HashMap<String, Value>>;

    async fn write_key(&self, key: &str, value: DeferredValue, ttl: Option<Duration>)
    -> Result<()>;

    /// Point-writes `values` into the hash, creating it if needed.
    async fn write_hash_fields(
        &self,
        key: &str,
        values: HashMap<String, DeferredValue>,
        ttl: Option<Duration>,
    ) -> Result<()>;

    async fn remove_key(&self, key: &str) -> Result<()>;

    /// Removes the selected fields; [`Fields::All`] removes the whole hash.
    async fn remove_hash_fields(&self, key: &str, fields: &Fields) -> Result<()>;

    /// Adds `by` to the counter unless the result would exceed `limit`.
    ///
    /// `ttl` applies when the counter is created.
    async fn increment_key(
        &self,
        key: &str,
        by: i64,
        limit: i64,
        ttl: Option<Duration>,
    ) -> Result<Increment>;

    async fn increment_hash_field(
        &self,
        key: &str,
        field: &str,
        by: i64,
        limit: i64,
        ttl: Option<Duration>,
    ) -> Result<Increment>;
}
