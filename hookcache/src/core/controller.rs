//! Policy wrapper over a [`CacheStorage`]
//!
//! A controller namespaces keys, gates operations by [`AccessMode`] and applies
//! the default TTL. Reconfiguration never mutates: `add_prefix`, `set_mode`,
//! `set_ttl` and `set_logging` return a specialized copy sharing the backend.
//!
//! Backend failures never escape a controller. They are logged and reported as
//! the same miss value a disallowed operation returns. Only programmer errors
//! (see [`CacheError::is_programmer_error`](crate::CacheError::is_programmer_error))
//! are propagated.

use super::storage::CacheStorage;
use super::types::{AccessMode, DeferredValue, Fields, Increment};
use crate::config::CacheConfig;
use crate::error::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct CacheController {
    storage: Arc<dyn CacheStorage>,
    name: String,
    separator: String,
    prefix: String,
    ttl: Duration,
    mode: AccessMode,
    log: bool,
}

impl fmt::Debug for CacheController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheController")
            .field("backend", &self.storage.name())
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .field("mode", &self.mode)
            .field("log", &self.log)
            .finish()
    }
}

impl CacheController {
    /// Create a controller from configuration
    pub fn new(storage: Arc<dyn CacheStorage>, config: CacheConfig) -> Self {
        Self {
            storage,
            ttl: config.default_ttl(),
            name: config.name,
            separator: config.separator,
            prefix: config.prefix,
            mode: config.mode,
            log: config.log,
        }
    }

    /// Create a controller with default configuration
    pub fn with_defaults(storage: Arc<dyn CacheStorage>) -> Self {
        Self::new(storage, CacheConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn logging(&self) -> bool {
        self.log
    }

    /********************* Builders *********************/

    /// Copy with each part appended to the prefix, separator-joined
    #[must_use]
    pub fn add_prefix<I, P>(&self, parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: fmt::Display,
    {
        let mut clone = self.clone();
        for part in parts {
            clone.prefix = if clone.prefix.is_empty() {
                part.to_string()
            } else {
                format!("{}{}{}", clone.prefix, self.separator, part)
            };
        }
        clone
    }

    #[must_use]
    pub fn set_mode(&self, mode: AccessMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }

    /// Copy with a new default TTL. Zero disables expiry.
    #[must_use]
    pub fn set_ttl(&self, ttl: Duration) -> Self {
        Self {
            ttl,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn set_logging(&self, log: bool) -> Self {
        Self {
            log,
            ..self.clone()
        }
    }

    /// Namespaced backend key; an empty or absent key addresses the prefix itself
    pub fn key(&self, key: Option<&str>) -> String {
        match key {
            None | Some("") => self.prefix.clone(),
            Some(key) if self.prefix.is_empty() => key.to_string(),
            Some(key) => format!("{}{}{}", self.prefix, self.separator, key),
        }
    }

    fn expiry(&self) -> Option<Duration> {
        (!self.ttl.is_zero()).then_some(self.ttl)
    }

    /// Run a backend call, converting cache-domain failures into `miss`
    async fn guard<T, F>(
        &self,
        op: &str,
        key: &str,
        detail: &(dyn fmt::Display + Sync),
        miss: T,
        call: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        match call.await {
            Ok(value) => {
                if self.log {
                    debug!(
                        "({} ms) {}.{}({}{}) ok",
                        start.elapsed().as_millis(),
                        self.storage.name(),
                        op,
                        key,
                        detail
                    );
                }
                Ok(value)
            }
            Err(e) if e.is_programmer_error() => Err(e),
            Err(e) => {
                warn!(
                    "{}.{}({}{}) failed, treating as miss: {}",
                    self.storage.name(),
                    op,
                    key,
                    detail,
                    e
                );
                Ok(miss)
            }
        }
    }

    /********************* Operations *********************/

    pub async fn exists_key(&self, key: Option<&str>) -> Result<bool> {
        if !self.mode.can_read() {
            return Ok(false);
        }
        let key = self.key(key);
        self.guard("exists", &key, &"", false, self.storage.exists_key(&key))
            .await
    }

    pub async fn exists_hash_fields(
        &self,
        key: Option<&str>,
        fields: &Fields,
    ) -> Result<HashMap<String, bool>> {
        if !self.mode.can_read() {
            return Ok(HashMap::new());
        }
        let key = self.key(key);
        let detail = FieldsDetail(fields);
        self.guard(
            "exists",
            &key,
            &detail,
            HashMap::new(),
            self.storage.exists_hash_fields(&key, fields),
        )
        .await
    }

    pub async fn read_key(&self, key: Option<&str>) -> Result<Option<Value>> {
        if !self.mode.can_read() {
            return Ok(None);
        }
        let key = self.key(key);
        self.guard("read", &key, &"", None, self.storage.read_key(&key))
            .await
    }

    pub async fn read_hash_fields(
        &self,
        key: Option<&str>,
        fields: &Fields,
    ) -> Result<HashMap<String, Value>> {
        if !self.mode.can_read() {
            return Ok(HashMap::new());
        }
        let key = self.key(key);
        let detail = FieldsDetail(fields);
        self.guard(
            "read",
            &key,
            &detail,
            HashMap::new(),
            self.storage.read_hash_fields(&key, fields),
        )
        .await
    }

    pub async fn write_key(&self, key: Option<&str>, value: Value) -> Result<()> {
        self.write_key_deferred(key, DeferredValue::ready(value))
            .await
    }

    /// Hand a value that may still be produced to the backend
    pub async fn write_key_deferred(&self, key: Option<&str>, value: DeferredValue) -> Result<()> {
        if !self.mode.can_write() {
            return Ok(());
        }
        let key = self.key(key);
        self.guard(
            "write",
            &key,
            &"",
            (),
            self.storage.write_key(&key, value, self.expiry()),
        )
        .await
    }

    pub async fn write_hash_fields(
        &self,
        key: Option<&str>,
        values: HashMap<String, Value>,
    ) -> Result<()> {
        let values = values
            .into_iter()
            .map(|(field, value)| (field, DeferredValue::ready(value)))
            .collect();
        self.write_hash_fields_deferred(key, values).await
    }

    pub async fn write_hash_fields_deferred(
        &self,
        key: Option<&str>,
        values: HashMap<String, DeferredValue>,
    ) -> Result<()> {
        if !self.mode.can_write() {
            return Ok(());
        }
        let key = self.key(key);
        let written = Fields::Only(values.keys().cloned().collect());
        let detail = FieldsDetail(&written);
        self.guard(
            "write",
            &key,
            &detail,
            (),
            self.storage.write_hash_fields(&key, values, self.expiry()),
        )
        .await
    }

    pub async fn remove_key(&self, key: Option<&str>) -> Result<()> {
        if !self.mode.can_write() {
            return Ok(());
        }
        let key = self.key(key);
        self.guard("remove", &key, &"", (), self.storage.remove_key(&key))
            .await
    }

    pub async fn remove_hash_fields(&self, key: Option<&str>, fields: &Fields) -> Result<()> {
        if !self.mode.can_write() {
            return Ok(());
        }
        let key = self.key(key);
        let detail = FieldsDetail(fields);
        self.guard(
            "remove",
            &key,
            &detail,
            (),
            self.storage.remove_hash_fields(&key, fields),
        )
        .await
    }

    /// Bounded counter; a disallowed or failed call reports `allowed: false`
    pub async fn increment_key(&self, key: Option<&str>, by: i64, limit: i64) -> Result<Increment> {
        if !self.mode.can_increment() {
            return Ok(Increment::default());
        }
        let key = self.key(key);
        self.guard(
            "increment",
            &key,
            &"",
            Increment::default(),
            self.storage.increment_key(&key, by, limit, self.expiry()),
        )
        .await
    }

    pub async fn increment_hash_field(
        &self,
        key: Option<&str>,
        field: &str,
        by: i64,
        limit: i64,
    ) -> Result<Increment> {
        if !self.mode.can_increment() {
            return Ok(Increment::default());
        }
        let key = self.key(key);
        let target = Fields::Only(vec![field.to_string()]);
        let detail = FieldsDetail(&target);
        self.guard(
            "increment",
            &key,
            &detail,
            Increment::default(),
            self.storage
                .increment_hash_field(&key, field, by, limit, self.expiry()),
        )
        .await
    }
}

/// Renders `, [a,b]` / `, *` after the key in log lines
struct FieldsDetail<'a>(&'a Fields);

impl fmt::Display for FieldsDetail<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ", {}", self.0)
    }
}
