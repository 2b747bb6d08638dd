//! In-process reference backend with per-key expiry timers
//!
//! # Architecture
//! ```text
//! TtlStore
//!   ├─ RwLock<HashMap<key, Entry>>
//!   │    └─ Entry { Scalar(value) | Hash(field -> value), deadline, timer, generation }
//!   └─ one tokio timer task per expiring key, aborted on overwrite/remove/drop
//! ```
//!
//! TTL applies to the whole key, never to individual hash fields. Deadlines are
//! also checked on every access, so a store used outside a tokio runtime (no
//! timer tasks) still never serves expired data.

use super::storage::CacheStorage;
use super::types::{DeferredValue, Fields, Increment, StoreStats};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{info, trace};

const SCALAR: &str = "scalar";
const HASH: &str = "hash";

enum Slot {
    Scalar(DeferredValue),
    Hash(HashMap<String, DeferredValue>),
}

struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
    timer: Option<AbortHandle>,
    /// Bumped on every re-arm; a timer only removes the generation it was armed for.
    generation: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

struct Inner {
    entries: RwLock<HashMap<String, Entry>>,
    stats: RwLock<StoreStats>,
    generation: AtomicU64,
}

impl Inner {
    fn expire(&self, key: &str, generation: u64) {
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| e.generation == generation) {
            if let Some(mut entry) = entries.remove(key) {
                // This task is the timer, nothing left to abort.
                entry.timer = None;
            }
            self.stats.write().expirations += 1;
            trace!("EXPIRE key={}", key);
        }
    }
}

/// Map-backed [`CacheStorage`] with expiry timers owned by the store
pub struct TtlStore {
    name: String,
    inner: Arc<Inner>,
}

impl TtlStore {
    /// Create a new store named "ttl-store"
    pub fn new() -> Self {
        Self::with_name("ttl-store")
    }

    /// Create a new store with the name used in log lines
    pub fn with_name(name: impl Into<String>) -> Self {
        let name = name.into();
        info!("Initializing TTL store {}", name);

        Self {
            name,
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                stats: RwLock::new(StoreStats::default()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Number of stored keys, including expired keys not purged yet
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining TTL of a live key. `None` if missing or without expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.inner.entries.read();
        entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Drop every key whose deadline has passed, returns how many
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.inner.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let purged = before - entries.len();
        if purged > 0 {
            self.inner.stats.write().expirations += purged as u64;
            trace!("PURGE expired={}", purged);
        }
        purged
    }

    /// Remove every key and cancel every timer
    pub fn clear(&self) {
        self.inner.entries.write().clear();
    }

    /// Get statistics
    pub fn stats(&self) -> StoreStats {
        let now = Instant::now();
        let total_keys = self
            .inner
            .entries
            .read()
            .values()
            .filter(|e| !e.is_expired(now))
            .count();
        let mut stats = self.inner.stats.read().clone();
        stats.total_keys = total_keys;
        stats
    }

    fn next_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// (Re)start the expiry of `entry`. Caller holds the write lock.
    fn arm(&self, key: &str, entry: &mut Entry, ttl: Option<Duration>) {
        entry.cancel_timer();
        entry.generation = self.next_generation();
        // A deadline past what Instant can represent means no expiry.
        entry.expires_at = ttl
            .filter(|d| !d.is_zero())
            .and_then(|d| Instant::now().checked_add(d));
        entry.timer = entry
            .expires_at
            .and_then(|deadline| self.spawn_timer(key, entry.generation, deadline));
    }

    fn new_entry(&self, key: &str, slot: Slot, ttl: Option<Duration>) -> Entry {
        let mut entry = Entry {
            slot,
            expires_at: None,
            timer: None,
            generation: 0,
        };
        self.arm(key, &mut entry, ttl);
        entry
    }

    fn spawn_timer(&self, key: &str, generation: u64, deadline: Instant) -> Option<AbortHandle> {
        // Outside a runtime the deadline check on access is all we get.
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let key = key.to_string();
        let task = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = inner.upgrade() {
                inner.expire(&key, generation);
            }
        });
        Some(task.abort_handle())
    }

    fn record_read(&self, hit: Option<bool>) {
        let mut stats = self.inner.stats.write();
        stats.reads += 1;
        match hit {
            Some(true) => stats.hits += 1,
            Some(false) => stats.misses += 1,
            None => {}
        }
    }

    fn record_write(&self) {
        self.inner.stats.write().writes += 1;
    }

    fn record_remove(&self) {
        self.inner.stats.write().removes += 1;
    }

    fn scalar(&self, key: &str) -> Result<Option<DeferredValue>> {
        let entries = self.inner.entries.read();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => match &entry.slot {
                Slot::Scalar(value) => Ok(Some(value.clone())),
                Slot::Hash(_) => Err(wrong_type(key, SCALAR)),
            },
            _ => Ok(None),
        }
    }

    fn hash_fields(&self, key: &str, fields: &Fields) -> Result<Vec<(String, DeferredValue)>> {
        let entries = self.inner.entries.read();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => match &entry.slot {
                Slot::Hash(map) => Ok(match fields {
                    Fields::All => map.iter().map(|(f, v)| (f.clone(), v.clone())).collect(),
                    Fields::Only(list) => list
                        .iter()
                        .filter_map(|f| map.get(f).map(|v| (f.clone(), v.clone())))
                        .collect(),
                }),
                Slot::Scalar(_) => Err(wrong_type(key, HASH)),
            },
            _ => Ok(Vec::new()),
        }
    }
}

impl Default for TtlStore {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type(key: &str, expected: &'static str) -> CacheError {
    CacheError::WrongType {
        key: key.to_string(),
        expected,
    }
}

fn drop_expired(entries: &mut HashMap<String, Entry>, key: &str) {
    if entries
        .get(key)
        .is_some_and(|e| e.is_expired(Instant::now()))
    {
        entries.remove(key);
    }
}

/// Resolve deferred field values outside the lock, dropping failed ones
async fn resolve_fields(pairs: Vec<(String, DeferredValue)>) -> HashMap<String, Value> {
    join_all(pairs.into_iter().map(|(field, value)| async move {
        let resolved = value.resolve().await;
        resolved.map(|v| (field, v))
    }))
    .await
    .into_iter()
    .flatten()
    .collect()
}

fn counter_value(key: &str, value: Option<&Value>) -> Result<i64> {
    match value {
        None => Ok(0),
        Some(v) => v
            .as_i64()
            .ok_or_else(|| CacheError::Backend(format!("Value at {} is not an integer", key))),
    }
}

fn bounded_add(current: i64, by: i64, limit: i64) -> Increment {
    match current.checked_add(by).filter(|next| *next <= limit) {
        Some(next) => Increment {
            allowed: true,
            value: next,
        },
        None => Increment {
            allowed: false,
            value: current,
        },
    }
}

enum Step {
    Done(Increment),
    /// Counter still resolving; wait outside the lock and retry.
    Wait(DeferredValue),
}

#[async_trait]
impl CacheStorage for TtlStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists_key(&self, key: &str) -> Result<bool> {
        let exists = match self.scalar(key)? {
            Some(value) => value.resolve().await.is_some(),
            None => false,
        };
        self.record_read(None);
        trace!("EXISTS key={} exists={}", key, exists);
        Ok(exists)
    }

    async fn exists_hash_fields(
        &self,
        key: &str,
        fields: &Fields,
    ) -> Result<HashMap<String, bool>> {
        let present = resolve_fields(self.hash_fields(key, fields)?).await;
        self.record_read(None);
        trace!("HEXISTS key={} fields={} present={}", key, fields, present.len());

        Ok(match fields {
            Fields::All => present.into_keys().map(|f| (f, true)).collect(),
            Fields::Only(list) => list
                .iter()
                .map(|f| (f.clone(), present.contains_key(f)))
                .collect(),
        })
    }

    async fn read_key(&self, key: &str) -> Result<Option<Value>> {
        let value = match self.scalar(key)? {
            Some(value) => value.resolve().await,
            None => None,
        };
        self.record_read(Some(value.is_some()));
        trace!("GET key={} found={}", key, value.is_some());
        Ok(value)
    }

    async fn read_hash_fields(&self, key: &str, fields: &Fields) -> Result<HashMap<String, Value>> {
        let values = resolve_fields(self.hash_fields(key, fields)?).await;
        self.record_read(Some(!values.is_empty()));
        trace!("HMGET key={} fields={} found={}", key, fields, values.len());
        Ok(values)
    }

    async fn write_key(
        &self,
        key: &str,
        value: DeferredValue,
        ttl: Option<Duration>,
    ) -> Result<()> {
        {
            let mut entries = self.inner.entries.write();
            drop_expired(&mut entries, key);
            if entries
                .get(key)
                .is_some_and(|e| matches!(e.slot, Slot::Hash(_)))
            {
                return Err(wrong_type(key, SCALAR));
            }
            // Replacing the old entry drops it, which aborts its timer.
            let entry = self.new_entry(key, Slot::Scalar(value), ttl);
            entries.insert(key.to_string(), entry);
        }
        self.record_write();
        trace!("SET key={} ttl={:?}", key, ttl);
        Ok(())
    }

    async fn write_hash_fields(
        &self,
        key: &str,
        values: HashMap<String, DeferredValue>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let count = values.len();
        {
            let mut entries = self.inner.entries.write();
            drop_expired(&mut entries, key);
            match entries.get_mut(key) {
                Some(entry) => {
                    let Slot::Hash(map) = &mut entry.slot else {
                        return Err(wrong_type(key, HASH));
                    };
                    map.extend(values);
                    self.arm(key, entry, ttl);
                }
                None => {
                    let entry = self.new_entry(key, Slot::Hash(values), ttl);
                    entries.insert(key.to_string(), entry);
                }
            }
        }
        self.record_write();
        trace!("HSET key={} fields={} ttl={:?}", key, count, ttl);
        Ok(())
    }

    async fn remove_key(&self, key: &str) -> Result<()> {
        {
            let mut entries = self.inner.entries.write();
            drop_expired(&mut entries, key);
            match entries.get(key).map(|e| matches!(e.slot, Slot::Scalar(_))) {
                Some(true) => {
                    entries.remove(key);
                }
                Some(false) => return Err(wrong_type(key, SCALAR)),
                None => {}
            }
        }
        self.record_remove();
        trace!("DEL key={}", key);
        Ok(())
    }

    async fn remove_hash_fields(&self, key: &str, fields: &Fields) -> Result<()> {
        {
            let mut entries = self.inner.entries.write();
            drop_expired(&mut entries, key);
            let now_empty = match entries.get_mut(key) {
                None => false,
                Some(entry) => {
                    let Slot::Hash(map) = &mut entry.slot else {
                        return Err(wrong_type(key, HASH));
                    };
                    match fields {
                        Fields::All => true,
                        Fields::Only(list) => {
                            for field in list {
                                map.remove(field);
                            }
                            map.is_empty()
                        }
                    }
                }
            };
            // No empty-hash residue: the key and its timer go together.
            if now_empty {
                entries.remove(key);
            }
        }
        self.record_remove();
        trace!("HDEL key={} fields={}", key, fields);
        Ok(())
    }

    async fn increment_key(
        &self,
        key: &str,
        by: i64,
        limit: i64,
        ttl: Option<Duration>,
    ) -> Result<Increment> {
        loop {
            let step = {
                let mut entries = self.inner.entries.write();
                drop_expired(&mut entries, key);
                match entries.get_mut(key) {
                    None => {
                        let outcome = bounded_add(0, by, limit);
                        if outcome.allowed {
                            let value = DeferredValue::ready(json!(outcome.value));
                            let entry = self.new_entry(key, Slot::Scalar(value), ttl);
                            entries.insert(key.to_string(), entry);
                        }
                        Step::Done(outcome)
                    }
                    Some(entry) => {
                        let Slot::Scalar(value) = &mut entry.slot else {
                            return Err(wrong_type(key, SCALAR));
                        };
                        match value.peek() {
                            None => Step::Wait(value.clone()),
                            Some(resolved) => {
                                let current = counter_value(key, resolved.as_ref())?;
                                let outcome = bounded_add(current, by, limit);
                                if outcome.allowed {
                                    *value = DeferredValue::ready(json!(outcome.value));
                                }
                                Step::Done(outcome)
                            }
                        }
                    }
                }
            };

            match step {
                Step::Done(outcome) => {
                    self.record_write();
                    trace!(
                        "INCR key={} by={} limit={} allowed={} value={}",
                        key, by, limit, outcome.allowed, outcome.value
                    );
                    return Ok(outcome);
                }
                Step::Wait(pending) => {
                    pending.resolve().await;
                }
            }
        }
    }

    async fn increment_hash_field(
        &self,
        key: &str,
        field: &str,
        by: i64,
        limit: i64,
        ttl: Option<Duration>,
    ) -> Result<Increment> {
        loop {
            let step = {
                let mut entries = self.inner.entries.write();
                drop_expired(&mut entries, key);
                match entries.get_mut(key) {
                    None => {
                        let outcome = bounded_add(0, by, limit);
                        if outcome.allowed {
                            let map = HashMap::from([(
                                field.to_string(),
                                DeferredValue::ready(json!(outcome.value)),
                            )]);
                            let entry = self.new_entry(key, Slot::Hash(map), ttl);
                            entries.insert(key.to_string(), entry);
                        }
                        Step::Done(outcome)
                    }
                    Some(entry) => {
                        let Slot::Hash(map) = &mut entry.slot else {
                            return Err(wrong_type(key, HASH));
                        };
                        let pending = map.get(field).filter(|v| v.peek().is_none()).cloned();
                        match pending {
                            Some(pending) => Step::Wait(pending),
                            None => {
                                let current = match map.get(field).and_then(|v| v.peek()) {
                                    Some(resolved) => counter_value(key, resolved.as_ref())?,
                                    None => 0,
                                };
                                let outcome = bounded_add(current, by, limit);
                                if outcome.allowed {
                                    map.insert(
                                        field.to_string(),
                                        DeferredValue::ready(json!(outcome.value)),
                                    );
                                }
                                Step::Done(outcome)
                            }
                        }
                    }
                }
            };

            match step {
                Step::Done(outcome) => {
                    self.record_write();
                    trace!(
                        "HINCR key={} field={} by={} limit={} allowed={} value={}",
                        key, field, by, limit, outcome.allowed, outcome.value
                    );
                    return Ok(outcome);
                }
                Step::Wait(pending) => {
                    pending.resolve().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(v: Value) -> DeferredValue {
        DeferredValue::ready(v)
    }

    fn fields(values: &[(&str, Value)]) -> HashMap<String, DeferredValue> {
        values
            .iter()
            .map(|(f, v)| (f.to_string(), ready(v.clone())))
            .collect()
    }

    #[tokio::test]
    async fn test_write_read_key() {
        let store = TtlStore::new();

        store
            .write_key("user:1", ready(json!({"name": "Alice"})), None)
            .await
            .unwrap();

        let value = store.read_key("user:1").await.unwrap();
        assert_eq!(value, Some(json!({"name": "Alice"})));
        assert!(store.exists_key("user:1").await.unwrap());
        assert!(!store.exists_key("user:2").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiration() {
        let store = TtlStore::new();

        store
            .write_key("session", ready(json!("abc")), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(store.read_key("session").await.unwrap(), Some(json!("abc")));
        assert!(store.ttl("session").is_some());

        tokio::time::sleep(Duration::from_millis(1001)).await;

        assert_eq!(store.read_key("session").await.unwrap(), None);
        // The timer removed the entry itself
        assert_eq!(store.len(), 0);
        assert_eq!(store.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_resets_timer() {
        let store = TtlStore::new();
        let ttl = Some(Duration::from_secs(2));

        store.write_key("k", ready(json!(1)), ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        store.write_key("k", ready(json!(2)), ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        // 3s after the first write, 1.5s after the second
        assert_eq!(store.read_key("k").await.unwrap(), Some(json!(2)));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(store.read_key("k").await.unwrap(), None);
        assert_eq!(store.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_never_expires() {
        let store = TtlStore::new();

        store
            .write_key("k", ready(json!(1)), Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(store.ttl("k"), None);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(store.read_key("k").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_never_expires() {
        let store = TtlStore::new();

        store
            .write_key("k", ready(json!(1)), Some(Duration::MAX))
            .await
            .unwrap();
        store
            .write_hash_fields("h", fields(&[("a", json!(1))]), Some(Duration::MAX))
            .await
            .unwrap();
        store.increment_key("c", 1, 10, Some(Duration::MAX)).await.unwrap();

        assert_eq!(store.ttl("k"), None);
        assert_eq!(store.ttl("h"), None);
        assert_eq!(store.read_key("k").await.unwrap(), Some(json!(1)));
        assert_eq!(store.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hash_ttl_expiration() {
        let store = TtlStore::new();

        store
            .write_hash_fields(
                "h",
                fields(&[("a", json!(1)), ("b", json!(2))]),
                Some(Duration::from_secs(1)),
            )
            .await
            .unwrap();
        assert!(store.ttl("h").is_some());

        tokio::time::sleep(Duration::from_millis(1001)).await;

        assert!(store.read_hash_fields("h", &Fields::All).await.unwrap().is_empty());
        assert_eq!(store.len(), 0);
        assert_eq!(store.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hash_point_write_resets_timer() {
        let store = TtlStore::new();
        let ttl = Some(Duration::from_secs(2));

        store
            .write_hash_fields("h", fields(&[("a", json!(1))]), ttl)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        store
            .write_hash_fields("h", fields(&[("b", json!(2))]), ttl)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        // "a" lives on under the deadline set by the write of "b"
        let values = store.read_hash_fields("h", &Fields::All).await.unwrap();
        assert_eq!(values.get("a"), Some(&json!(1)));
        assert_eq!(values.get("b"), Some(&json!(2)));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(store.read_hash_fields("h", &Fields::All).await.unwrap().is_empty());
        assert_eq!(store.stats().expirations, 1);
    }

    #[tokio::test]
    async fn test_failed_deferred_write_reads_as_miss() {
        let store = TtlStore::new();

        let failed = DeferredValue::pending(async { Err::<Value, _>("producer crashed") });
        store.write_key("k", failed, None).await.unwrap();

        assert_eq!(store.read_key("k").await.unwrap(), None);
        assert!(!store.exists_key("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type_access() {
        let store = TtlStore::new();

        store.write_key("scalar", ready(json!(1)), None).await.unwrap();
        store
            .write_hash_fields("hash", fields(&[("a", json!(1))]), None)
            .await
            .unwrap();

        let err = store.read_hash_fields("scalar", &Fields::All).await.unwrap_err();
        assert!(matches!(err, CacheError::WrongType { expected: "hash", .. }));

        let err = store.read_key("hash").await.unwrap_err();
        assert!(matches!(err, CacheError::WrongType { expected: "scalar", .. }));

        assert!(store.write_key("hash", ready(json!(2)), None).await.is_err());
        assert!(store.remove_key("hash").await.is_err());
    }

    #[tokio::test]
    async fn test_hash_point_writes() {
        let store = TtlStore::new();

        store
            .write_hash_fields("org:1", fields(&[("a", json!(1)), ("b", json!(2))]), None)
            .await
            .unwrap();
        store
            .write_hash_fields("org:1", fields(&[("b", json!(20)), ("c", json!(3))]), None)
            .await
            .unwrap();

        let all = store.read_hash_fields("org:1", &Fields::All).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all["a"], json!(1));
        assert_eq!(all["b"], json!(20));
        assert_eq!(all["c"], json!(3));

        let some = store
            .read_hash_fields("org:1", &Fields::only(["a", "z"]))
            .await
            .unwrap();
        assert_eq!(some.len(), 1);

        let exists = store
            .exists_hash_fields("org:1", &Fields::only(["a", "z"]))
            .await
            .unwrap();
        assert!(exists["a"]);
        assert!(!exists["z"]);
    }

    #[tokio::test]
    async fn test_removing_last_field_deletes_key() {
        let store = TtlStore::new();

        store
            .write_hash_fields(
                "org:1",
                fields(&[("a", json!(1)), ("b", json!(2))]),
                Some(Duration::from_secs(60)),
            )
            .await
            .unwrap();

        store
            .remove_hash_fields("org:1", &Fields::only(["a"]))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);

        store
            .remove_hash_fields("org:1", &Fields::only(["b"]))
            .await
            .unwrap();
        assert_eq!(store.len(), 0);
        assert_eq!(store.ttl("org:1"), None);
    }

    #[tokio::test]
    async fn test_remove_whole_hash() {
        let store = TtlStore::new();

        store
            .write_hash_fields("org:1", fields(&[("a", json!(1)), ("$", json!("*"))]), None)
            .await
            .unwrap();
        store.remove_hash_fields("org:1", &Fields::All).await.unwrap();

        assert!(
            store
                .read_hash_fields("org:1", &Fields::All)
                .await
                .unwrap()
                .is_empty()
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_increment_key_with_limit() {
        let store = TtlStore::new();

        let first = store.increment_key("hits", 2, 5, None).await.unwrap();
        assert_eq!(first, Increment { allowed: true, value: 2 });

        let second = store.increment_key("hits", 3, 5, None).await.unwrap();
        assert_eq!(second, Increment { allowed: true, value: 5 });

        let third = store.increment_key("hits", 1, 5, None).await.unwrap();
        assert_eq!(third, Increment { allowed: false, value: 5 });

        assert_eq!(store.read_key("hits").await.unwrap(), Some(json!(5)));
    }

    #[tokio::test]
    async fn test_increment_rejects_non_integer() {
        let store = TtlStore::new();

        store.write_key("name", ready(json!("alice")), None).await.unwrap();
        let err = store.increment_key("name", 1, 10, None).await.unwrap_err();
        assert!(matches!(err, CacheError::Backend(_)));
    }

    #[tokio::test]
    async fn test_increment_waits_for_pending_value() {
        let store = TtlStore::new();

        let pending = DeferredValue::pending(async {
            tokio::task::yield_now().await;
            Ok::<_, String>(json!(10))
        });
        store.write_key("counter", pending, None).await.unwrap();

        let outcome = store.increment_key("counter", 1, 100, None).await.unwrap();
        assert_eq!(outcome, Increment { allowed: true, value: 11 });
    }

    #[tokio::test]
    async fn test_increment_hash_field() {
        let store = TtlStore::new();

        let a = store
            .increment_hash_field("limits", "user:1", 1, 2, None)
            .await
            .unwrap();
        let b = store
            .increment_hash_field("limits", "user:1", 1, 2, None)
            .await
            .unwrap();
        let c = store
            .increment_hash_field("limits", "user:1", 1, 2, None)
            .await
            .unwrap();
        let other = store
            .increment_hash_field("limits", "user:2", 1, 2, None)
            .await
            .unwrap();

        assert!(a.allowed && b.allowed);
        assert_eq!(c, Increment { allowed: false, value: 2 });
        assert_eq!(other, Increment { allowed: true, value: 1 });
    }

    #[test]
    fn test_expired_entries_without_runtime() {
        // No runtime: no timer tasks, only the deadline check
        let store = TtlStore::new();
        {
            let mut entries = store.inner.entries.write();
            let entry = Entry {
                slot: Slot::Scalar(ready(json!(1))),
                expires_at: Some(Instant::now()),
                timer: None,
                generation: 1,
            };
            entries.insert("stale".to_string(), entry);
        }

        assert_eq!(store.stats().total_keys, 0);
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let store = TtlStore::new();

        store.write_key("k", ready(json!(1)), None).await.unwrap();
        store.read_key("k").await.unwrap();
        store.read_key("missing").await.unwrap();
        store.remove_key("k").await.unwrap();

        let stats = store.stats();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.reads, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.removes, 1);
        assert_eq!(stats.total_keys, 0);
    }
}
