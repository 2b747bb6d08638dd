use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use tracing::debug;

/// Operations a controller is allowed to forward to its backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
    /// exists/read/write/remove/increment
    #[default]
    ReadWrite,
    /// exists/read only
    ReadOnly,
    /// write/remove only
    WriteOnly,
    /// Every operation is a miss
    Disabled,
}

impl AccessMode {
    pub fn can_read(&self) -> bool {
        matches!(self, Self::ReadWrite | Self::ReadOnly)
    }

    pub fn can_write(&self) -> bool {
        matches!(self, Self::ReadWrite | Self::WriteOnly)
    }

    /// Increments read and write in one step, so they need both.
    pub fn can_increment(&self) -> bool {
        matches!(self, Self::ReadWrite)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadWrite => "read-write",
            Self::ReadOnly => "read-only",
            Self::WriteOnly => "write-only",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field selector for hash operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fields {
    /// Every field currently stored in the hash
    All,
    /// Only the listed fields
    Only(Vec<String>),
}

impl Fields {
    /// Build an explicit field list from anything displayable
    pub fn only<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: fmt::Display,
    {
        Self::Only(fields.into_iter().map(|f| f.to_string()).collect())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl fmt::Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Only(fields) => write!(f, "[{}]", fields.join(",")),
        }
    }
}

/// Outcome of a bounded increment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Increment {
    /// Whether the increment was committed (it stayed within the limit)
    pub allowed: bool,
    /// Counter value after the call
    pub value: i64,
}

/// A value that may still be produced.
///
/// Backends keep the shared future and resolve it on access. A producer that
/// fails resolves to `None`, which reads exactly like a value that was never
/// written.
#[derive(Clone)]
pub struct DeferredValue(Shared<BoxFuture<'static, Option<Value>>>);

impl DeferredValue {
    /// Already available value
    pub fn ready(value: Value) -> Self {
        let shared = futures::future::ready(Some(value)).boxed().shared();
        // Poll once so `peek` sees the value without an await.
        let _ = shared.clone().now_or_never();
        Self(shared)
    }

    /// Value that becomes available when `fut` completes
    pub fn pending<F, E>(fut: F) -> Self
    where
        F: Future<Output = std::result::Result<Value, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let fut = async move {
            match fut.await {
                Ok(value) => Some(value),
                Err(e) => {
                    debug!("Deferred value failed, treating as unwritten: {}", e);
                    None
                }
            }
        };
        Self(fut.boxed().shared())
    }

    /// Wait for the value. `None` means the producer failed.
    pub async fn resolve(&self) -> Option<Value> {
        self.0.clone().await
    }

    /// Outcome if already resolved, without waiting.
    pub fn peek(&self) -> Option<&Option<Value>> {
        self.0.peek()
    }
}

impl From<Value> for DeferredValue {
    fn from(value: Value) -> Self {
        Self::ready(value)
    }
}

impl fmt::Debug for DeferredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.peek() {
            Some(Some(value)) => f.debug_tuple("DeferredValue").field(value).finish(),
            Some(None) => f.write_str("DeferredValue(<failed>)"),
            None => f.write_str("DeferredValue(<pending>)"),
        }
    }
}

/// Statistics for the TTL store
#[derive(Debug, Default, Clone, Serialize)]
pub struct StoreStats {
    /// Number of live keys (scalar and hash)
    pub total_keys: usize,
    /// Number of read/exists operations
    pub reads: u64,
    /// Number of write operations
    pub writes: u64,
    /// Number of remove operations
    pub removes: u64,
    /// Reads that found a value
    pub hits: u64,
    /// Reads that found nothing
    pub misses: u64,
    /// Keys removed by their expiry timer
    pub expirations: u64,
}

impl StoreStats {
    /// Calculate hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
