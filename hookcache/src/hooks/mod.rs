//! Cache-aside hooks
//!
//! A hook addresses one or more cached entities through a [`CacheController`]
//! and knows how to read them, tell whether the read fully answers the request
//! ([`Hook::is_incomplete`]), persist producer output, and merge a cached
//! partial result with freshly produced data. [`CacheAside`] drives the whole
//! read → produce → merge → write cycle for any hook.
//!
//! | Hook | Entity | Output |
//! |------|--------|--------|
//! | [`SingleObject`] | one scalar key | `Option<T>` |
//! | [`MultiObject`] | one scalar key per id | `HashMap<Id, T>` |
//! | [`SingleCollection`] | one hash of members | `HashMap<SubId, T>` |
//! | [`MultiCollection`] | one hash per owner | `HashMap<Id, HashMap<SubId, T>>` |
//!
//! [`CacheController`]: crate::core::CacheController

pub mod collection;
pub mod cycle;
pub mod object;

pub use collection::{CollectionInfo, MultiCollection, OwnerInfo, SingleCollection};
pub use cycle::{CacheAside, WriteMode};
pub use object::{MultiObject, MultiObjectInfo, ObjectInfo, SingleObject};

use crate::core::Fields;
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reserved hash field marking a collection as complete
pub const SENTINEL: &str = "$";

/// Value stored under [`SENTINEL`]
pub(crate) const SENTINEL_VALUE: &str = "*";

/// Whether a value read from [`SENTINEL`] marks its hash as complete
pub(crate) fn marks_complete(sentinel: Option<&Value>) -> bool {
    sentinel.is_some_and(|v| v == SENTINEL_VALUE)
}

/// Identifier usable as a cache key or hash field.
///
/// Strings and integers qualify. `FromStr` is needed to recover member ids
/// from field names on wildcard reads.
pub trait CacheId: Clone + Eq + Hash + fmt::Display + FromStr + Send + Sync + 'static {}

impl<T> CacheId for T where T: Clone + Eq + Hash + fmt::Display + FromStr + Send + Sync + 'static {}

/// Extra check applied to cached values on `get(safe = true)`
pub trait Validator<T>: Send + Sync {
    fn validate(&self, value: &T) -> bool;
}

impl<T, F> Validator<T> for F
where
    F: Fn(&T) -> bool + Send + Sync,
{
    fn validate(&self, value: &T) -> bool {
        self(value)
    }
}

pub(crate) type SharedValidator<T> = Option<Arc<dyn Validator<T>>>;

/// Which members of a collection a request addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Members<Id> {
    /// Wildcard: everything currently valid for the owner
    All,
    Only(Vec<Id>),
}

impl<Id: CacheId> Members<Id> {
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// An explicit, empty list
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Only(ids) if ids.is_empty())
    }

    pub(crate) fn fields(&self) -> Fields {
        match self {
            Self::All => Fields::All,
            Self::Only(ids) => Fields::only(ids),
        }
    }

    /// Union with another request for the same owner; a wildcard absorbs any list
    pub(crate) fn absorb(&mut self, other: Members<Id>) {
        match other {
            Members::All => *self = Members::All,
            Members::Only(extra) => {
                if let Members::Only(ids) = self {
                    for id in extra {
                        if !ids.contains(&id) {
                            ids.push(id);
                        }
                    }
                }
            }
        }
    }
}

impl<Id> From<Vec<Id>> for Members<Id> {
    fn from(ids: Vec<Id>) -> Self {
        Self::Only(ids)
    }
}

/// Cached value plus the found/not-found classification of the request
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<V, I> {
    pub value: V,
    pub info: I,
}

/// The cache-aside protocol
#[async_trait]
pub trait Hook: Send + Sync {
    type Info: Send + Sync;
    type Output: Send + Sync;

    /// Whether the producer has to run for this info
    fn is_incomplete(&self, info: &Self::Info) -> bool;

    /// Presence check without transferring values
    async fn exists(&self) -> Result<Self::Info>;

    /// Read cached values. `safe` also runs the validator, rejected entries
    /// count as not found.
    async fn get(&self, safe: bool) -> Result<Cached<Self::Output, Self::Info>>;

    /// Persist `output`. With `if_exists`, only entities present at an
    /// `exists` check taken first are written.
    async fn set(&self, output: &Self::Output, if_exists: bool) -> Result<()>;

    async fn del(&self) -> Result<()>;

    /// Combine a cached partial value with freshly produced data
    fn merge(&self, target: Self::Output, extension: Self::Output) -> Self::Output;
}

pub(crate) fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            debug!("Discarding malformed cached value at {}: {}", key, e);
            None
        }
    }
}

pub(crate) fn encode<T: Serialize>(key: &str, value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(encoded) => Some(encoded),
        Err(e) => {
            warn!("Skipping cache write of {}: {}", key, e);
            None
        }
    }
}

pub(crate) fn accepts<T>(validator: &SharedValidator<T>, value: &T, safe: bool) -> bool {
    !safe || validator.as_ref().is_none_or(|v| v.validate(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_members_absorb() {
        let mut members = Members::Only(vec![1, 2]);
        members.absorb(Members::Only(vec![2, 3]));
        assert_eq!(members, Members::Only(vec![1, 2, 3]));

        members.absorb(Members::All);
        assert!(members.is_all());

        // Once a wildcard, always a wildcard
        members.absorb(Members::Only(vec![9]));
        assert!(members.is_all());
    }

    #[test]
    fn test_members_fields() {
        assert_eq!(Members::<u32>::All.fields(), Fields::All);
        assert_eq!(
            Members::Only(vec![7u32, 8]).fields(),
            Fields::Only(vec!["7".to_string(), "8".to_string()])
        );
        assert!(Members::<u32>::Only(vec![]).is_empty());
    }

    #[test]
    fn test_validator_closure() {
        let positive = |v: &i64| *v > 0;
        let validator: SharedValidator<i64> = Some(Arc::new(positive));

        assert!(accepts(&validator, &5, true));
        assert!(!accepts(&validator, &-5, true));
        // Not a safe read: validator skipped
        assert!(accepts(&validator, &-5, false));
        assert!(accepts(&None, &-5, true));
    }
}
