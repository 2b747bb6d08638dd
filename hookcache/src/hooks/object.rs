//! Hooks over scalar keys

use super::{CacheId, Cached, Hook, SharedValidator, Validator, accepts, decode, encode};
use crate::core::CacheController;
use crate::error::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectInfo {
    pub found: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiObjectInfo<Id> {
    pub found: Vec<Id>,
    pub not_found: Vec<Id>,
}

/// One object stored at the controller's prefix
pub struct SingleObject<T> {
    cache: CacheController,
    validator: SharedValidator<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SingleObject<T> {
    pub fn new(cache: CacheController) -> Self {
        Self {
            cache,
            validator: None,
            _marker: PhantomData,
        }
    }

    pub fn with_validator(mut self, validator: impl Validator<T> + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn cache(&self) -> &CacheController {
        &self.cache
    }
}

#[async_trait]
impl<T> Hook for SingleObject<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Info = ObjectInfo;
    type Output = Option<T>;

    fn is_incomplete(&self, info: &ObjectInfo) -> bool {
        !info.found
    }

    async fn exists(&self) -> Result<ObjectInfo> {
        Ok(ObjectInfo {
            found: self.cache.exists_key(None).await?,
        })
    }

    async fn get(&self, safe: bool) -> Result<Cached<Option<T>, ObjectInfo>> {
        let value = self
            .cache
            .read_key(None)
            .await?
            .and_then(|raw| decode::<T>(self.cache.prefix(), raw))
            .filter(|v| accepts(&self.validator, v, safe));

        Ok(Cached {
            info: ObjectInfo {
                found: value.is_some(),
            },
            value,
        })
    }

    async fn set(&self, output: &Option<T>, if_exists: bool) -> Result<()> {
        if if_exists && !self.exists().await?.found {
            return Ok(());
        }

        match output {
            Some(value) => match encode(self.cache.prefix(), value) {
                Some(encoded) => self.cache.write_key(None, encoded).await,
                None => Ok(()),
            },
            None => self.cache.remove_key(None).await,
        }
    }

    async fn del(&self) -> Result<()> {
        self.cache.remove_key(None).await
    }

    fn merge(&self, target: Option<T>, extension: Option<T>) -> Option<T> {
        target.or(extension)
    }
}

/// One object per id, each under `prefix + separator + id`
pub struct MultiObject<Id, T> {
    cache: CacheController,
    ids: Vec<Id>,
    validator: SharedValidator<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<Id: CacheId, T> MultiObject<Id, T> {
    /// Duplicate ids are collapsed, first occurrence wins the position
    pub fn new(cache: CacheController, ids: impl IntoIterator<Item = Id>) -> Self {
        let mut seen = HashSet::new();
        let ids = ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        Self {
            cache,
            ids,
            validator: None,
            _marker: PhantomData,
        }
    }

    pub fn with_validator(mut self, validator: impl Validator<T> + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn ids(&self) -> &[Id] {
        &self.ids
    }

    pub fn cache(&self) -> &CacheController {
        &self.cache
    }
}

#[async_trait]
impl<Id, T> Hook for MultiObject<Id, T>
where
    Id: CacheId,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Info = MultiObjectInfo<Id>;
    type Output = HashMap<Id, T>;

    fn is_incomplete(&self, info: &MultiObjectInfo<Id>) -> bool {
        !info.not_found.is_empty()
    }

    async fn exists(&self) -> Result<MultiObjectInfo<Id>> {
        let checks = join_all(self.ids.iter().map(|id| async move {
            let present = self.cache.exists_key(Some(&id.to_string())).await;
            (id, present)
        }))
        .await;

        let mut info = MultiObjectInfo {
            found: Vec::new(),
            not_found: Vec::new(),
        };
        for (id, present) in checks {
            if present? {
                info.found.push(id.clone());
            } else {
                info.not_found.push(id.clone());
            }
        }
        Ok(info)
    }

    async fn get(&self, safe: bool) -> Result<Cached<HashMap<Id, T>, MultiObjectInfo<Id>>> {
        let reads = join_all(self.ids.iter().map(|id| async move {
            let key = id.to_string();
            let raw = self.cache.read_key(Some(&key)).await;
            (id, key, raw)
        }))
        .await;

        let mut value = HashMap::with_capacity(reads.len());
        let mut info = MultiObjectInfo {
            found: Vec::new(),
            not_found: Vec::new(),
        };
        for (id, key, raw) in reads {
            let decoded = raw?
                .and_then(|raw| decode::<T>(&key, raw))
                .filter(|v| accepts(&self.validator, v, safe));
            match decoded {
                Some(v) => {
                    info.found.push(id.clone());
                    value.insert(id.clone(), v);
                }
                None => info.not_found.push(id.clone()),
            }
        }

        Ok(Cached { value, info })
    }

    async fn set(&self, output: &HashMap<Id, T>, if_exists: bool) -> Result<()> {
        let mut targets: Vec<(&Id, &T)> = output.iter().collect();
        if if_exists {
            let info = self.exists().await?;
            let found: HashSet<&Id> = info.found.iter().collect();
            targets.retain(|(id, _)| found.contains(id));
        }

        let writes = join_all(targets.into_iter().map(|(id, v)| async move {
            let key = id.to_string();
            match encode(&key, v) {
                Some(encoded) => self.cache.write_key(Some(&key), encoded).await,
                None => Ok(()),
            }
        }))
        .await;

        writes.into_iter().collect()
    }

    async fn del(&self) -> Result<()> {
        let removals = join_all(self.ids.iter().map(|id| async move {
            self.cache.remove_key(Some(&id.to_string())).await
        }))
        .await;

        removals.into_iter().collect()
    }

    fn merge(&self, mut target: HashMap<Id, T>, extension: HashMap<Id, T>) -> HashMap<Id, T> {
        target.extend(extension);
        target
    }
}
