//! Hooks over hashes of members
//!
//! A collection lives in one hash per owner, one field per member. A wildcard
//! write also stores [`SENTINEL`], which is what lets a later wildcard read
//! trust that the hash holds every member. Reads that drop any member (bad
//! payload, failed validation, unparseable field) treat the collection as
//! incomplete again.

use super::{
    CacheId, Cached, Hook, Members, SENTINEL, SENTINEL_VALUE, SharedValidator, Validator, accepts,
    decode, encode, marks_complete,
};
use crate::core::{CacheController, Fields};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

/// Classification of one owner's members
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo<SubId> {
    pub found: Vec<SubId>,
    /// `Members::All` when the cached hash can't be trusted to be complete
    pub not_found: Members<SubId>,
}

impl<SubId: CacheId> CollectionInfo<SubId> {
    pub fn is_complete(&self) -> bool {
        self.not_found.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerInfo<Id, SubId> {
    pub id: Id,
    pub found: Vec<SubId>,
    pub not_found: Members<SubId>,
}

/// Reject ids colliding with the sentinel and repeated ids
fn check_members<SubId: CacheId>(ids: &[SubId]) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        let field = id.to_string();
        if field == SENTINEL {
            return Err(CacheError::ReservedField(field));
        }
        if !seen.insert(id) {
            return Err(CacheError::DuplicateId(field));
        }
    }
    Ok(())
}

/// One owner's hash, as addressed by a request
struct Loc<'a, SubId, T> {
    cache: &'a CacheController,
    key: Option<&'a str>,
    members: &'a Members<SubId>,
    validator: &'a SharedValidator<T>,
}

impl<SubId, T> Loc<'_, SubId, T>
where
    SubId: CacheId,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn label(&self) -> String {
        self.cache.key(self.key)
    }

    async fn exists(&self) -> Result<CollectionInfo<SubId>> {
        let mut present = self
            .cache
            .exists_hash_fields(self.key, &self.members.fields())
            .await?;

        Ok(match self.members {
            Members::Only(ids) => {
                let (found, missing): (Vec<SubId>, Vec<SubId>) = ids
                    .iter()
                    .cloned()
                    .partition(|id| present.get(&id.to_string()).copied().unwrap_or(false));
                CollectionInfo {
                    found,
                    not_found: Members::Only(missing),
                }
            }
            Members::All => {
                // Presence only: `get` additionally checks the value through `marks_complete`.
                let complete = present.remove(SENTINEL).unwrap_or(false);
                let mut found = Vec::with_capacity(present.len());
                let mut parsed_all = true;
                for (field, is_present) in present {
                    if !is_present {
                        continue;
                    }
                    match field.parse::<SubId>() {
                        Ok(id) => found.push(id),
                        Err(_) => parsed_all = false,
                    }
                }
                CollectionInfo {
                    found,
                    not_found: if complete && parsed_all {
                        Members::Only(Vec::new())
                    } else {
                        Members::All
                    },
                }
            }
        })
    }

    async fn get(&self, safe: bool) -> Result<Cached<HashMap<SubId, T>, CollectionInfo<SubId>>> {
        let mut raw = self
            .cache
            .read_hash_fields(self.key, &self.members.fields())
            .await?;
        let mut complete = marks_complete(raw.remove(SENTINEL).as_ref());

        let requested: Option<HashMap<String, &SubId>> = match self.members {
            Members::Only(ids) => Some(ids.iter().map(|id| (id.to_string(), id)).collect()),
            Members::All => None,
        };

        let label = self.label();
        let mut values = HashMap::with_capacity(raw.len());
        for (field, value) in raw {
            let id = match &requested {
                Some(requested) => requested.get(&field).map(|id| (*id).clone()),
                None => field.parse::<SubId>().ok(),
            };
            let Some(id) = id else {
                debug!("Ignoring unknown member {} in {}", field, label);
                complete = false;
                continue;
            };
            match decode::<T>(&label, value).filter(|v| accepts(self.validator, v, safe)) {
                Some(v) => {
                    values.insert(id, v);
                }
                None => complete = false,
            }
        }

        let info = match self.members {
            Members::Only(ids) => {
                let (found, missing): (Vec<SubId>, Vec<SubId>) =
                    ids.iter().cloned().partition(|id| values.contains_key(id));
                CollectionInfo {
                    found,
                    not_found: Members::Only(missing),
                }
            }
            Members::All => CollectionInfo {
                found: values.keys().cloned().collect(),
                not_found: if complete {
                    Members::Only(Vec::new())
                } else {
                    Members::All
                },
            },
        };

        Ok(Cached {
            value: values,
            info,
        })
    }

    async fn set(&self, output: Option<&HashMap<SubId, T>>, if_exists: bool) -> Result<()> {
        let label = self.label();
        match self.members {
            Members::Only(ids) => {
                let Some(output) = output else {
                    return Ok(());
                };
                let mut targets: Vec<&SubId> =
                    ids.iter().filter(|id| output.contains_key(id)).collect();
                if if_exists {
                    let info = self.exists().await?;
                    let found: HashSet<&SubId> = info.found.iter().collect();
                    targets.retain(|id| found.contains(id));
                }

                let values: HashMap<String, Value> = targets
                    .into_iter()
                    .filter_map(|id| {
                        let member = output.get(id)?;
                        encode(&label, member).map(|v| (id.to_string(), v))
                    })
                    .collect();
                if values.is_empty() {
                    return Ok(());
                }
                self.cache.write_hash_fields(self.key, values).await
            }
            Members::All => {
                if if_exists && self.exists().await?.not_found.is_all() {
                    // Nothing trustworthy to refresh: drop whatever is there.
                    return self.cache.remove_hash_fields(self.key, &Fields::All).await;
                }

                let mut complete = true;
                let mut values = HashMap::new();
                for (id, member) in output.into_iter().flatten() {
                    let field = id.to_string();
                    if field == SENTINEL {
                        warn!("Skipping member {} of {}: reserved field", field, label);
                        complete = false;
                        continue;
                    }
                    match encode(&label, member) {
                        Some(v) => {
                            values.insert(field, v);
                        }
                        None => complete = false,
                    }
                }
                if complete {
                    values.insert(SENTINEL.to_string(), json!(SENTINEL_VALUE));
                }

                self.cache
                    .remove_hash_fields(self.key, &Fields::All)
                    .await?;
                if values.is_empty() {
                    return Ok(());
                }
                self.cache.write_hash_fields(self.key, values).await
            }
        }
    }

    async fn del(&self) -> Result<()> {
        let fields = match self.members {
            Members::All => Fields::All,
            Members::Only(ids) => Fields::only(
                ids.iter()
                    .map(|id| id.to_string())
                    .chain(std::iter::once(SENTINEL.to_string())),
            ),
        };
        self.cache.remove_hash_fields(self.key, &fields).await
    }
}

/// Members of one owner, stored as a hash at the controller's prefix
pub struct SingleCollection<SubId, T> {
    cache: CacheController,
    members: Members<SubId>,
    validator: SharedValidator<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<SubId: CacheId, T> SingleCollection<SubId, T> {
    /// Fails with [`CacheError::ReservedField`] if a member id renders as the
    /// sentinel, and with [`CacheError::DuplicateId`] on repeated ids.
    pub fn new(cache: CacheController, members: impl Into<Members<SubId>>) -> Result<Self> {
        let members = members.into();
        if let Members::Only(ids) = &members {
            check_members(ids)?;
        }

        Ok(Self {
            cache,
            members,
            validator: None,
            _marker: PhantomData,
        })
    }

    /// Request every member
    pub fn all(cache: CacheController) -> Self {
        Self {
            cache,
            members: Members::All,
            validator: None,
            _marker: PhantomData,
        }
    }

    pub fn with_validator(mut self, validator: impl Validator<T> + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn members(&self) -> &Members<SubId> {
        &self.members
    }

    pub fn cache(&self) -> &CacheController {
        &self.cache
    }

    fn loc(&self) -> Loc<'_, SubId, T> {
        Loc {
            cache: &self.cache,
            key: None,
            members: &self.members,
            validator: &self.validator,
        }
    }
}

#[async_trait]
impl<SubId, T> Hook for SingleCollection<SubId, T>
where
    SubId: CacheId,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Info = CollectionInfo<SubId>;
    type Output = HashMap<SubId, T>;

    fn is_incomplete(&self, info: &CollectionInfo<SubId>) -> bool {
        !info.is_complete()
    }

    async fn exists(&self) -> Result<CollectionInfo<SubId>> {
        self.loc().exists().await
    }

    async fn get(&self, safe: bool) -> Result<Cached<HashMap<SubId, T>, CollectionInfo<SubId>>> {
        self.loc().get(safe).await
    }

    async fn set(&self, output: &HashMap<SubId, T>, if_exists: bool) -> Result<()> {
        self.loc().set(Some(output), if_exists).await
    }

    async fn del(&self) -> Result<()> {
        self.loc().del().await
    }

    fn merge(
        &self,
        mut target: HashMap<SubId, T>,
        extension: HashMap<SubId, T>,
    ) -> HashMap<SubId, T> {
        target.extend(extension);
        target
    }
}

/// Members of several owners, one hash per owner under `prefix + separator + id`
pub struct MultiCollection<Id, SubId, T> {
    cache: CacheController,
    /// One entry per distinct owner, in first-seen order
    locs: Vec<(Id, String, Members<SubId>)>,
    validator: SharedValidator<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<Id: CacheId, SubId: CacheId, T> MultiCollection<Id, SubId, T> {
    /// Requests for the same owner are unioned, a wildcard absorbing any
    /// explicit list. Each request is checked like [`SingleCollection::new`].
    pub fn new<I, M>(cache: CacheController, requests: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Id, M)>,
        M: Into<Members<SubId>>,
    {
        let mut order = Vec::new();
        let mut unioned: HashMap<Id, Members<SubId>> = HashMap::new();
        for (id, members) in requests {
            let members = members.into();
            if let Members::Only(ids) = &members {
                check_members(ids)?;
            }
            match unioned.get_mut(&id) {
                Some(existing) => existing.absorb(members),
                None => {
                    order.push(id.clone());
                    unioned.insert(id, members);
                }
            }
        }

        let locs = order
            .into_iter()
            .filter_map(|id| {
                let members = unioned.remove(&id)?;
                let key = id.to_string();
                Some((id, key, members))
            })
            .collect();

        Ok(Self {
            cache,
            locs,
            validator: None,
            _marker: PhantomData,
        })
    }

    pub fn with_validator(mut self, validator: impl Validator<T> + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Owners with their unioned member requests
    pub fn requests(&self) -> impl Iterator<Item = (&Id, &Members<SubId>)> {
        self.locs.iter().map(|(id, _, members)| (id, members))
    }

    pub fn cache(&self) -> &CacheController {
        &self.cache
    }

    fn owners(&self) -> impl Iterator<Item = (&Id, Loc<'_, SubId, T>)> {
        self.locs.iter().map(move |(id, key, members)| {
            (
                id,
                Loc {
                    cache: &self.cache,
                    key: Some(key.as_str()),
                    members,
                    validator: &self.validator,
                },
            )
        })
    }
}

#[async_trait]
impl<Id, SubId, T> Hook for MultiCollection<Id, SubId, T>
where
    Id: CacheId,
    SubId: CacheId,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Info = Vec<OwnerInfo<Id, SubId>>;
    type Output = HashMap<Id, HashMap<SubId, T>>;

    fn is_incomplete(&self, info: &Vec<OwnerInfo<Id, SubId>>) -> bool {
        info.iter().any(|owner| !owner.not_found.is_empty())
    }

    async fn exists(&self) -> Result<Vec<OwnerInfo<Id, SubId>>> {
        let checks = join_all(self.owners().map(|(id, loc)| async move {
            let info = loc.exists().await;
            (id, info)
        }))
        .await;

        checks
            .into_iter()
            .map(|(id, info)| {
                info.map(|info| OwnerInfo {
                    id: id.clone(),
                    found: info.found,
                    not_found: info.not_found,
                })
            })
            .collect()
    }

    async fn get(&self, safe: bool) -> Result<Cached<Self::Output, Self::Info>> {
        let reads = join_all(self.owners().map(|(id, loc)| async move {
            let cached = loc.get(safe).await;
            (id, cached)
        }))
        .await;

        let mut value = HashMap::with_capacity(reads.len());
        let mut info = Vec::with_capacity(reads.len());
        for (id, cached) in reads {
            let Cached {
                value: members,
                info: owner,
            } = cached?;
            value.insert(id.clone(), members);
            info.push(OwnerInfo {
                id: id.clone(),
                found: owner.found,
                not_found: owner.not_found,
            });
        }

        Ok(Cached { value, info })
    }

    async fn set(&self, output: &Self::Output, if_exists: bool) -> Result<()> {
        let writes = join_all(
            self.owners()
                .map(|(id, loc)| async move { loc.set(output.get(id), if_exists).await }),
        )
        .await;

        writes.into_iter().collect()
    }

    async fn del(&self) -> Result<()> {
        let removals = join_all(self.owners().map(|(_, loc)| async move { loc.del().await })).await;

        removals.into_iter().collect()
    }

    fn merge(&self, mut target: Self::Output, extension: Self::Output) -> Self::Output {
        for (id, members) in extension {
            target.entry(id).or_default().extend(members);
        }
        target
    }
}
