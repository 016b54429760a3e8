//! Shared, watch-fed object cache with a pluggable indexing hook.
//!
//! The cache is owned by whatever feeds it from the watch stream. Everything
//! else reads through cheap `Arc` handles; nothing here copies objects.
//!
//! Index values for an object are computed before any state changes. When an
//! index function fails, the object is still stored but that index is marked
//! degraded and reports [`StorageError::IndexFailed`], so a reader can never
//! see a half-updated index. The index recovers on its own once every object
//! it failed on has been deleted or re-indexed successfully.

use crate::key::cache_key;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tenantry_core::{StorageError, StoredObject, TenancyResult};
use tracing::{debug, warn};

/// Computes the index values of one object.
pub type IndexFunc = Arc<dyn Fn(&StoredObject) -> TenancyResult<Vec<String>> + Send + Sync>;

/// Event delivered by the external watch mechanism.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(StoredObject),
    Modified(StoredObject),
    Deleted(StoredObject),
}

/// Statistics about cache contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of objects currently cached.
    pub entry_count: u64,
    /// Registered index names.
    pub indexers: Vec<String>,
    /// Indices currently reporting failure.
    pub degraded: Vec<String>,
}

#[derive(Default)]
struct Index {
    /// index value -> cache keys
    values: HashMap<String, BTreeSet<String>>,
    /// cache key -> reason, for objects the index function failed on
    failing: BTreeMap<String, String>,
}

impl Index {
    fn failure(&self) -> Option<&String> {
        self.failing.values().next()
    }

    fn insert(&mut self, key: &str, values: &[String]) {
        for value in values {
            self.values
                .entry(value.clone())
                .or_default()
                .insert(key.to_string());
        }
    }
}

#[derive(Default)]
struct CacheState {
    items: HashMap<String, Arc<StoredObject>>,
    indexers: HashMap<String, IndexFunc>,
    indices: HashMap<String, Index>,
    /// cache key -> index name -> values, used to unindex old versions.
    item_values: HashMap<String, HashMap<String, Vec<String>>>,
}

impl CacheState {
    fn unindex(&mut self, key: &str) {
        for index in self.indices.values_mut() {
            if index.failing.remove(key).is_some() && index.failing.is_empty() {
                debug!(key, "Last failing object gone; index recovered");
            }
        }
        let Some(per_index) = self.item_values.remove(key) else {
            return;
        };
        for (index_name, values) in per_index {
            let Some(index) = self.indices.get_mut(&index_name) else {
                continue;
            };
            for value in values {
                if let Some(keys) = index.values.get_mut(&value) {
                    keys.remove(key);
                    if keys.is_empty() {
                        index.values.remove(&value);
                    }
                }
            }
        }
    }

    fn index(&mut self, key: &str, computed: HashMap<String, Result<Vec<String>, String>>) {
        let mut stored = HashMap::new();
        for (index_name, result) in computed {
            let index = self.indices.entry(index_name.clone()).or_default();
            match result {
                Ok(values) => {
                    index.insert(key, &values);
                    stored.insert(index_name, values);
                }
                Err(reason) => {
                    warn!(index = %index_name, key, %reason, "Index function failed; marking index degraded");
                    index.failing.insert(key.to_string(), reason);
                }
            }
        }
        self.item_values.insert(key.to_string(), stored);
    }

    fn compute(&self, obj: &StoredObject) -> HashMap<String, Result<Vec<String>, String>> {
        self.indexers
            .iter()
            .map(|(name, func)| (name.clone(), func(obj).map_err(|e| e.to_string())))
            .collect()
    }
}

/// Thread-safe shared cache. Clones share the same underlying state.
#[derive(Clone, Default)]
pub struct SharedCache {
    state: Arc<RwLock<CacheState>>,
}

impl std::fmt::Debug for SharedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCache").finish_non_exhaustive()
    }
}

impl SharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, CacheState>, StorageError> {
        self.state.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, CacheState>, StorageError> {
        self.state.write().map_err(|_| StorageError::LockPoisoned)
    }

    /// Register an index function and index every object already cached.
    pub fn add_indexer(&self, name: impl Into<String>, func: IndexFunc) -> TenancyResult<()> {
        let name = name.into();
        let mut state = self.write()?;
        if state.indexers.contains_key(&name) {
            return Err(StorageError::IndexFailed {
                index_name: name,
                reason: "indexer already registered".to_string(),
            }
            .into());
        }

        let mut index = Index::default();
        let mut per_item = Vec::with_capacity(state.items.len());
        for (key, obj) in &state.items {
            match func(obj) {
                Ok(values) => {
                    index.insert(key, &values);
                    per_item.push((key.clone(), values));
                }
                Err(e) => {
                    warn!(index = %name, key = %key, error = %e, "Index build failed");
                    index.failing.insert(key.clone(), e.to_string());
                }
            }
        }
        for (key, values) in per_item {
            state
                .item_values
                .entry(key)
                .or_default()
                .insert(name.clone(), values);
        }
        state.indices.insert(name.clone(), index);
        state.indexers.insert(name.clone(), func);
        debug!(index = %name, "Registered indexer");
        Ok(())
    }

    /// Recompute one index from scratch, e.g. after the index function changed
    /// behaviour. Clears a degraded state when every object now indexes.
    pub fn rebuild_index(&self, name: &str) -> TenancyResult<()> {
        let mut state = self.write()?;
        let func = state
            .indexers
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::IndexNotFound {
                index_name: name.to_string(),
            })?;

        let mut index = Index::default();
        let mut per_item = Vec::new();
        for (key, obj) in &state.items {
            match func(obj) {
                Ok(values) => {
                    index.insert(key, &values);
                    per_item.push((key.clone(), values));
                }
                Err(e) => {
                    index.failing.insert(key.clone(), e.to_string());
                }
            }
        }
        for (key, values) in per_item {
            state
                .item_values
                .entry(key)
                .or_default()
                .insert(name.to_string(), values);
        }
        let failure = index.failure().cloned();
        state.indices.insert(name.to_string(), index);
        match failure {
            Some(reason) => Err(StorageError::IndexFailed {
                index_name: name.to_string(),
                reason,
            }
            .into()),
            None => Ok(()),
        }
    }

    /// Insert or replace an object.
    pub fn upsert(&self, obj: StoredObject) -> TenancyResult<()> {
        let key = cache_key(&obj);
        let mut state = self.write()?;
        let computed = state.compute(&obj);
        state.unindex(&key);
        state.index(&key, computed);
        state.items.insert(key, Arc::new(obj));
        Ok(())
    }

    /// Remove an object by cache key, returning it if present.
    pub fn delete(&self, key: &str) -> TenancyResult<Option<Arc<StoredObject>>> {
        let mut state = self.write()?;
        state.unindex(key);
        Ok(state.items.remove(key))
    }

    /// Replace the whole contents, as after a relist.
    pub fn replace(&self, objs: Vec<StoredObject>) -> TenancyResult<()> {
        let keyed: Vec<(String, StoredObject)> =
            objs.into_iter().map(|o| (cache_key(&o), o)).collect();

        let mut state = self.write()?;
        state.items.clear();
        state.item_values.clear();
        let names: Vec<String> = state.indexers.keys().cloned().collect();
        for name in names {
            state.indices.insert(name, Index::default());
        }
        for (key, obj) in keyed {
            let computed = state.compute(&obj);
            state.index(&key, computed);
            state.items.insert(key, Arc::new(obj));
        }
        Ok(())
    }

    /// Apply one watch event.
    pub fn apply(&self, event: WatchEvent) -> TenancyResult<()> {
        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => self.upsert(obj),
            WatchEvent::Deleted(obj) => self.delete(&cache_key(&obj)).map(|_| ()),
        }
    }

    pub fn get_by_key(&self, key: &str) -> TenancyResult<Option<Arc<StoredObject>>> {
        Ok(self.read()?.items.get(key).cloned())
    }

    /// Every cached object, in no particular order.
    pub fn list(&self) -> TenancyResult<Vec<Arc<StoredObject>>> {
        Ok(self.read()?.items.values().cloned().collect())
    }

    /// Cache keys stored under `value` in index `name`.
    pub fn index_keys(&self, name: &str, value: &str) -> TenancyResult<Vec<String>> {
        let state = self.read()?;
        let index = usable_index(&state, name)?;
        Ok(index
            .values
            .get(value)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Objects stored under `value` in index `name`.
    pub fn by_index(&self, name: &str, value: &str) -> TenancyResult<Vec<Arc<StoredObject>>> {
        let state = self.read()?;
        let index = usable_index(&state, name)?;
        Ok(index
            .values
            .get(value)
            .map(|keys| keys.iter().filter_map(|k| state.items.get(k).cloned()).collect())
            .unwrap_or_default())
    }

    /// Distinct values present in index `name`.
    pub fn index_values(&self, name: &str) -> TenancyResult<Vec<String>> {
        let state = self.read()?;
        let index = usable_index(&state, name)?;
        let mut values: Vec<String> = index.values.keys().cloned().collect();
        values.sort();
        Ok(values)
    }

    pub fn len(&self) -> TenancyResult<usize> {
        Ok(self.read()?.items.len())
    }

    pub fn is_empty(&self) -> TenancyResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> TenancyResult<CacheStats> {
        let state = self.read()?;
        let mut indexers: Vec<String> = state.indexers.keys().cloned().collect();
        indexers.sort();
        let mut degraded: Vec<String> = state
            .indices
            .iter()
            .filter(|(_, idx)| !idx.failing.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        degraded.sort();
        Ok(CacheStats {
            entry_count: state.items.len() as u64,
            indexers,
            degraded,
        })
    }
}

fn usable_index<'a>(state: &'a CacheState, name: &str) -> Result<&'a Index, StorageError> {
    let index = state.indices.get(name).ok_or_else(|| StorageError::IndexNotFound {
        index_name: name.to_string(),
    })?;
    if let Some(reason) = index.failure() {
        return Err(StorageError::IndexFailed {
            index_name: name.to_string(),
            reason: reason.clone(),
        });
    }
    Ok(index)
}
