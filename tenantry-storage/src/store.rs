//! Backing object store interface and an in-memory implementation.

use crate::cache::{SharedCache, WatchEvent};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tenantry_core::{StorageError, StoredObject, TenancyResult};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Backing storage engine, addressed by fully built keys.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> TenancyResult<Option<StoredObject>>;

    /// Store a new object, assigning its resource version.
    async fn create(&self, key: &str, obj: StoredObject) -> TenancyResult<StoredObject>;

    /// Replace an existing object.
    ///
    /// A non-zero `obj.meta.resource_version` must match the stored one.
    async fn update(&self, key: &str, obj: StoredObject) -> TenancyResult<StoredObject>;

    async fn delete(&self, key: &str) -> TenancyResult<StoredObject>;

    /// Every object whose key starts with `prefix`, in key order.
    async fn list_prefix(&self, prefix: &str) -> TenancyResult<Vec<StoredObject>>;
}

/// In-memory store for tests and local development.
///
/// When built with [`InMemoryObjectStore::with_watch`] every committed
/// change is also applied to a shared cache, standing in for a watch feed.
#[derive(Clone, Default)]
pub struct InMemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
    revision: Arc<AtomicU64>,
    watch: Option<SharedCache>,
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("revision", &self.revision.load(Ordering::Relaxed))
            .field("watched", &self.watch.is_some())
            .finish()
    }
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_watch(cache: SharedCache) -> Self {
        Self {
            watch: Some(cache),
            ..Self::default()
        }
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(&self, event: WatchEvent) {
        if let Some(cache) = &self.watch {
            if let Err(e) = cache.apply(event) {
                warn!(error = %e, "Failed to apply watch event to cache");
            }
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, key: &str) -> TenancyResult<Option<StoredObject>> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn create(&self, key: &str, mut obj: StoredObject) -> TenancyResult<StoredObject> {
        let mut objects = self.objects.write().await;
        if objects.contains_key(key) {
            return Err(StorageError::AlreadyExists {
                key: key.to_string(),
            }
            .into());
        }
        obj.meta.resource_version = self.next_revision();
        objects.insert(key.to_string(), obj.clone());
        drop(objects);
        debug!(key, resource_version = obj.meta.resource_version, "Created object");
        self.notify(WatchEvent::Added(obj.clone()));
        Ok(obj)
    }

    async fn update(&self, key: &str, mut obj: StoredObject) -> TenancyResult<StoredObject> {
        let mut objects = self.objects.write().await;
        let current = objects.get(key).ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })?;
        let expected = obj.meta.resource_version;
        if expected != 0 && expected != current.meta.resource_version {
            return Err(StorageError::Conflict {
                key: key.to_string(),
                expected: expected.to_string(),
                found: current.meta.resource_version.to_string(),
            }
            .into());
        }
        obj.meta.uid = current.meta.uid;
        obj.meta.creation_timestamp = current.meta.creation_timestamp;
        obj.meta.resource_version = self.next_revision();
        objects.insert(key.to_string(), obj.clone());
        drop(objects);
        self.notify(WatchEvent::Modified(obj.clone()));
        Ok(obj)
    }

    async fn delete(&self, key: &str) -> TenancyResult<StoredObject> {
        let removed = self
            .objects
            .write()
            .await
            .remove(key)
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })?;
        self.notify(WatchEvent::Deleted(removed.clone()));
        Ok(removed)
    }

    async fn list_prefix(&self, prefix: &str) -> TenancyResult<Vec<StoredObject>> {
        Ok(self
            .objects
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, v)| v.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantry_core::{ObjectMeta, ResourceKind, TenancyError};

    fn obj(name: &str) -> StoredObject {
        StoredObject::new(
            ResourceKind::namespaced("", "configmaps"),
            ObjectMeta::new(name).with_namespace("ns"),
        )
    }

    #[tokio::test]
    async fn test_crud() -> TenancyResult<()> {
        let store = InMemoryObjectStore::new();
        let created = store.create("/r/ns/a", obj("a")).await?;
        assert_eq!(created.meta.resource_version, 1);
        assert!(matches!(
            store.create("/r/ns/a", obj("a")).await,
            Err(TenancyError::Storage(StorageError::AlreadyExists { .. }))
        ));

        let updated = store.update("/r/ns/a", created.clone()).await?;
        assert_eq!(updated.meta.resource_version, 2);
        assert_eq!(updated.meta.uid, created.meta.uid);

        let stale = store.update("/r/ns/a", created).await.unwrap_err();
        assert!(matches!(stale, TenancyError::Storage(StorageError::Conflict { .. })));

        store.delete("/r/ns/a").await?;
        assert!(store.get("/r/ns/a").await?.is_none());
        assert!(store.delete("/r/ns/a").await.unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_prefix() -> TenancyResult<()> {
        let store = InMemoryObjectStore::new();
        store.create("/r/t1/w/c/ns/a", obj("a")).await?;
        store.create("/r/t1/w/c/ns/b", obj("b")).await?;
        store.create("/r/t10/w/c/ns/a", obj("a")).await?;
        assert_eq!(store.list_prefix("/r/t1/").await?.len(), 2);
        assert_eq!(store.list_prefix("/r/").await?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_watch_feeds_cache() -> TenancyResult<()> {
        let cache = SharedCache::new();
        let store = InMemoryObjectStore::with_watch(cache.clone());
        store.create("/r/ns/a", obj("a")).await?;
        assert_eq!(cache.len()?, 1);
        store.delete("/r/ns/a").await?;
        assert!(cache.is_empty()?);
        Ok(())
    }
}
