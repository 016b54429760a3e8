//! Tenantry Storage - Tenant-Partitioned Keys, Indices and Collaborators
//!
//! Key construction, the shared watch-fed cache with its tenant indices,
//! the re-scoping protocol and the mutation path built on top of them.

pub mod cache;
pub mod index;
pub mod key;
pub mod rescope;
pub mod store;
pub mod writer;

pub use cache::{CacheStats, IndexFunc, SharedCache, WatchEvent};
pub use index::{
    fallback_scan_count, tenant_index_func, tenant_namespace_index_func, NamespaceLister,
    TenantIndexer, TenantLister, TENANT_INDEX, TENANT_NAMESPACE_INDEX,
};
pub use key::{cache_key, scoped_cache_key, validate_path_segment, KeyBuilder, KeyRoot};
pub use rescope::{CompositionRoot, Dependency, Rescope, Scoped};
pub use store::{InMemoryObjectStore, ObjectStore};
pub use writer::{AnnotatingWriter, ClientSet};
