use std::sync::Arc;

use mini_moka::sync::Cache;

use crate::error::CacheWriteError;
use crate::plan::QueryPlan;

/// Default storage budget of the plan cache.
pub const DEFAULT_MAX_BYTES: u64 = 30 * 1024 * 1024;

#[derive(Clone)]
struct CachedPlan {
    plan: Arc<QueryPlan>,
    weight: u32,
}

/// Size-bounded store of query plans.
///
/// Admission is TinyLFU and eviction is LRU, so a rarely used plan may be
/// refused while the cache is full. Clones share the same storage.
#[derive(Clone)]
pub struct PlanCache {
    inner: Cache<String, CachedPlan>,
    max_bytes: u64,
}

impl PlanCache {
    pub fn new(max_bytes: u64) -> Self {
        let inner = Cache::builder()
            // `weight` already counts the key.
            .weigher(|_key: &String, value: &CachedPlan| value.weight)
            .max_capacity(max_bytes)
            .build();
        PlanCache { inner, max_bytes }
    }

    pub fn get(&self, key: &str) -> Option<Arc<QueryPlan>> {
        self.inner.get(&key.to_string()).map(|cached| cached.plan)
    }

    /// Stores `plan`, weighted by the size of its serialized form.
    pub fn insert(&self, key: String, plan: Arc<QueryPlan>) -> Result<(), CacheWriteError> {
        let size = serde_json::to_vec(plan.as_ref())?.len() as u64 + key.len() as u64;
        if size > self.max_bytes {
            return Err(CacheWriteError::TooLarge {
                size,
                budget: self.max_bytes,
            });
        }
        let weight = u32::try_from(size).unwrap_or(u32::MAX);
        self.inner.insert(key, CachedPlan { plan, weight });
        Ok(())
    }

    /// Stores `plan` off the request path. Failures are logged and never reach the caller.
    pub fn insert_detached(&self, key: String, plan: Arc<QueryPlan>) {
        let cache = self.clone();
        tokio::spawn(async move {
            if let Err(e) = cache.insert(key, plan) {
                tracing::warn!("failed to cache query plan: {e}");
            }
        });
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        PlanCache::new(DEFAULT_MAX_BYTES)
    }
}

/// Hash identifying an operation document and the operation selected in it.
pub fn document_hash(query: &str, operation_name: Option<&str>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(query.as_bytes());
    hasher.update(&[0x00]);
    if let Some(name) = operation_name {
        hasher.update(name.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Cache key of a plan: plans are only valid for the schema they were built on.
pub fn cache_key(schema_version: &str, document_hash: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(schema_version.as_bytes());
    hasher.update(&[0x00]);
    hasher.update(document_hash.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;
    use crate::plan::{FetchNode, PlanNode};

    fn plan(operation: &str) -> Arc<QueryPlan> {
        Arc::new(QueryPlan {
            node: Some(PlanNode::Fetch(FetchNode {
                service_name: "products".to_string(),
                operation_kind: OperationKind::Query,
                operation: operation.to_string(),
                variable_usages: Vec::new(),
                response_keys: vec!["products".to_string()],
                requires: None,
            })),
        })
    }

    #[test]
    fn returns_stored_plans() {
        let cache = PlanCache::default();
        let key = cache_key("v1", &document_hash("{ products { id } }", None));
        assert!(cache.get(&key).is_none());

        let stored = plan("{products{id}}");
        cache.insert(key.clone(), stored.clone()).unwrap();
        assert_eq!(cache.get(&key), Some(stored));

        cache.invalidate_all();
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn keys_change_with_schema_and_operation() {
        let hash = document_hash("query A { a } query B { b }", Some("A"));
        assert_ne!(hash, document_hash("query A { a } query B { b }", Some("B")));
        assert_ne!(hash, document_hash("query A { a } query B { b }", None));
        assert_eq!(hash, document_hash("query A { a } query B { b }", Some("A")));
        assert_ne!(cache_key("v1", &hash), cache_key("v2", &hash));
    }

    #[test]
    fn rejects_plans_over_budget() {
        let cache = PlanCache::new(64);
        let result = cache.insert("key".to_string(), plan(&"x".repeat(256)));
        assert!(matches!(result, Err(CacheWriteError::TooLarge { budget: 64, .. })));
        assert!(cache.get("key").is_none());
    }

    #[test]
    fn weighs_plans_by_serialized_size_and_key() {
        use mini_moka::sync::ConcurrentCacheExt;

        let cache = PlanCache::default();
        let stored = plan("{products{id}}");
        let key = "key".to_string();
        let expected = serde_json::to_vec(stored.as_ref()).unwrap().len() + key.len();

        cache.insert(key, stored).unwrap();
        cache.inner.sync();
        assert_eq!(cache.inner.weighted_size(), expected as u64);
    }

    #[tokio::test]
    async fn detached_inserts_complete_in_the_background() {
        let cache = PlanCache::default();
        cache.insert_detached("key".to_string(), plan("{products{id}}"));
        for _ in 0..100 {
            if cache.get("key").is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(cache.get("key").is_some());
    }
}
