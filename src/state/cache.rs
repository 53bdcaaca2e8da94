use moka::future::Cache;
use std::time::Duration;

/// Shared memory of indices the backend reported as missing.
///
/// Purely an optimization: a known-missing index is skipped without a round
/// trip. A stale entry only hides that index until the entry expires; without
/// the cache the engine still returns the same results, just with more calls.
#[derive(Clone)]
pub struct MissingIndexCache {
    cache: Cache<String, ()>,
}

impl MissingIndexCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub async fn is_missing(&self, index: &str) -> bool {
        self.cache.get(index).await.is_some()
    }

    pub async fn mark_missing(&self, index: &str) {
        self.cache.insert(index.to_string(), ()).await;
    }

    /// Drop every index known to be missing, keeping order
    pub async fn retain_present(&self, indices: Vec<String>) -> Vec<String> {
        let mut present = Vec::with_capacity(indices.len());
        for index in indices {
            if self.is_missing(&index).await {
                tracing::debug!(index = %index, "Skipping index known to be missing");
            } else {
                present.push(index);
            }
        }
        present
    }
}
