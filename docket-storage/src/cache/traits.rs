//! Cache backend trait and statistics.

use async_trait::async_trait;
use docket_core::{AnalysisKey, CacheEntry, DocketResult};

/// Backend storage for cache entries.
///
/// The backend is a dumb key-value map; all freshness and staleness policy
/// lives in [`super::AnalysisCache`]. Implementations must be safe to share
/// across service instances (or be explicitly single-node, like the
/// in-memory backend used in tests).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch an entry by key.
    async fn get(&self, key: &AnalysisKey) -> DocketResult<Option<CacheEntry>>;

    /// Insert or replace an entry.
    async fn put(&self, entry: &CacheEntry) -> DocketResult<()>;

    /// Delete an entry. Deleting an absent key is not an error.
    async fn delete(&self, key: &AnalysisKey) -> DocketResult<()>;
}

/// Cache operation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub writes: u64,
}

impl CacheStats {
    /// Hit ratio in [0.0, 1.0]; 0.0 when no lookups have happened.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
