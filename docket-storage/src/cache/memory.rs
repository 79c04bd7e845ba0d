//! In-memory cache backend.

use async_trait::async_trait;
use docket_core::{AnalysisKey, CacheEntry, DocketResult};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory cache backend for tests and single-node deployments.
///
/// Uses tokio::sync::RwLock for safe async access.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<AnalysisKey, CacheEntry>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check whether the backend holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &AnalysisKey) -> DocketResult<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, entry: &CacheEntry) -> DocketResult<()> {
        self.entries
            .write()
            .await
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &AnalysisKey) -> DocketResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
