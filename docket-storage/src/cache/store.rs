//! Cache store with freshness policy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use docket_core::{
    AnalysisKey, CacheEntry, CaseId, DocketResult, Timestamp, VersionId, WorkspaceId,
};
use tracing::debug;

use super::traits::{CacheBackend, CacheStats};

/// Source of a case's latest external-update timestamp.
///
/// The engine adapts its case metadata provider to this trait so the cache
/// can re-check freshness at lookup time without depending on the provider
/// crate.
#[async_trait]
pub trait MovementSource: Send + Sync {
    /// Latest external movement for a case, None if the case has never
    /// received one.
    async fn latest_movement(&self, case_id: CaseId) -> DocketResult<Option<Timestamp>>;
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Valid entry found; access bookkeeping already recorded.
    Hit(CacheEntry),
    /// No usable entry. Expired and stale entries have already been
    /// invalidated by the time this is returned.
    Miss,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    /// The cached version id on a hit.
    pub fn version_id(&self) -> Option<VersionId> {
        match self {
            CacheLookup::Hit(entry) => Some(entry.version_id),
            CacheLookup::Miss => None,
        }
    }
}

/// Analysis cache with explicit freshness semantics.
///
/// `lookup` applies three checks in order: presence, TTL expiry, and
/// external case movement past the entry's snapshot. The movement check is
/// belt-and-suspenders: the key already embeds the movement timestamp seen
/// at derivation, so a mismatch here means the case moved between key
/// derivation and now. Either failure invalidates the entry and reports an
/// ordinary miss.
pub struct AnalysisCache {
    backend: Arc<dyn CacheBackend>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    writes: AtomicU64,
}

impl AnalysisCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Look up a cached analysis for a key.
    ///
    /// Re-fetches the case's latest movement through `movements` and
    /// invalidates the entry if the case has advanced past the entry's
    /// snapshot, even though the stored key is unchanged.
    pub async fn lookup<M: MovementSource + ?Sized>(
        &self,
        key: &AnalysisKey,
        case_id: CaseId,
        movements: &M,
    ) -> DocketResult<CacheLookup> {
        let Some(mut entry) = self.backend.get(key).await? else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "cache miss");
            return Ok(CacheLookup::Miss);
        };

        if entry.is_expired(Utc::now()) {
            debug!(key = %key, "cache entry expired");
            self.invalidate(key).await?;
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(CacheLookup::Miss);
        }

        let latest_movement = movements.latest_movement(case_id).await?;
        if entry.is_stale_for(latest_movement) {
            debug!(key = %key, case_id = %case_id, "cache entry stale, case moved externally");
            self.invalidate(key).await?;
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(CacheLookup::Miss);
        }

        entry.record_access();
        self.backend.put(&entry).await?;
        self.hits.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, version_id = %entry.version_id, "cache hit");
        Ok(CacheLookup::Hit(entry))
    }

    /// Write an entry after a successful computation.
    ///
    /// The entry is created atomically once, never incrementally, so no
    /// reader can observe a partially written result.
    #[allow(clippy::too_many_arguments)]
    pub async fn write(
        &self,
        key: AnalysisKey,
        version_id: VersionId,
        case_id: CaseId,
        workspace_id: WorkspaceId,
        ttl: Duration,
        case_updated_at: Option<Timestamp>,
    ) -> DocketResult<CacheEntry> {
        let entry = CacheEntry::new(key, version_id, case_id, workspace_id, ttl, case_updated_at);
        self.backend.put(&entry).await?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(key = %entry.key, version_id = %version_id, "cache entry written");
        Ok(entry)
    }

    /// Delete an entry. Idempotent; invalidating an absent key is not an
    /// error.
    pub async fn invalidate(&self, key: &AnalysisKey) -> DocketResult<()> {
        self.backend.delete(key).await?;
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for AnalysisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisCache")
            .field("stats", &self.stats())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
