//! Job coordinator.
//!
//! Entry point for analysis requests. The coordinator resolves cache
//! hit/miss, detects in-flight jobs, acquires the per-key lock, allocates a
//! version, and hands the computation to the background worker without
//! waiting for it. All coordination state lives in the shared stores, so any
//! number of engine instances can serve requests concurrently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docket_core::{
    AnalysisJob, AnalysisKey, AnalysisTier, AnalysisVersion, CaseId, CreditClearance,
    DocketError, DocketResult, DocumentId, DocumentSnapshot, EngineConfig, JobId, JobStatus,
    StorageError, Timestamp, ValidationError, VersionId, VersionStatus, WorkspaceId,
};
use docket_providers::{CaseMetadataProvider, DocumentContent, DocumentProvider, InferenceProvider};
use docket_storage::{
    next_version_number, AnalysisCache, AnalysisStore, CacheLookup, LockAttempt, LockManager,
    MovementSource,
};
use tracing::{debug, info, warn};

use crate::keygen::KeyGenerator;
use crate::worker;

/// Outcome of an analysis request.
///
/// A lock held by another instance whose job record is not yet visible is a
/// normal "try later" signal, not an error, so it is a variant here rather
/// than a `DocketError`.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisResponse {
    /// A completed analysis was served from the cache.
    CacheHit {
        version_id: VersionId,
        status: VersionStatus,
    },
    /// A computation is in flight: either just scheduled by this call or
    /// already running for the same key.
    Pending {
        version_id: VersionId,
        job_id: JobId,
        status: JobStatus,
    },
    /// Another instance holds the lock but its job record was not visible
    /// yet. Retry shortly.
    InFlight { retry_after: Option<Duration> },
}

impl AnalysisResponse {
    /// Whether the result came from the cache.
    pub fn cache_hit(&self) -> bool {
        matches!(self, AnalysisResponse::CacheHit { .. })
    }

    /// The version this response refers to, when one exists.
    pub fn version_id(&self) -> Option<VersionId> {
        match self {
            AnalysisResponse::CacheHit { version_id, .. } => Some(*version_id),
            AnalysisResponse::Pending { version_id, .. } => Some(*version_id),
            AnalysisResponse::InFlight { .. } => None,
        }
    }
}

/// Operation counters for the engine. Thread-safe via atomics.
#[derive(Debug, Default)]
pub struct EngineStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    jobs_spawned: AtomicU64,
    jobs_attached: AtomicU64,
    jobs_failed: AtomicU64,
}

/// Point-in-time snapshot of [`EngineStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub jobs_spawned: u64,
    pub jobs_attached: u64,
    pub jobs_failed: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            jobs_spawned: self.jobs_spawned.load(Ordering::Relaxed),
            jobs_attached: self.jobs_attached.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Adapter exposing the case metadata provider as a cache movement source.
pub(crate) struct MetadataMovements(pub(crate) Arc<dyn CaseMetadataProvider>);

#[async_trait]
impl MovementSource for MetadataMovements {
    async fn latest_movement(&self, case_id: CaseId) -> DocketResult<Option<Timestamp>> {
        self.0.latest_movement(case_id).await
    }
}

/// The analysis caching and job-coordination engine.
///
/// Explicitly constructed with its collaborators injected; the host
/// application owns the single process-wide instance. Cloning is cheap
/// (all state is behind `Arc`) and clones share counters and stores.
#[derive(Clone)]
pub struct AnalysisEngine {
    pub(crate) store: Arc<dyn AnalysisStore>,
    pub(crate) cache: Arc<AnalysisCache>,
    pub(crate) locks: Arc<LockManager>,
    pub(crate) documents: Arc<dyn DocumentProvider>,
    pub(crate) metadata: Arc<dyn CaseMetadataProvider>,
    pub(crate) inference: Arc<dyn InferenceProvider>,
    pub(crate) keygen: Arc<KeyGenerator>,
    pub(crate) config: EngineConfig,
    pub(crate) stats: Arc<EngineStats>,
}

impl AnalysisEngine {
    pub fn new(
        store: Arc<dyn AnalysisStore>,
        cache: Arc<AnalysisCache>,
        locks: Arc<LockManager>,
        documents: Arc<dyn DocumentProvider>,
        metadata: Arc<dyn CaseMetadataProvider>,
        inference: Arc<dyn InferenceProvider>,
        config: EngineConfig,
    ) -> Self {
        let keygen = Arc::new(KeyGenerator::new(
            Arc::clone(&metadata),
            config.model_id.clone(),
        ));
        Self {
            store,
            cache,
            locks,
            documents,
            metadata,
            inference,
            keygen,
            config,
            stats: Arc::new(EngineStats::default()),
        }
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Request an analysis of a case.
    ///
    /// Synchronous and short: resolves to a cache hit, a reference to an
    /// in-flight job, or a freshly scheduled job. The computation itself
    /// runs in a spawned task and is never awaited here; callers poll via
    /// [`Self::get_version`].
    ///
    /// Requires a [`CreditClearance`] issued by the host's credit checker;
    /// the engine performs no accounting of its own.
    pub async fn request_analysis(
        &self,
        clearance: CreditClearance,
        case_id: CaseId,
        document_ids: &[DocumentId],
        tier: AnalysisTier,
    ) -> DocketResult<AnalysisResponse> {
        let meta = self.metadata.case_metadata(case_id).await?;
        if clearance.workspace_id() != meta.workspace_id {
            return Err(ValidationError::InvalidValue {
                field: "clearance".to_string(),
                reason: "credit clearance was issued for a different workspace".to_string(),
            }
            .into());
        }

        let documents = self.documents.fetch_documents(case_id, document_ids).await?;
        let document_hashes: Vec<String> =
            documents.iter().map(|d| d.content_hash.clone()).collect();

        let (key, _movement) = self.keygen.derive(case_id, &document_hashes, tier).await?;
        debug!(case_id = %case_id, key = %key, tier = %tier, "analysis requested");

        // Cache first: a hit costs no lock and no job.
        let movements = MetadataMovements(Arc::clone(&self.metadata));
        if let CacheLookup::Hit(entry) = self.cache.lookup(&key, case_id, &movements).await? {
            match self.store.version_get(entry.version_id).await? {
                Some(version) => {
                    self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                    info!(case_id = %case_id, key = %key, version_id = %version.version_id, "cache hit");
                    return Ok(AnalysisResponse::CacheHit {
                        version_id: version.version_id,
                        status: version.status,
                    });
                }
                None => {
                    // Entry points at a version the ledger no longer has;
                    // treat as a miss.
                    warn!(key = %key, version_id = %entry.version_id, "cache entry orphaned, invalidating");
                    self.cache.invalidate(&key).await?;
                }
            }
        }
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        // An active job for this key means someone is already computing it.
        if let Some(job) = self.store.job_find_active_by_key(&key).await? {
            self.stats.jobs_attached.fetch_add(1, Ordering::Relaxed);
            info!(case_id = %case_id, key = %key, job_id = %job.job_id, "attached to in-flight job");
            return Ok(AnalysisResponse::Pending {
                version_id: job.version_id,
                job_id: job.job_id,
                status: job.status,
            });
        }

        // Take the per-key lock. Losing the race is a normal outcome: the
        // winner's job record may not be visible yet, so tell the caller to
        // retry shortly.
        let lease = match self.locks.acquire(&key).await {
            LockAttempt::Acquired(lease) => lease,
            LockAttempt::Held { remaining } => {
                info!(case_id = %case_id, key = %key, "lock held elsewhere, analysis in flight");
                return Ok(AnalysisResponse::InFlight {
                    retry_after: remaining,
                });
            }
        };

        // From here on the lock is ours; any failure before handing off to
        // the worker must release it.
        let scheduled = self
            .schedule_job(case_id, meta.workspace_id, key, tier, &documents)
            .await;

        match scheduled {
            Ok((job, version)) => {
                self.stats.jobs_spawned.fetch_add(1, Ordering::Relaxed);
                info!(
                    case_id = %case_id,
                    job_id = %job.job_id,
                    version_id = %version.version_id,
                    version = version.version_number,
                    "analysis job scheduled"
                );
                let response = AnalysisResponse::Pending {
                    version_id: version.version_id,
                    job_id: job.job_id,
                    status: job.status,
                };
                tokio::spawn(worker::run(self.clone(), job, version, lease));
                Ok(response)
            }
            Err(err) => {
                if let Err(release_err) = self.locks.release(lease).await {
                    warn!(error = %release_err, "failed to release lock after scheduling error");
                }
                Err(err)
            }
        }
    }

    /// Allocate a version number (retrying on cross-key races) and persist
    /// the pending version and queued job records.
    async fn schedule_job(
        &self,
        case_id: CaseId,
        workspace_id: WorkspaceId,
        key: AnalysisKey,
        tier: AnalysisTier,
        documents: &[DocumentContent],
    ) -> DocketResult<(AnalysisJob, AnalysisVersion)> {
        let snapshots: Vec<DocumentSnapshot> = documents
            .iter()
            .map(|d| {
                let snapshot = DocumentSnapshot::new(d.document_id, d.content_hash.clone());
                match &d.filename {
                    Some(name) => snapshot.with_filename(name.clone()),
                    None => snapshot,
                }
            })
            .collect();

        // Two keys on the same case may race on the version number; the
        // ledger's (case, version) uniqueness is the arbiter and we retry
        // allocation, not the job.
        let mut attempts = 0;
        let version = loop {
            attempts += 1;
            let number = next_version_number(self.store.as_ref(), case_id).await?;
            let candidate = AnalysisVersion::pending(
                case_id,
                workspace_id,
                number,
                tier,
                self.config.model_id.clone(),
                key.clone(),
                snapshots.clone(),
            );
            match self.store.version_insert(&candidate).await {
                Ok(()) => break candidate,
                Err(DocketError::Storage(StorageError::VersionConflict { .. }))
                    if attempts < self.config.version_alloc_retries =>
                {
                    debug!(case_id = %case_id, number, "version number conflict, retrying allocation");
                    continue;
                }
                Err(err) => return Err(err),
            }
        };

        let job = AnalysisJob::queued(
            case_id,
            workspace_id,
            key,
            tier,
            snapshots,
            version.version_id,
        );
        self.store.job_insert(&job).await?;

        Ok((job, version))
    }

    /// Fetch a version by id, for polling.
    pub async fn get_version(&self, version_id: VersionId) -> DocketResult<Option<AnalysisVersion>> {
        self.store.version_get(version_id).await
    }

    /// Latest version for a case, optionally filtered by tier.
    pub async fn get_latest_version(
        &self,
        case_id: CaseId,
        tier: Option<AnalysisTier>,
    ) -> DocketResult<Option<AnalysisVersion>> {
        self.store.version_latest_for_case(case_id, tier).await
    }

    /// Fetch a job by id.
    pub async fn get_job(&self, job_id: JobId) -> DocketResult<Option<AnalysisJob>> {
        self.store.job_get(job_id).await
    }
}

impl std::fmt::Debug for AnalysisEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisEngine")
            .field("config", &self.config)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
