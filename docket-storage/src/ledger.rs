//! Version ledger and job store.
//!
//! The ledger assigns monotonically increasing version numbers per case and
//! persists each analysis attempt as an immutable, ordered record. Jobs are
//! the transient coordination records alongside them. All mutation goes
//! through the job coordinator or the background worker; request-handling
//! code never writes here directly.

use async_trait::async_trait;
use docket_core::{
    AnalysisJob, AnalysisKey, AnalysisTier, AnalysisVersion, CaseId, DocketResult, EntityType,
    JobId, StorageError, Timestamp, VersionId,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Storage trait for analysis versions and jobs.
///
/// Implementations back onto the shared database so that multiple service
/// instances observe the same ledger. `version_insert` must enforce
/// uniqueness on `(case_id, version_number)` at write time; the coordinator
/// relies on [`StorageError::VersionConflict`] to retry allocation when two
/// keys race on the same case.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    // ========================================================================
    // VERSION OPERATIONS
    // ========================================================================

    /// Insert a new version. Fails with `VersionConflict` if the
    /// `(case_id, version_number)` pair is already taken.
    async fn version_insert(&self, v: &AnalysisVersion) -> DocketResult<()>;

    /// Get a version by ID.
    async fn version_get(&self, id: VersionId) -> DocketResult<Option<AnalysisVersion>>;

    /// Replace a version record (status/result transition only).
    async fn version_update(&self, v: &AnalysisVersion) -> DocketResult<()>;

    /// Highest allocated version number for a case, 0 if none.
    async fn version_max_number(&self, case_id: CaseId) -> DocketResult<i32>;

    /// Latest version for a case, optionally filtered by tier, ordered by
    /// version number.
    async fn version_latest_for_case(
        &self,
        case_id: CaseId,
        tier: Option<AnalysisTier>,
    ) -> DocketResult<Option<AnalysisVersion>>;

    // ========================================================================
    // JOB OPERATIONS
    // ========================================================================

    /// Insert a new job.
    async fn job_insert(&self, j: &AnalysisJob) -> DocketResult<()>;

    /// Get a job by ID.
    async fn job_get(&self, id: JobId) -> DocketResult<Option<AnalysisJob>>;

    /// Find the non-terminal job for a key, if any.
    async fn job_find_active_by_key(&self, key: &AnalysisKey)
        -> DocketResult<Option<AnalysisJob>>;

    /// Replace a job record.
    async fn job_update(&self, j: &AnalysisJob) -> DocketResult<()>;

    /// Non-terminal jobs not updated since the cutoff; input to the
    /// abandoned-job sweep.
    async fn job_list_stale(&self, cutoff: Timestamp) -> DocketResult<Vec<AnalysisJob>>;
}

/// Allocate the next version number for a case.
///
/// Reads the current maximum and returns +1. Safe under concurrent callers
/// only together with the insert-time uniqueness constraint: racing
/// allocations for different keys on the same case are resolved by the
/// coordinator retrying on `VersionConflict`.
pub async fn next_version_number<S: AnalysisStore + ?Sized>(
    store: &S,
    case_id: CaseId,
) -> DocketResult<i32> {
    Ok(store.version_max_number(case_id).await? + 1)
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// In-memory analysis store.
///
/// Backs tests and single-node deployments. Enforces the same
/// `(case_id, version_number)` uniqueness constraint a database schema
/// would.
#[derive(Debug, Default)]
pub struct InMemoryAnalysisStore {
    versions: Arc<RwLock<HashMap<VersionId, AnalysisVersion>>>,
    jobs: Arc<RwLock<HashMap<JobId, AnalysisJob>>>,
}

impl InMemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnalysisStore for InMemoryAnalysisStore {
    async fn version_insert(&self, v: &AnalysisVersion) -> DocketResult<()> {
        let mut versions = self
            .versions
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;

        let collision = versions
            .values()
            .any(|existing| existing.case_id == v.case_id && existing.version_number == v.version_number);
        if collision {
            return Err(StorageError::VersionConflict {
                case_id: v.case_id,
                version_number: v.version_number,
            }
            .into());
        }

        versions.insert(v.version_id, v.clone());
        Ok(())
    }

    async fn version_get(&self, id: VersionId) -> DocketResult<Option<AnalysisVersion>> {
        let versions = self
            .versions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(versions.get(&id).cloned())
    }

    async fn version_update(&self, v: &AnalysisVersion) -> DocketResult<()> {
        let mut versions = self
            .versions
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if !versions.contains_key(&v.version_id) {
            return Err(StorageError::NotFound {
                entity_type: EntityType::Version,
                id: v.version_id,
            }
            .into());
        }
        versions.insert(v.version_id, v.clone());
        Ok(())
    }

    async fn version_max_number(&self, case_id: CaseId) -> DocketResult<i32> {
        let versions = self
            .versions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(versions
            .values()
            .filter(|v| v.case_id == case_id)
            .map(|v| v.version_number)
            .max()
            .unwrap_or(0))
    }

    async fn version_latest_for_case(
        &self,
        case_id: CaseId,
        tier: Option<AnalysisTier>,
    ) -> DocketResult<Option<AnalysisVersion>> {
        let versions = self
            .versions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(versions
            .values()
            .filter(|v| v.case_id == case_id)
            .filter(|v| tier.map(|t| v.tier == t).unwrap_or(true))
            .max_by_key(|v| v.version_number)
            .cloned())
    }

    async fn job_insert(&self, j: &AnalysisJob) -> DocketResult<()> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        jobs.insert(j.job_id, j.clone());
        Ok(())
    }

    async fn job_get(&self, id: JobId) -> DocketResult<Option<AnalysisJob>> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(jobs.get(&id).cloned())
    }

    async fn job_find_active_by_key(
        &self,
        key: &AnalysisKey,
    ) -> DocketResult<Option<AnalysisJob>> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(jobs
            .values()
            .find(|j| &j.key == key && !j.status.is_terminal())
            .cloned())
    }

    async fn job_update(&self, j: &AnalysisJob) -> DocketResult<()> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        if !jobs.contains_key(&j.job_id) {
            return Err(StorageError::NotFound {
                entity_type: EntityType::Job,
                id: j.job_id,
            }
            .into());
        }
        jobs.insert(j.job_id, j.clone());
        Ok(())
    }

    async fn job_list_stale(&self, cutoff: Timestamp) -> DocketResult<Vec<AnalysisJob>> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(jobs
            .values()
            .filter(|j| !j.status.is_terminal() && j.updated_at < cutoff)
            .cloned()
            .collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docket_core::{DocumentSnapshot, JobStatus, VersionStatus};
    use uuid::Uuid;

    fn make_version(case_id: CaseId, number: i32) -> AnalysisVersion {
        AnalysisVersion::pending(
            case_id,
            Uuid::now_v7(),
            number,
            AnalysisTier::Fast,
            "model",
            AnalysisKey::derive(&[format!("h{}", number)], "model", "sig", None),
            vec![DocumentSnapshot::new(Uuid::now_v7(), "h1")],
        )
    }

    fn make_job(version: &AnalysisVersion) -> AnalysisJob {
        AnalysisJob::queued(
            version.case_id,
            version.workspace_id,
            version.key.clone(),
            version.tier,
            version.documents.clone(),
            version.version_id,
        )
    }

    #[tokio::test]
    async fn test_version_insert_and_get() {
        let store = InMemoryAnalysisStore::new();
        let version = make_version(Uuid::now_v7(), 1);

        store.version_insert(&version).await.unwrap();
        let fetched = store.version_get(version.version_id).await.unwrap().unwrap();
        assert_eq!(fetched.version_number, 1);
        assert_eq!(fetched.status, VersionStatus::Pending);
    }

    #[tokio::test]
    async fn test_version_number_allocation() {
        let store = InMemoryAnalysisStore::new();
        let case_id = Uuid::now_v7();

        assert_eq!(next_version_number(&store, case_id).await.unwrap(), 1);

        store.version_insert(&make_version(case_id, 1)).await.unwrap();
        store.version_insert(&make_version(case_id, 2)).await.unwrap();

        assert_eq!(next_version_number(&store, case_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_version_conflict_on_duplicate_number() {
        let store = InMemoryAnalysisStore::new();
        let case_id = Uuid::now_v7();

        store.version_insert(&make_version(case_id, 1)).await.unwrap();
        let err = store
            .version_insert(&make_version(case_id, 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            docket_core::DocketError::Storage(StorageError::VersionConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_same_number_on_different_cases_is_fine() {
        let store = InMemoryAnalysisStore::new();
        store
            .version_insert(&make_version(Uuid::now_v7(), 1))
            .await
            .unwrap();
        store
            .version_insert(&make_version(Uuid::now_v7(), 1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_latest_version_respects_tier_filter() {
        let store = InMemoryAnalysisStore::new();
        let case_id = Uuid::now_v7();

        let mut fast = make_version(case_id, 1);
        fast.tier = AnalysisTier::Fast;
        let mut full = make_version(case_id, 2);
        full.tier = AnalysisTier::Full;

        store.version_insert(&fast).await.unwrap();
        store.version_insert(&full).await.unwrap();

        let latest = store
            .version_latest_for_case(case_id, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.version_number, 2);

        let latest_fast = store
            .version_latest_for_case(case_id, Some(AnalysisTier::Fast))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest_fast.version_number, 1);
    }

    #[tokio::test]
    async fn test_job_active_lookup_ignores_terminal() {
        let store = InMemoryAnalysisStore::new();
        let version = make_version(Uuid::now_v7(), 1);
        let mut job = make_job(&version);

        store.job_insert(&job).await.unwrap();
        let active = store.job_find_active_by_key(&job.key).await.unwrap();
        assert!(active.is_some());

        job.fail("boom");
        store.job_update(&job).await.unwrap();
        let active = store.job_find_active_by_key(&job.key).await.unwrap();
        assert!(active.is_none());
    }

    #[tokio::test]
    async fn test_job_list_stale_filters_by_cutoff_and_status() {
        let store = InMemoryAnalysisStore::new();
        let version = make_version(Uuid::now_v7(), 1);

        let mut abandoned = make_job(&version);
        abandoned.updated_at = Utc::now() - chrono::Duration::minutes(30);
        store.job_insert(&abandoned).await.unwrap();

        let fresh = make_job(&version);
        store.job_insert(&fresh).await.unwrap();

        let mut done = make_job(&version);
        done.complete();
        done.updated_at = Utc::now() - chrono::Duration::minutes(30);
        store.job_insert(&done).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::minutes(10);
        let stale = store.job_list_stale(cutoff).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].job_id, abandoned.job_id);
        assert_eq!(stale[0].status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_update_missing_job_is_not_found() {
        let store = InMemoryAnalysisStore::new();
        let version = make_version(Uuid::now_v7(), 1);
        let job = make_job(&version);
        let err = store.job_update(&job).await.unwrap_err();
        assert!(matches!(
            err,
            docket_core::DocketError::Storage(StorageError::NotFound { .. })
        ));
    }
}
