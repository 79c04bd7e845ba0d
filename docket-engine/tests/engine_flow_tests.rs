//! End-to-end flows through the analysis engine with mock collaborators.

use std::sync::Arc;
use std::time::Duration;

use docket_core::{
    AnalysisKey, AnalysisTier, CreditClearance, DocketError, EngineConfig, JobStatus,
    ProviderError, ValidationError, VersionStatus,
};
use docket_engine::{prompt, AnalysisEngine, AnalysisResponse, EXTRACTION_PLACEHOLDER};
use docket_providers::CreditChecker;
use docket_storage::{AnalysisCache, AnalysisStore, LockAttempt, LockManager};
use docket_test_utils::{
    later_than, make_document, malformed_analysis_json, sample_case_metadata, wait_until,
    ConflictOnceStore, InMemoryAnalysisStore, InMemoryCacheBackend, InMemoryLockBackend,
    MockCaseMetadataProvider, MockCreditChecker, MockDocumentProvider, MockInferenceProvider,
    UnreachableLockBackend,
};
use uuid::Uuid;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

struct Harness {
    engine: AnalysisEngine,
    store: Arc<InMemoryAnalysisStore>,
    cache_backend: Arc<InMemoryCacheBackend>,
    locks: Arc<LockManager>,
    documents: Arc<MockDocumentProvider>,
    metadata: Arc<MockCaseMetadataProvider>,
    inference: Arc<MockInferenceProvider>,
    case_id: Uuid,
    workspace_id: Uuid,
}

impl Harness {
    fn build(config: EngineConfig, inference: MockInferenceProvider) -> Self {
        init_tracing();
        config.validate().expect("test config must be valid");

        let case_id = Uuid::now_v7();
        let workspace_id = Uuid::now_v7();

        let store = Arc::new(InMemoryAnalysisStore::new());
        let cache_backend = Arc::new(InMemoryCacheBackend::new());
        let lock_backend = Arc::new(InMemoryLockBackend::new());
        let locks = Arc::new(LockManager::new(lock_backend, config.lock_ttl));
        let cache = Arc::new(AnalysisCache::new(cache_backend.clone()));
        let documents = Arc::new(MockDocumentProvider::new());
        let metadata = Arc::new(MockCaseMetadataProvider::new(sample_case_metadata(
            case_id,
            workspace_id,
        )));
        let inference = Arc::new(inference);

        let engine = AnalysisEngine::new(
            store.clone(),
            cache,
            locks.clone(),
            documents.clone(),
            metadata.clone(),
            inference.clone(),
            config,
        );

        Self {
            engine,
            store,
            cache_backend,
            locks,
            documents,
            metadata,
            inference,
            case_id,
            workspace_id,
        }
    }

    fn with_defaults() -> Self {
        Self::build(EngineConfig::default(), MockInferenceProvider::new())
    }

    fn add_documents(&self, texts: &[&str]) -> Vec<Uuid> {
        texts
            .iter()
            .map(|text| {
                let doc = make_document(text);
                let id = doc.document_id;
                self.documents.insert_document(doc);
                id
            })
            .collect()
    }

    async fn clearance(&self) -> CreditClearance {
        MockCreditChecker
            .clear(self.workspace_id)
            .await
            .expect("mock checker always grants")
    }

    async fn request(&self, document_ids: &[Uuid], tier: AnalysisTier) -> AnalysisResponse {
        let clearance = self.clearance().await;
        self.engine
            .request_analysis(clearance, self.case_id, document_ids, tier)
            .await
            .expect("request should not error")
    }

    async fn wait_for_version(&self, version_id: Uuid, status: VersionStatus) {
        let reached = wait_until(Duration::from_secs(5), || async {
            self.engine
                .get_version(version_id)
                .await
                .unwrap()
                .map(|v| v.status == status)
                .unwrap_or(false)
        })
        .await;
        assert!(reached, "version never reached {:?}", status);
    }

    /// The key the engine will derive for these documents right now.
    async fn derive_key(&self, document_ids: &[Uuid], tier: AnalysisTier) -> AnalysisKey {
        use docket_providers::DocumentProvider;
        let hashes: Vec<String> = self
            .documents
            .fetch_documents(self.case_id, document_ids)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.content_hash)
            .collect();
        AnalysisKey::derive(
            &hashes,
            &self.engine.config().model_id,
            &prompt::prompt_signature(tier),
            self.metadata.latest(),
        )
    }
}

// ============================================================================
// END-TO-END SCENARIOS
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_first_request_computes_then_cache_hits() {
    let harness = Harness::with_defaults();
    let document_ids = harness.add_documents(&["complaint text", "answer text"]);

    // No prior cache: a job is scheduled.
    let first = harness.request(&document_ids, AnalysisTier::Fast).await;
    assert!(!first.cache_hit());
    let version_id = match first {
        AnalysisResponse::Pending {
            version_id,
            status: JobStatus::Queued,
            ..
        } => version_id,
        other => panic!("expected freshly queued job, got {:?}", other),
    };

    harness
        .wait_for_version(version_id, VersionStatus::Completed)
        .await;

    let latest = harness
        .engine
        .get_latest_version(harness.case_id, None)
        .await
        .unwrap()
        .expect("latest version must exist");
    assert_eq!(latest.version_number, 1);
    assert_eq!(latest.status, VersionStatus::Completed);
    assert_eq!(latest.confidence, Some(0.9));
    assert!(latest.result.is_some());
    assert!(latest.processing_ms.is_some());

    // Same inputs, no external movement: served from cache, no new job.
    let second = harness.request(&document_ids, AnalysisTier::Fast).await;
    assert!(second.cache_hit());
    assert_eq!(second.version_id(), Some(version_id));
    assert_eq!(harness.inference.call_count(), 1);

    let stats = harness.engine.stats();
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.jobs_spawned, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_external_movement_invalidates_and_produces_version_two() {
    let harness = Harness::with_defaults();
    let document_ids = harness.add_documents(&["complaint text"]);

    let first = harness.request(&document_ids, AnalysisTier::Fast).await;
    let v1 = first.version_id().unwrap();
    harness.wait_for_version(v1, VersionStatus::Completed).await;
    assert!(harness
        .request(&document_ids, AnalysisTier::Fast)
        .await
        .cache_hit());

    // The case moves externally; identical document hashes must now miss.
    harness
        .metadata
        .record_movement(later_than(harness.metadata.latest()));

    let second = harness.request(&document_ids, AnalysisTier::Fast).await;
    assert!(!second.cache_hit());
    let v2 = second.version_id().unwrap();
    assert_ne!(v1, v2);

    harness.wait_for_version(v2, VersionStatus::Completed).await;
    let latest = harness
        .engine
        .get_latest_version(harness.case_id, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.version_number, 2);
    assert_eq!(harness.inference.call_count(), 2);
}

// ============================================================================
// SINGLE-FLIGHT GUARANTEES
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_requests_share_one_job() {
    let harness = Harness::build(EngineConfig::default(), MockInferenceProvider::gated());
    let document_ids = harness.add_documents(&["complaint text"]);

    let first = harness.request(&document_ids, AnalysisTier::Fast).await;
    let (v1, job1) = match first {
        AnalysisResponse::Pending {
            version_id, job_id, ..
        } => (version_id, job_id),
        other => panic!("expected pending job, got {:?}", other),
    };

    // While the worker is blocked inside the provider call, a second
    // identical request must attach to the in-flight job, not spawn
    // another.
    let second = harness.request(&document_ids, AnalysisTier::Fast).await;
    match second {
        AnalysisResponse::Pending {
            version_id, job_id, ..
        } => {
            assert_eq!(version_id, v1);
            assert_eq!(job_id, job1);
        }
        other => panic!("expected attachment to in-flight job, got {:?}", other),
    }

    harness.inference.open_gate();
    harness.wait_for_version(v1, VersionStatus::Completed).await;

    // Exactly one computation and one version.
    assert_eq!(harness.inference.call_count(), 1);
    assert_eq!(
        harness.store.version_max_number(harness.case_id).await.unwrap(),
        1
    );
    let stats = harness.engine.stats();
    assert_eq!(stats.jobs_spawned, 1);
    assert_eq!(stats.jobs_attached, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_foreign_lock_returns_in_flight() {
    let harness = Harness::with_defaults();
    let document_ids = harness.add_documents(&["complaint text"]);

    // Another instance "holds" the lock with no visible job record yet.
    let key = harness.derive_key(&document_ids, AnalysisTier::Fast).await;
    let _lease = match harness.locks.acquire(&key).await {
        LockAttempt::Acquired(lease) => lease,
        LockAttempt::Held { .. } => panic!("lock must be free at test start"),
    };

    let response = harness.request(&document_ids, AnalysisTier::Fast).await;
    match response {
        AnalysisResponse::InFlight { retry_after } => assert!(retry_after.is_some()),
        other => panic!("expected in-flight signal, got {:?}", other),
    }
    assert_eq!(harness.engine.stats().jobs_spawned, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_lock_backend_fails_closed() {
    let config = EngineConfig::default();
    let case_id = Uuid::now_v7();
    let workspace_id = Uuid::now_v7();

    let documents = Arc::new(MockDocumentProvider::new());
    let doc = make_document("complaint text");
    let doc_id = doc.document_id;
    documents.insert_document(doc);

    let engine = AnalysisEngine::new(
        Arc::new(InMemoryAnalysisStore::new()),
        Arc::new(AnalysisCache::new(Arc::new(InMemoryCacheBackend::new()))),
        Arc::new(LockManager::new(
            Arc::new(UnreachableLockBackend),
            config.lock_ttl,
        )),
        documents,
        Arc::new(MockCaseMetadataProvider::new(sample_case_metadata(
            case_id,
            workspace_id,
        ))),
        Arc::new(MockInferenceProvider::new()),
        config,
    );

    // Correctness over availability: with the lock store down, no unlocked
    // computation may start.
    let response = engine
        .request_analysis(
            CreditClearance::granted(workspace_id),
            case_id,
            &[doc_id],
            AnalysisTier::Fast,
        )
        .await
        .unwrap();
    assert!(matches!(
        response,
        AnalysisResponse::InFlight { retry_after: None }
    ));
    assert_eq!(engine.stats().jobs_spawned, 0);
}

// ============================================================================
// FAILURE PATHS
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_response_fails_job_releases_lock_writes_no_cache() {
    let harness = Harness::with_defaults();
    let document_ids = harness.add_documents(&["complaint text"]);
    harness
        .inference
        .push_response(Ok(malformed_analysis_json()));

    let response = harness.request(&document_ids, AnalysisTier::Fast).await;
    let v1 = response.version_id().unwrap();
    harness.wait_for_version(v1, VersionStatus::Failed).await;

    let version = harness.engine.get_version(v1).await.unwrap().unwrap();
    assert_eq!(version.status, VersionStatus::Failed);
    assert!(version.result.is_none());
    assert_eq!(
        version.error.as_deref(),
        Some("analysis response failed validation")
    );

    let job = harness
        .store
        .job_find_active_by_key(&version.key)
        .await
        .unwrap();
    assert!(job.is_none(), "failed job must be terminal");

    // No cache entry was ever written.
    assert!(harness.cache_backend.is_empty().await);

    // The lock was released on the failure path: the same key can start a
    // fresh job immediately.
    assert!(!harness.locks.is_held(&version.key).await.unwrap());
    let retry = harness.request(&document_ids, AnalysisTier::Fast).await;
    assert!(!retry.cache_hit());
    let v2 = retry.version_id().unwrap();
    assert_ne!(v1, v2);
    harness.wait_for_version(v2, VersionStatus::Completed).await;
    let latest = harness
        .engine
        .get_latest_version(harness.case_id, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.version_number, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_provider_error_fails_job_with_opaque_summary() {
    let harness = Harness::with_defaults();
    let document_ids = harness.add_documents(&["complaint text"]);
    harness.inference.push_response(Err(DocketError::Provider(
        ProviderError::Unreachable {
            provider: "anthropic".to_string(),
            reason: "tcp reset by peer at 10.0.3.7".to_string(),
        },
    )));

    let response = harness.request(&document_ids, AnalysisTier::Fast).await;
    let version_id = response.version_id().unwrap();
    harness
        .wait_for_version(version_id, VersionStatus::Failed)
        .await;

    let version = harness.engine.get_version(version_id).await.unwrap().unwrap();
    let error = version.error.unwrap();
    assert_eq!(error, "analysis provider request failed");
    assert!(!error.contains("10.0.3.7"), "internals must not leak");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_provider_timeout_fails_job() {
    let config = EngineConfig::default()
        .with_lock_ttl(Duration::from_secs(10))
        .with_provider_timeout(Duration::from_millis(50));
    // Gate never opens: the provider call hangs until the timeout fires.
    let harness = Harness::build(config, MockInferenceProvider::gated());
    let document_ids = harness.add_documents(&["complaint text"]);

    let response = harness.request(&document_ids, AnalysisTier::Fast).await;
    let version_id = response.version_id().unwrap();
    harness
        .wait_for_version(version_id, VersionStatus::Failed)
        .await;

    let version = harness.engine.get_version(version_id).await.unwrap().unwrap();
    assert_eq!(version.error.as_deref(), Some("analysis provider timed out"));

    // The lock did not wait out its TTL.
    assert!(!harness.locks.is_held(&version.key).await.unwrap());
}

// ============================================================================
// ALLOCATION AND DEGRADATION
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_version_allocation_conflict_is_retried_transparently() {
    let config = EngineConfig::default();
    let case_id = Uuid::now_v7();
    let workspace_id = Uuid::now_v7();

    let store = Arc::new(ConflictOnceStore::new(InMemoryAnalysisStore::new()));
    let cache = Arc::new(AnalysisCache::new(Arc::new(InMemoryCacheBackend::new())));
    let locks = Arc::new(LockManager::new(
        Arc::new(InMemoryLockBackend::new()),
        config.lock_ttl,
    ));
    let documents = Arc::new(MockDocumentProvider::new());
    let metadata = Arc::new(MockCaseMetadataProvider::new(sample_case_metadata(
        case_id,
        workspace_id,
    )));
    let doc = make_document("complaint text");
    let doc_id = doc.document_id;
    documents.insert_document(doc);

    let engine = AnalysisEngine::new(
        store.clone(),
        cache,
        locks,
        documents,
        metadata,
        Arc::new(MockInferenceProvider::new()),
        config,
    );

    let response = engine
        .request_analysis(
            CreditClearance::granted(workspace_id),
            case_id,
            &[doc_id],
            AnalysisTier::Fast,
        )
        .await
        .expect("conflict must be retried, not surfaced");

    assert!(store.conflict_fired());
    let version_id = response.version_id().unwrap();
    let completed = wait_until(Duration::from_secs(5), || async {
        engine
            .get_version(version_id)
            .await
            .unwrap()
            .map(|v| v.status == VersionStatus::Completed)
            .unwrap_or(false)
    })
    .await;
    assert!(completed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_extraction_degrades_to_placeholder() {
    let harness = Harness::with_defaults();

    let readable = make_document("the readable exhibit");
    let readable_id = readable.document_id;
    harness.documents.insert_document(readable);

    let unreadable_id = Uuid::now_v7();
    harness
        .documents
        .insert_unextracted(unreadable_id, "feedface");

    let response = harness
        .request(&[readable_id, unreadable_id], AnalysisTier::Full)
        .await;
    let version_id = response.version_id().unwrap();
    harness
        .wait_for_version(version_id, VersionStatus::Completed)
        .await;

    // The job did not abort; the unreadable document became a placeholder
    // inside the prompt.
    let requests = harness.inference.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].prompt.contains("the readable exhibit"));
    assert!(requests[0].prompt.contains(EXTRACTION_PLACEHOLDER));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_clearance_for_wrong_workspace_is_rejected() {
    let harness = Harness::with_defaults();
    let document_ids = harness.add_documents(&["complaint text"]);

    let foreign_clearance = CreditClearance::granted(Uuid::now_v7());
    let err = harness
        .engine
        .request_analysis(
            foreign_clearance,
            harness.case_id,
            &document_ids,
            AnalysisTier::Fast,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DocketError::Validation(ValidationError::InvalidValue { .. })
    ));
}

// ============================================================================
// WATCHDOG
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_watchdog_reaps_abandoned_jobs() {
    use docket_core::{AnalysisJob, AnalysisVersion, DocumentSnapshot};

    let harness = Harness::with_defaults();

    let key = AnalysisKey::derive(&["h1".to_string()], "model", "sig", None);
    let mut version = AnalysisVersion::pending(
        harness.case_id,
        harness.workspace_id,
        1,
        AnalysisTier::Fast,
        "model",
        key.clone(),
        vec![DocumentSnapshot::new(Uuid::now_v7(), "h1")],
    );
    let mut job = AnalysisJob::queued(
        harness.case_id,
        harness.workspace_id,
        key,
        AnalysisTier::Fast,
        version.documents.clone(),
        version.version_id,
    );

    // Simulate a worker that died long ago: records stuck non-terminal,
    // lock long expired.
    let long_ago = chrono::Utc::now() - chrono::Duration::minutes(30);
    job.updated_at = long_ago;
    version.updated_at = long_ago;
    harness.store.version_insert(&version).await.unwrap();
    harness.store.job_insert(&job).await.unwrap();

    let reaped = harness.engine.reap_abandoned_jobs().await.unwrap();
    assert_eq!(reaped, 1);

    let job = harness.store.job_get(job.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let version = harness
        .engine
        .get_version(version.version_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(version.status, VersionStatus::Failed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_watchdog_skips_jobs_whose_lock_is_held() {
    use docket_core::{AnalysisJob, AnalysisVersion, DocumentSnapshot};

    let harness = Harness::with_defaults();

    let key = AnalysisKey::derive(&["h2".to_string()], "model", "sig", None);
    let version = AnalysisVersion::pending(
        harness.case_id,
        harness.workspace_id,
        1,
        AnalysisTier::Fast,
        "model",
        key.clone(),
        vec![DocumentSnapshot::new(Uuid::now_v7(), "h2")],
    );
    let mut job = AnalysisJob::queued(
        harness.case_id,
        harness.workspace_id,
        key.clone(),
        AnalysisTier::Fast,
        version.documents.clone(),
        version.version_id,
    );
    job.updated_at = chrono::Utc::now() - chrono::Duration::minutes(30);
    harness.store.version_insert(&version).await.unwrap();
    harness.store.job_insert(&job).await.unwrap();

    // A live lock means a worker may still be running; leave the job alone.
    let _lease = match harness.locks.acquire(&key).await {
        LockAttempt::Acquired(lease) => lease,
        LockAttempt::Held { .. } => panic!("lock must be free at test start"),
    };
    let reaped = harness.engine.reap_abandoned_jobs().await.unwrap();
    assert_eq!(reaped, 0);

    let job = harness.store.job_get(job.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
}
