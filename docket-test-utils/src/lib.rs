//! DOCKET Test Utilities
//!
//! Centralized test infrastructure for the DOCKET workspace:
//! - Mock providers for documents, case metadata, inference, and credit
//! - A gated inference mock for deterministic concurrency tests
//! - Fixtures for valid and malformed provider responses
//! - Polling helpers for asserting on background-job outcomes

// Re-export in-memory stores from their source crate
pub use docket_storage::{InMemoryAnalysisStore, InMemoryCacheBackend, InMemoryLockBackend};

// Re-export core types for convenience
pub use docket_core::{
    AnalysisJob, AnalysisKey, AnalysisTier, AnalysisVersion, CacheEntry, CaseAnalysis,
    CaseId, CreditClearance, DocketError, DocketResult, DocumentId, DocumentSnapshot,
    EngineConfig, JobStatus, RiskLevel, Timestamp, VersionId, VersionStatus, WorkspaceId,
};

use async_trait::async_trait;
use chrono::Utc;
use docket_core::{EntityType, LockError, StorageError};
use docket_providers::{
    CaseMetadata, CaseMetadataProvider, CreditChecker, DocumentContent, DocumentProvider,
    InferenceProvider, InferenceRequest,
};
use docket_storage::{AnalysisStore, LockBackend};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// MOCK DOCUMENT PROVIDER
// ============================================================================

/// Mock document provider backed by an in-memory map.
#[derive(Debug, Default)]
pub struct MockDocumentProvider {
    documents: RwLock<HashMap<DocumentId, DocumentContent>>,
}

impl MockDocumentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document with extracted text.
    pub fn insert_document(&self, document: DocumentContent) {
        self.documents
            .write()
            .unwrap()
            .insert(document.document_id, document);
    }

    /// Register a document whose text extraction failed.
    pub fn insert_unextracted(&self, document_id: DocumentId, content_hash: &str) {
        self.insert_document(DocumentContent {
            document_id,
            content_hash: content_hash.to_string(),
            filename: Some("scan.pdf".to_string()),
            text: None,
        });
    }
}

#[async_trait]
impl DocumentProvider for MockDocumentProvider {
    async fn fetch_documents(
        &self,
        _case_id: CaseId,
        document_ids: &[DocumentId],
    ) -> DocketResult<Vec<DocumentContent>> {
        let documents = self.documents.read().unwrap();
        let mut out = Vec::with_capacity(document_ids.len());
        for id in document_ids {
            match documents.get(id) {
                Some(doc) => out.push(doc.clone()),
                None => {
                    return Err(StorageError::NotFound {
                        entity_type: EntityType::Document,
                        id: *id,
                    }
                    .into())
                }
            }
        }
        Ok(out)
    }
}

// ============================================================================
// MOCK CASE METADATA PROVIDER
// ============================================================================

/// Mock case metadata provider with a movable update timestamp.
#[derive(Debug)]
pub struct MockCaseMetadataProvider {
    metadata: RwLock<CaseMetadata>,
}

impl MockCaseMetadataProvider {
    pub fn new(metadata: CaseMetadata) -> Self {
        Self {
            metadata: RwLock::new(metadata),
        }
    }

    /// Record a new external movement on the case (court update, filing).
    pub fn record_movement(&self, at: Timestamp) {
        self.metadata.write().unwrap().latest_movement_at = Some(at);
    }

    /// The currently stored movement timestamp.
    pub fn latest(&self) -> Option<Timestamp> {
        self.metadata.read().unwrap().latest_movement_at
    }
}

#[async_trait]
impl CaseMetadataProvider for MockCaseMetadataProvider {
    async fn case_metadata(&self, _case_id: CaseId) -> DocketResult<CaseMetadata> {
        Ok(self.metadata.read().unwrap().clone())
    }

    async fn latest_movement(&self, _case_id: CaseId) -> DocketResult<Option<Timestamp>> {
        Ok(self.metadata.read().unwrap().latest_movement_at)
    }
}

// ============================================================================
// MOCK INFERENCE PROVIDER
// ============================================================================

/// Scripted inference provider.
///
/// Responses are served in push order; when the queue is empty, a fresh
/// valid analysis is returned. `gated()` builds a provider whose calls
/// block until [`MockInferenceProvider::open_gate`] grants a permit, which
/// makes in-flight-job races deterministic in tests.
pub struct MockInferenceProvider {
    model: String,
    responses: Mutex<VecDeque<DocketResult<Value>>>,
    requests: Mutex<Vec<InferenceRequest>>,
    calls: AtomicUsize,
    gate: Arc<tokio::sync::Semaphore>,
    gated: bool,
}

impl MockInferenceProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            gate: Arc::new(tokio::sync::Semaphore::new(0)),
            gated: false,
        }
    }

    /// A provider whose calls block until the gate is opened.
    pub fn gated() -> Self {
        Self {
            gated: true,
            ..Self::new()
        }
    }

    /// Allow one gated call through.
    pub fn open_gate(&self) {
        self.gate.add_permits(1);
    }

    /// Queue the next response.
    pub fn push_response(&self, response: DocketResult<Value>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests captured so far, oldest first.
    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockInferenceProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceProvider for MockInferenceProvider {
    async fn complete_structured(&self, request: &InferenceRequest) -> DocketResult<Value> {
        if self.gated {
            let permit = self.gate.acquire().await.expect("gate closed");
            permit.forget();
        }

        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let scripted = self.responses.lock().unwrap().pop_front();
        match scripted {
            Some(response) => response,
            None => Ok(valid_analysis_json()),
        }
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for MockInferenceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockInferenceProvider")
            .field("calls", &self.call_count())
            .field("gated", &self.gated)
            .finish()
    }
}

// ============================================================================
// MOCK CREDIT CHECKER
// ============================================================================

/// Credit checker that always grants clearance.
#[derive(Debug, Default)]
pub struct MockCreditChecker;

#[async_trait]
impl CreditChecker for MockCreditChecker {
    async fn clear(&self, workspace_id: WorkspaceId) -> DocketResult<CreditClearance> {
        Ok(CreditClearance::granted(workspace_id))
    }
}

// ============================================================================
// FAULTY BACKENDS
// ============================================================================

/// Lock backend that always reports the store as unreachable.
#[derive(Debug, Default)]
pub struct UnreachableLockBackend;

#[async_trait]
impl LockBackend for UnreachableLockBackend {
    async fn try_set(&self, _name: &str, _token: &str, _ttl: Duration) -> Result<bool, LockError> {
        Err(LockError::Unreachable {
            reason: "connection refused".to_string(),
        })
    }

    async fn ttl_remaining(&self, _name: &str) -> Result<Option<Duration>, LockError> {
        Err(LockError::Unreachable {
            reason: "connection refused".to_string(),
        })
    }

    async fn compare_and_delete(&self, _name: &str, _token: &str) -> Result<bool, LockError> {
        Err(LockError::Unreachable {
            reason: "connection refused".to_string(),
        })
    }
}

/// Store wrapper that fails the first version insert with a conflict,
/// simulating two keys racing on the same case's version number.
pub struct ConflictOnceStore<S> {
    inner: S,
    conflicted: AtomicBool,
}

impl<S> ConflictOnceStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            conflicted: AtomicBool::new(false),
        }
    }

    /// Whether the injected conflict has fired.
    pub fn conflict_fired(&self) -> bool {
        self.conflicted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: AnalysisStore> AnalysisStore for ConflictOnceStore<S> {
    async fn version_insert(&self, v: &AnalysisVersion) -> DocketResult<()> {
        if !self.conflicted.swap(true, Ordering::SeqCst) {
            return Err(StorageError::VersionConflict {
                case_id: v.case_id,
                version_number: v.version_number,
            }
            .into());
        }
        self.inner.version_insert(v).await
    }

    async fn version_get(&self, id: VersionId) -> DocketResult<Option<AnalysisVersion>> {
        self.inner.version_get(id).await
    }

    async fn version_update(&self, v: &AnalysisVersion) -> DocketResult<()> {
        self.inner.version_update(v).await
    }

    async fn version_max_number(&self, case_id: CaseId) -> DocketResult<i32> {
        self.inner.version_max_number(case_id).await
    }

    async fn version_latest_for_case(
        &self,
        case_id: CaseId,
        tier: Option<AnalysisTier>,
    ) -> DocketResult<Option<AnalysisVersion>> {
        self.inner.version_latest_for_case(case_id, tier).await
    }

    async fn job_insert(&self, j: &AnalysisJob) -> DocketResult<()> {
        self.inner.job_insert(j).await
    }

    async fn job_get(&self, id: docket_core::JobId) -> DocketResult<Option<AnalysisJob>> {
        self.inner.job_get(id).await
    }

    async fn job_find_active_by_key(
        &self,
        key: &AnalysisKey,
    ) -> DocketResult<Option<AnalysisJob>> {
        self.inner.job_find_active_by_key(key).await
    }

    async fn job_update(&self, j: &AnalysisJob) -> DocketResult<()> {
        self.inner.job_update(j).await
    }

    async fn job_list_stale(&self, cutoff: Timestamp) -> DocketResult<Vec<AnalysisJob>> {
        self.inner.job_list_stale(cutoff).await
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// A provider response that passes schema validation.
pub fn valid_analysis_json() -> Value {
    json!({
        "summary": "Contract dispute over late delivery of refrigerated freight.",
        "key_points": [
            "Carrier missed the delivery window by nine days",
            "Shipper documented spoilage on arrival"
        ],
        "strengths": ["Delivery receipts are signed and dated"],
        "weaknesses": ["No temperature log for the final leg"],
        "risk": "Medium",
        "timeline": [
            { "date": "2024-02-01", "event": "Carriage contract signed" },
            { "date": "2024-03-12", "event": "Shipment delivered late" }
        ],
        "recommendations": ["Demand the carrier's telematics records"],
        "confidence": 0.9
    })
}

/// A provider response missing every required field.
pub fn malformed_analysis_json() -> Value {
    json!({ "verdict": "looks fine", "note": "trust me" })
}

/// Case metadata for a test case, with no movements yet.
pub fn sample_case_metadata(case_id: CaseId, workspace_id: WorkspaceId) -> CaseMetadata {
    CaseMetadata {
        case_id,
        workspace_id,
        title: "Acme Foods v. Bolt Logistics".to_string(),
        court: Some("SDNY".to_string()),
        docket_number: Some("1:24-cv-01234".to_string()),
        subject: Some("Breach of carriage contract".to_string()),
        latest_movement_at: None,
    }
}

/// A document with extracted text and a content hash derived from it.
pub fn make_document(text: &str) -> DocumentContent {
    let hash = docket_core::compute_content_hash(text.as_bytes());
    DocumentContent {
        document_id: Uuid::now_v7(),
        content_hash: docket_core::content_hash_hex(&hash),
        filename: Some("exhibit.pdf".to_string()),
        text: Some(text.to_string()),
    }
}

// ============================================================================
// POLLING HELPERS
// ============================================================================

/// Poll a condition until it holds or the timeout lapses. Returns whether
/// the condition held.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A timestamp strictly after `earlier`, for movement fixtures.
pub fn later_than(earlier: Option<Timestamp>) -> Timestamp {
    match earlier {
        Some(ts) => ts + chrono::Duration::seconds(1),
        None => Utc::now(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
