//! Core entity structures for analysis records.

use crate::{
    AnalysisKey, AnalysisTier, CaseId, DocumentId, JobId, JobStatus, Timestamp, VersionId,
    VersionStatus, WorkspaceId,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata snapshot of one input document, frozen at request time.
///
/// The snapshot records what the analysis was computed over; the document
/// text itself is fetched by the worker and never persisted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub document_id: DocumentId,
    /// Hex SHA-256 of the document content as reported by the provider.
    pub content_hash: String,
    pub filename: Option<String>,
}

impl DocumentSnapshot {
    pub fn new(document_id: DocumentId, content_hash: impl Into<String>) -> Self {
        Self {
            document_id,
            content_hash: content_hash.into(),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Immutable per-case, per-attempt analysis record.
///
/// Versions are append-only and ordered by `version_number` (1-based,
/// scoped per case). Nothing mutates after creation except the
/// status/result transition performed by the background worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisVersion {
    pub version_id: VersionId,
    pub case_id: CaseId,
    pub workspace_id: WorkspaceId,
    pub version_number: i32,
    pub tier: AnalysisTier,
    pub model_id: String,
    pub key: AnalysisKey,
    pub documents: Vec<DocumentSnapshot>,
    pub status: VersionStatus,
    /// Validated structured result; set only on completion.
    pub result: Option<serde_json::Value>,
    pub confidence: Option<f32>,
    pub processing_ms: Option<i64>,
    /// Opaque error summary; set only on failure.
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl AnalysisVersion {
    /// Create a new pending version with an allocated version number.
    pub fn pending(
        case_id: CaseId,
        workspace_id: WorkspaceId,
        version_number: i32,
        tier: AnalysisTier,
        model_id: impl Into<String>,
        key: AnalysisKey,
        documents: Vec<DocumentSnapshot>,
    ) -> Self {
        let now = Utc::now();
        Self {
            version_id: Uuid::now_v7(),
            case_id,
            workspace_id,
            version_number,
            tier,
            model_id: model_id.into(),
            key,
            documents,
            status: VersionStatus::Pending,
            result: None,
            confidence: None,
            processing_ms: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark the version as running.
    pub fn mark_running(&mut self) {
        self.status = VersionStatus::Running;
        self.updated_at = Utc::now();
    }

    /// Transition to Completed with the validated result payload.
    pub fn complete(&mut self, result: serde_json::Value, confidence: f32, processing_ms: i64) {
        self.status = VersionStatus::Completed;
        self.result = Some(result);
        self.confidence = Some(confidence);
        self.processing_ms = Some(processing_ms);
        self.updated_at = Utc::now();
    }

    /// Transition to Failed with an opaque error summary.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = VersionStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }
}

/// Transient record coordinating one in-flight computation.
///
/// At most one non-terminal job exists per key at any time; the per-key
/// advisory lock enforces this across service instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub job_id: JobId,
    pub case_id: CaseId,
    pub workspace_id: WorkspaceId,
    pub key: AnalysisKey,
    pub tier: AnalysisTier,
    pub documents: Vec<DocumentSnapshot>,
    /// The version this job will populate.
    pub version_id: VersionId,
    pub status: JobStatus,
    /// Progress percentage, 0-100.
    pub progress: i32,
    /// Human-readable description of the current stage.
    pub progress_message: Option<String>,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl AnalysisJob {
    /// Create a new queued job bound to a pending version.
    pub fn queued(
        case_id: CaseId,
        workspace_id: WorkspaceId,
        key: AnalysisKey,
        tier: AnalysisTier,
        documents: Vec<DocumentSnapshot>,
        version_id: VersionId,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::now_v7(),
            case_id,
            workspace_id,
            key,
            tier,
            documents,
            version_id,
            status: JobStatus::Queued,
            progress: 0,
            progress_message: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Mark the job as running.
    pub fn start(&mut self) {
        let now = Utc::now();
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    /// Record a progress checkpoint. Progress is clamped to 0-100.
    pub fn report_progress(&mut self, progress: i32, message: Option<&str>) {
        self.progress = progress.clamp(0, 100);
        self.progress_message = message.map(|m| m.to_string());
        self.updated_at = Utc::now();
    }

    /// Transition to Completed with progress 100.
    pub fn complete(&mut self) {
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    /// Transition to Failed with an opaque error summary.
    pub fn fail(&mut self, error: impl Into<String>) {
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(now);
        self.updated_at = now;
    }
}

/// Stored mapping from an analysis key to a completed version.
///
/// Created once after a successful computation; read-only afterward except
/// for access bookkeeping. Deleted when expired or when the case has moved
/// externally past the entry's snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: AnalysisKey,
    pub version_id: VersionId,
    pub case_id: CaseId,
    pub workspace_id: WorkspaceId,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub access_count: i32,
    pub last_accessed_at: Timestamp,
    /// The case's latest external-update timestamp observed at write time.
    pub case_updated_at: Option<Timestamp>,
}

impl CacheEntry {
    /// Create an entry expiring `ttl` from now.
    pub fn new(
        key: AnalysisKey,
        version_id: VersionId,
        case_id: CaseId,
        workspace_id: WorkspaceId,
        ttl: std::time::Duration,
        case_updated_at: Option<Timestamp>,
    ) -> Self {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .unwrap_or_else(|_| chrono::Duration::milliseconds(ttl.as_millis() as i64));
        Self {
            key,
            version_id,
            case_id,
            workspace_id,
            created_at: now,
            expires_at: now + ttl,
            access_count: 0,
            last_accessed_at: now,
            case_updated_at,
        }
    }

    /// Check whether the entry has expired.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Check whether the case has moved externally past this entry's
    /// snapshot, making the cached analysis stale even under the same key.
    pub fn is_stale_for(&self, latest_movement: Option<Timestamp>) -> bool {
        match (latest_movement, self.case_updated_at) {
            (Some(latest), Some(snapshot)) => latest > snapshot,
            // A first-ever movement arrived after the entry was written.
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Record a cache hit.
    pub fn record_access(&mut self) {
        self.access_count += 1;
        self.last_accessed_at = Utc::now();
    }
}

// ============================================================================
// TESTS
// ============================================================================
