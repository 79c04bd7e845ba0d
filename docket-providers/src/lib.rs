//! DOCKET Providers - External Collaborator Traits
//!
//! Provider-agnostic traits for the collaborators the engine consumes:
//! document data, case metadata, AI inference, and the credit check. The
//! engine owns no wire format; these traits are the library boundary, and
//! actual implementations (HTTP clients, database readers) live behind
//! them.

use async_trait::async_trait;
use docket_core::{
    CaseId, CreditClearance, DocketResult, DocumentId, Timestamp, WorkspaceId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod providers;

pub use providers::anthropic::{AnthropicClient, AnthropicInferenceProvider};

// ============================================================================
// DOCUMENT PROVIDER
// ============================================================================

/// A document as returned by the document-data provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentContent {
    pub document_id: DocumentId,
    /// Hex SHA-256 of the raw document content.
    pub content_hash: String,
    pub filename: Option<String>,
    /// Extracted text; None when extraction failed upstream. The engine
    /// degrades to a placeholder rather than failing the whole job.
    pub text: Option<String>,
}

/// Provider of raw document content hashes and extracted text.
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    /// Fetch the listed documents of a case.
    ///
    /// Implementations return one entry per requested id, in any order;
    /// a missing document is an error, a document with failed extraction
    /// is returned with `text: None`.
    async fn fetch_documents(
        &self,
        case_id: CaseId,
        document_ids: &[DocumentId],
    ) -> DocketResult<Vec<DocumentContent>>;
}

// ============================================================================
// CASE METADATA PROVIDER
// ============================================================================

/// Descriptive case fields injected into the analysis prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseMetadata {
    pub case_id: CaseId,
    pub workspace_id: WorkspaceId,
    pub title: String,
    pub court: Option<String>,
    pub docket_number: Option<String>,
    pub subject: Option<String>,
    /// Timestamp of the latest external movement (court update, new
    /// filing), None if the case has never received one.
    pub latest_movement_at: Option<Timestamp>,
}

/// Provider of case metadata and external-update timestamps.
#[async_trait]
pub trait CaseMetadataProvider: Send + Sync {
    /// Full metadata for a case.
    async fn case_metadata(&self, case_id: CaseId) -> DocketResult<CaseMetadata>;

    /// The case's latest external-update timestamp. Drives both key
    /// derivation and cache freshness.
    async fn latest_movement(&self, case_id: CaseId) -> DocketResult<Option<Timestamp>>;
}

// ============================================================================
// INFERENCE PROVIDER
// ============================================================================

/// A structured inference request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub system: String,
    pub prompt: String,
    /// JSON schema the response must match. The provider is asked to
    /// honor it; the engine validates regardless.
    pub schema: Value,
    pub max_tokens: i32,
    pub temperature: f32,
}

/// Provider of AI inference over a prompt and target JSON schema.
///
/// Returns the raw parsed JSON; shape validation happens at the engine
/// boundary, never here. Implementations must be thread-safe.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Run the request and return the provider's JSON output.
    async fn complete_structured(&self, request: &InferenceRequest) -> DocketResult<Value>;

    /// Model identifier this provider runs (e.g.
    /// "claude-3-5-sonnet-20241022").
    fn model_id(&self) -> &str;
}

// ============================================================================
// CREDIT CHECKER
// ============================================================================

/// External credit/quota check.
///
/// The engine consumes only the clearance this trait issues; accounting,
/// metering, and billing live entirely in the host application.
#[async_trait]
pub trait CreditChecker: Send + Sync {
    /// Confirm the workspace has quota for one analysis and issue a
    /// clearance, or fail with the host's own error.
    async fn clear(&self, workspace_id: WorkspaceId) -> DocketResult<CreditClearance>;
}
