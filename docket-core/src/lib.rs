//! DOCKET Core - Entity Types
//!
//! Pure data structures for the analysis caching and job-coordination
//! engine. All other crates depend on this. This crate contains only data
//! types, the key digest, and result validation - no I/O and no
//! orchestration.

pub mod analysis;
pub mod config;
pub mod credit;
pub mod entities;
pub mod enums;
pub mod error;
pub mod identity;
pub mod key;

pub use analysis::{
    CaseAnalysis, ParsedAnalysis, TimelineEntry, DEFAULT_CONFIDENCE, RESULT_SCHEMA_VERSION,
};
pub use config::EngineConfig;
pub use credit::CreditClearance;
pub use entities::{AnalysisJob, AnalysisVersion, CacheEntry, DocumentSnapshot};
pub use enums::{
    AnalysisTier, EntityType, JobStatus, RiskLevel, RiskParseError, StatusParseError,
    TierParseError, VersionStatus,
};
pub use error::{
    ConfigError, DocketError, DocketResult, LockError, ProviderError, StorageError,
    ValidationError,
};
pub use identity::{
    compute_content_hash, content_hash_hex, new_entity_id, CaseId, ContentHash, DocumentId,
    JobId, Timestamp, VersionId, WorkspaceId,
};
pub use key::{AnalysisKey, NO_MOVEMENT_SENTINEL};
