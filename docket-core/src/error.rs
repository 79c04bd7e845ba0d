//! Error types for DOCKET operations

use crate::{CaseId, EntityType};
use thiserror::Error;
use uuid::Uuid;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: Uuid },

    #[error("Insert failed for {entity_type:?}: {reason}")]
    InsertFailed { entity_type: EntityType, reason: String },

    #[error("Update failed for {entity_type:?} with id {id}: {reason}")]
    UpdateFailed {
        entity_type: EntityType,
        id: Uuid,
        reason: String,
    },

    #[error("Version {version_number} already allocated for case {case_id}")]
    VersionConflict {
        case_id: CaseId,
        version_number: i32,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Storage backend error: {reason}")]
    Backend { reason: String },
}

/// Advisory lock backend errors.
///
/// Never surfaced to callers of the engine: acquisition failures collapse to
/// "lock held" (fail closed), and release failures are logged and bounded by
/// the lock TTL.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock backend unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("Lock script failed: {reason}")]
    ScriptFailed { reason: String },
}

/// External provider errors (AI inference, document, case metadata).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("No provider configured for {capability}")]
    NotConfigured { capability: String },

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: i32,
        message: String,
    },

    #[error("Rate limited by {provider}")]
    RateLimited { provider: String },

    #[error("Invalid API key for {provider}")]
    InvalidApiKey { provider: String },

    #[error("{provider} unreachable: {reason}")]
    Unreachable { provider: String, reason: String },

    #[error("{provider} timed out after {elapsed_ms}ms")]
    Timeout { provider: String, elapsed_ms: i64 },
}

/// Validation errors.
///
/// Raised when provider output or record state does not match the expected
/// shape. A validation failure always fails the job; partial results are
/// never persisted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Response does not match analysis schema: {reason}")]
    SchemaMismatch { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all DOCKET errors.
#[derive(Debug, Clone, Error)]
pub enum DocketError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for DOCKET operations.
pub type DocketResult<T> = Result<T, DocketError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            entity_type: EntityType::Version,
            id: Uuid::nil(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Entity not found"));
        assert!(msg.contains("Version"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_storage_error_display_version_conflict() {
        let err = StorageError::VersionConflict {
            case_id: Uuid::nil(),
            version_number: 3,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Version 3 already allocated"));
    }

    #[test]
    fn test_provider_error_display_timeout() {
        let err = ProviderError::Timeout {
            provider: "anthropic".to_string(),
            elapsed_ms: 120_000,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("anthropic"));
        assert!(msg.contains("120000"));
    }

    #[test]
    fn test_validation_error_display_schema_mismatch() {
        let err = ValidationError::SchemaMismatch {
            reason: "summary is not a string".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("does not match analysis schema"));
        assert!(msg.contains("summary is not a string"));
    }

    #[test]
    fn test_docket_error_from_variants() {
        let storage = DocketError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, DocketError::Storage(_)));

        let lock = DocketError::from(LockError::Unreachable {
            reason: "connection refused".to_string(),
        });
        assert!(matches!(lock, DocketError::Lock(_)));

        let provider = DocketError::from(ProviderError::RateLimited {
            provider: "anthropic".to_string(),
        });
        assert!(matches!(provider, DocketError::Provider(_)));

        let validation = DocketError::from(ValidationError::RequiredFieldMissing {
            field: "summary".to_string(),
        });
        assert!(matches!(validation, DocketError::Validation(_)));

        let config = DocketError::from(ConfigError::MissingRequired {
            field: "model_id".to_string(),
        });
        assert!(matches!(config, DocketError::Config(_)));
    }
}
