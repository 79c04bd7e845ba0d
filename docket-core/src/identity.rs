//! Identity types for DOCKET entities

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Legal case identifier.
pub type CaseId = Uuid;

/// Workspace (law-firm tenant) identifier.
pub type WorkspaceId = Uuid;

/// Identifier of a persisted analysis version.
pub type VersionId = Uuid;

/// Identifier of a transient analysis job.
pub type JobId = Uuid;

/// Identifier of a case document held by the document provider.
pub type DocumentId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 content hash for deduplication and integrity verification.
pub type ContentHash = [u8; 32];

/// Generate a new UUIDv7 identifier (timestamp-sortable).
pub fn new_entity_id() -> Uuid {
    Uuid::now_v7()
}

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Hex-encode a content hash for transport and key derivation.
pub fn content_hash_hex(hash: &ContentHash) -> String {
    hex::encode(hash)
}
