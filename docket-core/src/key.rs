//! Content-addressed analysis keys.
//!
//! An [`AnalysisKey`] identifies "this exact analysis request": same
//! documents, same model, same prompt, same state of the case. The digest is
//! a pure function of its inputs, so the key algebra is testable without any
//! I/O. Fetching the case's latest movement timestamp (one of the inputs)
//! happens in docket-engine.

use crate::Timestamp;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Separator between the fields fed to the digest.
///
/// ASCII unit separator: cannot occur in hex hashes, model identifiers, or
/// RFC 3339 timestamps, so the concatenation is unambiguous.
const FIELD_DELIMITER: char = '\u{1f}';

/// Separator between individual document hashes within the hash field.
const HASH_DELIMITER: char = '\u{1e}';

/// Sentinel used in place of the movement timestamp for cases that have
/// never received an external update.
pub const NO_MOVEMENT_SENTINEL: &str = "no-movements";

/// Deterministic content hash identifying a unique analysis request.
///
/// Opaque hex SHA-256 digest. Equal inputs always produce an equal key;
/// reordering the same documents never changes it; any newer external
/// movement always does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisKey(String);

impl AnalysisKey {
    /// Derive a key from the semantic inputs of an analysis request.
    ///
    /// Document hashes are sorted lexicographically before hashing, making
    /// the key independent of document order. The movement timestamp is
    /// rendered with microsecond precision so that any external update to
    /// the case produces a different key.
    pub fn derive(
        document_hashes: &[String],
        model_id: &str,
        prompt_signature: &str,
        latest_movement: Option<Timestamp>,
    ) -> Self {
        let mut sorted = document_hashes.to_vec();
        sorted.sort_unstable();

        let movement = latest_movement
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true))
            .unwrap_or_else(|| NO_MOVEMENT_SENTINEL.to_string());

        let mut material = String::new();
        for (i, hash) in sorted.iter().enumerate() {
            if i > 0 {
                material.push(HASH_DELIMITER);
            }
            material.push_str(hash);
        }
        material.push(FIELD_DELIMITER);
        material.push_str(model_id);
        material.push(FIELD_DELIMITER);
        material.push_str(prompt_signature);
        material.push(FIELD_DELIMITER);
        material.push_str(&movement);

        let digest = Sha256::digest(material.as_bytes());
        AnalysisKey(hex::encode(digest))
    }

    /// Wrap an already-derived digest (e.g. read back from storage).
    pub fn from_digest(digest: impl Into<String>) -> Self {
        AnalysisKey(digest.into())
    }

    /// The hex digest as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnalysisKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for AnalysisKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn hashes(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn sample_movement() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 11, 3, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_key_is_deterministic() {
        let a = AnalysisKey::derive(&hashes(&["h1", "h2"]), "m1", "p1", Some(sample_movement()));
        let b = AnalysisKey::derive(&hashes(&["h1", "h2"]), "m1", "p1", Some(sample_movement()));
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_ignores_document_order() {
        let a = AnalysisKey::derive(&hashes(&["h1", "h2", "h3"]), "m1", "p1", None);
        let b = AnalysisKey::derive(&hashes(&["h3", "h1", "h2"]), "m1", "p1", None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_changes_with_each_input() {
        let base = AnalysisKey::derive(&hashes(&["h1"]), "m1", "p1", Some(sample_movement()));

        let different_docs =
            AnalysisKey::derive(&hashes(&["h2"]), "m1", "p1", Some(sample_movement()));
        let different_model =
            AnalysisKey::derive(&hashes(&["h1"]), "m2", "p1", Some(sample_movement()));
        let different_prompt =
            AnalysisKey::derive(&hashes(&["h1"]), "m1", "p2", Some(sample_movement()));
        let different_movement = AnalysisKey::derive(
            &hashes(&["h1"]),
            "m1",
            "p1",
            Some(sample_movement() + chrono::Duration::microseconds(1)),
        );

        assert_ne!(base, different_docs);
        assert_ne!(base, different_model);
        assert_ne!(base, different_prompt);
        assert_ne!(base, different_movement);
    }

    #[test]
    fn test_no_movement_sentinel_differs_from_any_timestamp() {
        let without = AnalysisKey::derive(&hashes(&["h1"]), "m1", "p1", None);
        let with = AnalysisKey::derive(&hashes(&["h1"]), "m1", "p1", Some(sample_movement()));
        assert_ne!(without, with);
    }

    #[test]
    fn test_hash_list_boundaries_are_unambiguous() {
        // Two hashes "ab" + "c" must not collide with "a" + "bc".
        let a = AnalysisKey::derive(&hashes(&["ab", "c"]), "m1", "p1", None);
        let b = AnalysisKey::derive(&hashes(&["a", "bc"]), "m1", "p1", None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_is_hex_sha256() {
        let key = AnalysisKey::derive(&hashes(&["h1"]), "m1", "p1", None);
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    proptest! {
        #[test]
        fn prop_key_order_independent(
            mut docs in proptest::collection::vec("[a-f0-9]{8,64}", 1..8),
        ) {
            let original = AnalysisKey::derive(&docs, "model-x", "sig-1", None);
            docs.reverse();
            let reversed = AnalysisKey::derive(&docs, "model-x", "sig-1", None);
            prop_assert_eq!(original, reversed);
        }

        #[test]
        fn prop_key_sensitive_to_added_document(
            docs in proptest::collection::vec("[a-f0-9]{8,64}", 1..8),
            extra in "[a-f0-9]{8,64}",
        ) {
            prop_assume!(!docs.contains(&extra));
            let base = AnalysisKey::derive(&docs, "model-x", "sig-1", None);
            let mut grown = docs.clone();
            grown.push(extra);
            let with_extra = AnalysisKey::derive(&grown, "model-x", "sig-1", None);
            prop_assert_ne!(base, with_extra);
        }
    }
}
