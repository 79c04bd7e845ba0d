//! Key derivation against live case state.
//!
//! [`docket_core::AnalysisKey::derive`] is the pure digest; this wrapper
//! supplies its one impure input, the case's latest external-update
//! timestamp, read from the case metadata provider.

use std::sync::Arc;

use docket_core::{AnalysisKey, AnalysisTier, CaseId, DocketResult, Timestamp};
use docket_providers::CaseMetadataProvider;

use crate::prompt;

/// Derives analysis keys for requests.
pub struct KeyGenerator {
    metadata: Arc<dyn CaseMetadataProvider>,
    model_id: String,
}

impl KeyGenerator {
    pub fn new(metadata: Arc<dyn CaseMetadataProvider>, model_id: impl Into<String>) -> Self {
        Self {
            metadata,
            model_id: model_id.into(),
        }
    }

    /// Derive the key for a request, returning the movement timestamp that
    /// went into it so callers can reuse the observation.
    pub async fn derive(
        &self,
        case_id: CaseId,
        document_hashes: &[String],
        tier: AnalysisTier,
    ) -> DocketResult<(AnalysisKey, Option<Timestamp>)> {
        let movement = self.metadata.latest_movement(case_id).await?;
        let signature = prompt::prompt_signature(tier);
        let key = AnalysisKey::derive(document_hashes, &self.model_id, &signature, movement);
        Ok((key, movement))
    }
}

impl std::fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGenerator")
            .field("model_id", &self.model_id)
            .finish()
    }
}
