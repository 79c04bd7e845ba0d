//! Prompt assembly and prompt signatures.
//!
//! The prompt signature feeds key derivation: any change to the prompt
//! template, its version tag, the result schema revision, or the requested
//! tier produces a different signature and therefore a different analysis
//! key, so cached results never outlive the prompt that produced them.

use docket_core::{AnalysisTier, CaseAnalysis, DocumentSnapshot, EngineConfig, RESULT_SCHEMA_VERSION};
use docket_providers::{CaseMetadata, InferenceRequest};
use sha2::{Digest, Sha256};

/// Bumped on any wording change that should invalidate cached analyses.
pub const PROMPT_VERSION: &str = "v3";

/// Text substituted for a document whose extraction failed upstream.
pub const EXTRACTION_PLACEHOLDER: &str =
    "[document text unavailable: extraction failed]";

const SYSTEM_PROMPT: &str =
    "You are a senior litigation analyst at a law firm. You review case \
     documents and produce a structured, dispassionate assessment: what the \
     case is about, where it is strong, where it is exposed, and what the \
     handling attorney should do next. Cite facts from the documents; never \
     invent filings, dates, or parties.";

/// One input document with its resolved text.
#[derive(Debug, Clone)]
pub struct GatheredDocument {
    pub snapshot: DocumentSnapshot,
    pub text: String,
}

/// Stable signature over everything that shapes the prompt.
pub fn prompt_signature(tier: AnalysisTier) -> String {
    let mut hasher = Sha256::new();
    hasher.update(SYSTEM_PROMPT.as_bytes());
    hasher.update(PROMPT_VERSION.as_bytes());
    hasher.update(RESULT_SCHEMA_VERSION.as_bytes());
    hasher.update(tier.as_db_str().as_bytes());
    hex::encode(hasher.finalize())
}

fn tier_instructions(tier: AnalysisTier) -> &'static str {
    match tier {
        AnalysisTier::Fast => {
            "Produce a quick triage: a short summary, the three to five most \
             important points, and an overall risk call. Keep the timeline \
             to major events only."
        }
        AnalysisTier::Full => {
            "Produce a thorough review: a complete summary, every material \
             strength and weakness, a reconstructed timeline of all dated \
             events found in the documents, and concrete recommendations."
        }
    }
}

/// Build the structured inference request for a case.
pub fn build_request(
    meta: &CaseMetadata,
    documents: &[GatheredDocument],
    tier: AnalysisTier,
    config: &EngineConfig,
) -> InferenceRequest {
    let mut prompt = String::new();

    prompt.push_str(&format!("Case: {}\n", meta.title));
    if let Some(court) = &meta.court {
        prompt.push_str(&format!("Court: {}\n", court));
    }
    if let Some(number) = &meta.docket_number {
        prompt.push_str(&format!("Docket number: {}\n", number));
    }
    if let Some(subject) = &meta.subject {
        prompt.push_str(&format!("Subject: {}\n", subject));
    }

    prompt.push_str(&format!("\n{}\n", tier_instructions(tier)));

    prompt.push_str(&format!("\nDocuments ({}):\n", documents.len()));
    for (i, doc) in documents.iter().enumerate() {
        let name = doc
            .snapshot
            .filename
            .as_deref()
            .unwrap_or("(unnamed document)");
        prompt.push_str(&format!("\n--- Document {}: {} ---\n", i + 1, name));
        prompt.push_str(&doc.text);
        prompt.push('\n');
    }

    InferenceRequest {
        system: SYSTEM_PROMPT.to_string(),
        prompt,
        schema: CaseAnalysis::response_schema(),
        max_tokens: config.max_output_tokens,
        temperature: 0.2,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_meta() -> CaseMetadata {
        CaseMetadata {
            case_id: Uuid::now_v7(),
            workspace_id: Uuid::now_v7(),
            title: "Acme v. Bolt Logistics".to_string(),
            court: Some("SDNY".to_string()),
            docket_number: Some("1:24-cv-01234".to_string()),
            subject: Some("Breach of carriage contract".to_string()),
            latest_movement_at: None,
        }
    }

    fn sample_doc(text: &str) -> GatheredDocument {
        GatheredDocument {
            snapshot: DocumentSnapshot::new(Uuid::now_v7(), "abc123")
                .with_filename("complaint.pdf"),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_signature_is_stable() {
        assert_eq!(
            prompt_signature(AnalysisTier::Fast),
            prompt_signature(AnalysisTier::Fast)
        );
    }

    #[test]
    fn test_signature_differs_by_tier() {
        assert_ne!(
            prompt_signature(AnalysisTier::Fast),
            prompt_signature(AnalysisTier::Full)
        );
    }

    #[test]
    fn test_request_includes_case_fields_and_documents() {
        let request = build_request(
            &sample_meta(),
            &[sample_doc("The carrier failed to deliver.")],
            AnalysisTier::Full,
            &EngineConfig::default(),
        );
        assert!(request.prompt.contains("Acme v. Bolt Logistics"));
        assert!(request.prompt.contains("SDNY"));
        assert!(request.prompt.contains("complaint.pdf"));
        assert!(request.prompt.contains("The carrier failed to deliver."));
        assert_eq!(request.schema, CaseAnalysis::response_schema());
    }

    #[test]
    fn test_placeholder_text_flows_into_prompt() {
        let request = build_request(
            &sample_meta(),
            &[sample_doc(EXTRACTION_PLACEHOLDER)],
            AnalysisTier::Fast,
            &EngineConfig::default(),
        );
        assert!(request.prompt.contains(EXTRACTION_PLACEHOLDER));
    }
}
