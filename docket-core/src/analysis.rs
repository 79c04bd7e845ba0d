//! Typed analysis results and boundary validation.
//!
//! The inference provider returns raw JSON. That JSON is parsed exactly once,
//! here, into either a [`CaseAnalysis`] or a rejection reason; untyped data
//! never travels past this boundary.

use crate::{RiskLevel, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default confidence when the provider omits the field.
pub const DEFAULT_CONFIDENCE: f32 = 0.85;

/// Schema revision stamped into prompt signatures; bump when the shape of
/// [`CaseAnalysis`] changes so old cache entries stop matching.
pub const RESULT_SCHEMA_VERSION: &str = "2024-09";

/// One dated event reconstructed from the case documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Date as written in the source document; free-form because filings
    /// rarely agree on a format.
    pub date: Option<String>,
    pub event: String,
}

/// Structured analysis of a legal case.
///
/// Flat, versioned schema: every optional aspect is an explicit optional
/// field at the top level, validated once at ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseAnalysis {
    pub summary: String,
    pub key_points: Vec<String>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub risk: RiskLevel,
    pub timeline: Vec<TimelineEntry>,
    pub recommendations: Vec<String>,
    /// Provider-reported confidence in [0.0, 1.0]; absent when the model
    /// did not report one.
    pub confidence: Option<f32>,
}

impl CaseAnalysis {
    /// Confidence with the documented fallback applied.
    pub fn confidence_or_default(&self) -> f32 {
        self.confidence.unwrap_or(DEFAULT_CONFIDENCE)
    }

    /// The JSON schema sent to the inference provider.
    ///
    /// Kept alongside the struct so the request shape and the validation
    /// shape cannot drift apart.
    pub fn response_schema() -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["summary", "key_points", "strengths", "weaknesses", "risk", "recommendations"],
            "properties": {
                "summary": { "type": "string" },
                "key_points": { "type": "array", "items": { "type": "string" } },
                "strengths": { "type": "array", "items": { "type": "string" } },
                "weaknesses": { "type": "array", "items": { "type": "string" } },
                "risk": { "type": "string", "enum": ["Low", "Medium", "High", "Critical"] },
                "timeline": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["event"],
                        "properties": {
                            "date": { "type": "string" },
                            "event": { "type": "string" }
                        }
                    }
                },
                "recommendations": { "type": "array", "items": { "type": "string" } },
                "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
            }
        })
    }
}

/// Outcome of parsing a raw provider response.
///
/// Sum type at the trust boundary: the worker either gets a fully validated
/// [`CaseAnalysis`] or a reason to fail the job. There is no partial state.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedAnalysis {
    Valid(CaseAnalysis),
    Invalid { reason: String },
}

impl ParsedAnalysis {
    /// Parse and validate a raw provider response.
    pub fn from_value(raw: &Value) -> Self {
        let obj = match raw.as_object() {
            Some(obj) => obj,
            None => {
                return ParsedAnalysis::Invalid {
                    reason: "response is not a JSON object".to_string(),
                }
            }
        };

        let summary = match obj.get("summary").and_then(Value::as_str) {
            Some(s) if !s.trim().is_empty() => s.to_string(),
            Some(_) => {
                return ParsedAnalysis::Invalid {
                    reason: "summary is empty".to_string(),
                }
            }
            None => {
                return ParsedAnalysis::Invalid {
                    reason: "summary missing or not a string".to_string(),
                }
            }
        };

        let key_points = match string_array(obj.get("key_points")) {
            Some(v) => v,
            None => {
                return ParsedAnalysis::Invalid {
                    reason: "key_points missing or not an array of strings".to_string(),
                }
            }
        };

        let strengths = match string_array(obj.get("strengths")) {
            Some(v) => v,
            None => {
                return ParsedAnalysis::Invalid {
                    reason: "strengths missing or not an array of strings".to_string(),
                }
            }
        };

        let weaknesses = match string_array(obj.get("weaknesses")) {
            Some(v) => v,
            None => {
                return ParsedAnalysis::Invalid {
                    reason: "weaknesses missing or not an array of strings".to_string(),
                }
            }
        };

        let risk = match obj.get("risk").and_then(Value::as_str) {
            Some(s) => match RiskLevel::from_db_str(s) {
                Ok(risk) => risk,
                Err(_) => {
                    return ParsedAnalysis::Invalid {
                        reason: format!("unknown risk level: {}", s),
                    }
                }
            },
            None => {
                return ParsedAnalysis::Invalid {
                    reason: "risk missing or not a string".to_string(),
                }
            }
        };

        let recommendations = match string_array(obj.get("recommendations")) {
            Some(v) => v,
            None => {
                return ParsedAnalysis::Invalid {
                    reason: "recommendations missing or not an array of strings".to_string(),
                }
            }
        };

        // Timeline is optional; entries without an event string are rejected
        // rather than silently dropped.
        let timeline = match obj.get("timeline") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => {
                let mut entries = Vec::with_capacity(items.len());
                for item in items {
                    let event = match item.get("event").and_then(Value::as_str) {
                        Some(e) => e.to_string(),
                        None => {
                            return ParsedAnalysis::Invalid {
                                reason: "timeline entry missing event".to_string(),
                            }
                        }
                    };
                    let date = item.get("date").and_then(Value::as_str).map(String::from);
                    entries.push(TimelineEntry { date, event });
                }
                entries
            }
            Some(_) => {
                return ParsedAnalysis::Invalid {
                    reason: "timeline is not an array".to_string(),
                }
            }
        };

        let confidence = match obj.get("confidence") {
            None | Some(Value::Null) => None,
            Some(v) => match v.as_f64() {
                Some(c) if (0.0..=1.0).contains(&c) => Some(c as f32),
                Some(c) => {
                    return ParsedAnalysis::Invalid {
                        reason: format!("confidence {} outside [0, 1]", c),
                    }
                }
                None => {
                    return ParsedAnalysis::Invalid {
                        reason: "confidence is not a number".to_string(),
                    }
                }
            },
        };

        ParsedAnalysis::Valid(CaseAnalysis {
            summary,
            key_points,
            strengths,
            weaknesses,
            risk,
            timeline,
            recommendations,
            confidence,
        })
    }

    /// Convert into a result, mapping rejection to a [`ValidationError`].
    pub fn into_result(self) -> Result<CaseAnalysis, ValidationError> {
        match self {
            ParsedAnalysis::Valid(analysis) => Ok(analysis),
            ParsedAnalysis::Invalid { reason } => Err(ValidationError::SchemaMismatch { reason }),
        }
    }
}

fn string_array(value: Option<&Value>) -> Option<Vec<String>> {
    let items = value?.as_array()?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(item.as_str()?.to_string());
    }
    Some(out)
}

// ============================================================================
// TESTS
// ============================================================================
