//! Status and classification enums for analysis records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ANALYSIS TIER
// ============================================================================

/// Requested analysis depth/cost level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalysisTier {
    /// Quick triage pass over the case documents
    Fast,
    /// Full structured review with timeline reconstruction
    Full,
}

impl AnalysisTier {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AnalysisTier::Fast => "Fast",
            AnalysisTier::Full => "Full",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, TierParseError> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(AnalysisTier::Fast),
            "full" => Ok(AnalysisTier::Full),
            _ => Err(TierParseError(s.to_string())),
        }
    }
}

impl fmt::Display for AnalysisTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for AnalysisTier {
    type Err = TierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid tier string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierParseError(pub String);

impl fmt::Display for TierParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid analysis tier: {}", self.0)
    }
}

impl std::error::Error for TierParseError {}

// ============================================================================
// VERSION STATUS
// ============================================================================

/// Status of a persisted analysis version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionStatus {
    /// Created, waiting for a worker to pick it up
    Pending,
    /// A worker is computing the analysis
    Running,
    /// Result payload persisted
    Completed,
    /// Computation failed; error summary recorded
    Failed,
}

impl VersionStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, VersionStatus::Completed | VersionStatus::Failed)
    }

    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            VersionStatus::Pending => "Pending",
            VersionStatus::Running => "Running",
            VersionStatus::Completed => "Completed",
            VersionStatus::Failed => "Failed",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, StatusParseError> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(VersionStatus::Pending),
            "running" => Ok(VersionStatus::Running),
            "completed" => Ok(VersionStatus::Completed),
            "failed" => Ok(VersionStatus::Failed),
            _ => Err(StatusParseError(s.to_string())),
        }
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

// ============================================================================
// JOB STATUS
// ============================================================================

/// Status of a transient coordination job.
///
/// Transitions: Queued → Running → {Completed, Failed}. There is no
/// retry-in-place; a retry is a new job against a (possibly new) key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "Queued",
            JobStatus::Running => "Running",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, StatusParseError> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(StatusParseError(s.to_string())),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusParseError(pub String);

impl fmt::Display for StatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid status: {}", self.0)
    }
}

impl std::error::Error for StatusParseError {}

// ============================================================================
// RISK LEVEL
// ============================================================================

/// Risk classification produced by the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, RiskParseError> {
        match s.to_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            _ => Err(RiskParseError(s.to_string())),
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// Error when parsing an invalid risk level string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskParseError(pub String);

impl fmt::Display for RiskParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid risk level: {}", self.0)
    }
}

impl std::error::Error for RiskParseError {}

// ============================================================================
// ENTITY TYPE
// ============================================================================

/// Entity type discriminator for storage errors and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Version,
    Job,
    CacheEntry,
    Lock,
    Document,
}

// ============================================================================
// TESTS
// ============================================================================
