//! DOCKET Engine - Job Coordination and Background Computation
//!
//! The produced interface of the analysis core: request an analysis, poll
//! its version, read the latest version for a case. Internally the engine
//! derives content-addressed keys, resolves cache hits, enforces
//! at-most-one-computation-per-key through the lock manager, and drives the
//! background worker through its stages.

pub mod coordinator;
pub mod keygen;
pub mod prompt;
pub mod watchdog;

pub(crate) mod worker;

pub use coordinator::{AnalysisEngine, AnalysisResponse, EngineStats, EngineStatsSnapshot};
pub use keygen::KeyGenerator;
pub use prompt::{GatheredDocument, EXTRACTION_PLACEHOLDER, PROMPT_VERSION};
