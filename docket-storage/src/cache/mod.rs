//! Analysis result cache with explicit freshness checks.
//!
//! Maps an [`docket_core::AnalysisKey`] to a completed analysis version.
//! Unlike a plain TTL cache, a lookup also verifies that the case has not
//! moved externally since the entry was written: the key already embeds the
//! movement timestamp observed at derivation time, and the lookup re-checks
//! the live value as a second line of defense against races between key
//! derivation and cache write. Stale detection is silent - it collapses to
//! an ordinary miss, never an error.

pub mod memory;
pub mod store;
pub mod traits;

pub use memory::InMemoryCacheBackend;
pub use store::{AnalysisCache, CacheLookup, MovementSource};
pub use traits::{CacheBackend, CacheStats};
