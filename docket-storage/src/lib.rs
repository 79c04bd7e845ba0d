//! DOCKET Storage - Ledger, Cache, and Lock Stores
//!
//! Storage abstractions for the analysis engine: the version ledger and job
//! store, the key-addressed result cache, and the per-key advisory lock
//! manager. Each concern is a trait with an in-memory implementation for
//! tests and single-node use; shared-store implementations (database,
//! Redis) back multi-instance deployments.

pub mod cache;
pub mod ledger;
pub mod lock;

pub use cache::{
    AnalysisCache, CacheBackend, CacheLookup, CacheStats, InMemoryCacheBackend, MovementSource,
};
pub use ledger::{next_version_number, AnalysisStore, InMemoryAnalysisStore};
pub use lock::{
    InMemoryLockBackend, LockAttempt, LockBackend, LockLease, LockManager, RedisLockBackend,
    DEFAULT_LOCK_TTL,
};
