//! Per-key advisory locks for single-flight computation.
//!
//! One analysis computation may run per key at any time, across every
//! instance of the service. The lock lives in a shared key-value store and
//! is owned by a random token: acquisition is an atomic set-if-absent with
//! TTL, release is an atomic compare-and-delete that only the token holder
//! can perform. A crashed worker is bounded by the TTL.

pub mod backend;
pub mod manager;
pub mod memory;
pub mod redis_backend;

pub use backend::LockBackend;
pub use manager::{LockAttempt, LockLease, LockManager, DEFAULT_LOCK_TTL};
pub use memory::InMemoryLockBackend;
pub use redis_backend::RedisLockBackend;
