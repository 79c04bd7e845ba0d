//! Lock backend trait.

use async_trait::async_trait;
use docket_core::LockError;
use std::time::Duration;

/// Atomic primitives a lock store must provide.
///
/// Both operations must be atomic on the backend side: `try_set` is a
/// single set-if-absent with TTL, and `compare_and_delete` checks the
/// stored token and deletes in one step (a server-side script in Redis).
/// A read-then-delete sequence would let a slow caller release a lock it
/// no longer owns after expiry and reacquisition by another caller.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Set `name -> token` with the given TTL only if `name` is absent.
    /// Returns true if the value was set.
    async fn try_set(&self, name: &str, token: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Remaining TTL of an existing lock, None if no lock is held.
    async fn ttl_remaining(&self, name: &str) -> Result<Option<Duration>, LockError>;

    /// Delete `name` only if its stored value equals `token`, atomically.
    /// Returns true if the lock was deleted, false if the token did not
    /// match or the lock was already gone.
    async fn compare_and_delete(&self, name: &str, token: &str) -> Result<bool, LockError>;
}
