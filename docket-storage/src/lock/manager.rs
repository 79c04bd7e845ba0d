//! Lock manager with token ownership.

use std::sync::Arc;
use std::time::Duration;

use docket_core::{AnalysisKey, DocketResult};
use tracing::{debug, warn};
use uuid::Uuid;

use super::backend::LockBackend;

/// Default lock TTL: generously above the expected worst-case computation
/// time, while bounding how long a crashed worker can block a key.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10 * 60);

/// Namespace prefix for lock names in the shared store.
const LOCK_KEY_PREFIX: &str = "docket:analysis_lock";

/// A held lock.
///
/// Carries the owner token from acquisition through release; the token is
/// never reconstructed from anything else. Not `Clone`: release consumes
/// the lease, so a released lock cannot be released again.
#[derive(Debug)]
pub struct LockLease {
    name: String,
    token: String,
}

impl LockLease {
    /// The lock name in the shared store.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owner token. Exposed for diagnostics; release goes through
    /// [`LockManager::release`].
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Outcome of a lock acquisition attempt.
#[derive(Debug)]
pub enum LockAttempt {
    /// The lock is ours until released or the TTL lapses.
    Acquired(LockLease),
    /// Another worker holds the lock: a computation for this key is
    /// already in flight. Not an error.
    Held {
        /// Remaining TTL of the current holder, when the backend can
        /// report it.
        remaining: Option<Duration>,
    },
}

impl LockAttempt {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockAttempt::Acquired(_))
    }
}

/// Acquires and releases per-key advisory locks.
pub struct LockManager {
    backend: Arc<dyn LockBackend>,
    ttl: Duration,
}

impl LockManager {
    pub fn new(backend: Arc<dyn LockBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn with_default_ttl(backend: Arc<dyn LockBackend>) -> Self {
        Self::new(backend, DEFAULT_LOCK_TTL)
    }

    /// The configured TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock_name(key: &AnalysisKey) -> String {
        format!("{}:{}", LOCK_KEY_PREFIX, key)
    }

    /// Attempt to acquire the lock for a key.
    ///
    /// Fails closed: if the backend is unreachable the attempt reports
    /// `Held` rather than proceeding unlocked.
    pub async fn acquire(&self, key: &AnalysisKey) -> LockAttempt {
        let name = Self::lock_name(key);
        let token = Uuid::new_v4().to_string();

        match self.backend.try_set(&name, &token, self.ttl).await {
            Ok(true) => {
                debug!(lock = %name, "lock acquired");
                LockAttempt::Acquired(LockLease { name, token })
            }
            Ok(false) => {
                let remaining = self.backend.ttl_remaining(&name).await.unwrap_or_default();
                debug!(lock = %name, ?remaining, "lock held by another worker");
                LockAttempt::Held { remaining }
            }
            Err(err) => {
                warn!(lock = %name, error = %err, "lock backend unreachable, failing closed");
                LockAttempt::Held { remaining: None }
            }
        }
    }

    /// Release a held lock.
    ///
    /// Atomic compare-and-delete on the backend: if the token no longer
    /// matches (the lock expired and was reacquired by another worker),
    /// the call is a no-op and returns false.
    pub async fn release(&self, lease: LockLease) -> DocketResult<bool> {
        let deleted = self
            .backend
            .compare_and_delete(&lease.name, &lease.token)
            .await?;
        if deleted {
            debug!(lock = %lease.name, "lock released");
        } else {
            warn!(lock = %lease.name, "release was a no-op: token no longer owns the lock");
        }
        Ok(deleted)
    }

    /// Whether any worker currently holds the lock for a key.
    pub async fn is_held(&self, key: &AnalysisKey) -> DocketResult<bool> {
        let name = Self::lock_name(key);
        Ok(self.backend.ttl_remaining(&name).await?.is_some())
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager").field("ttl", &self.ttl).finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::memory::InMemoryLockBackend;
    use async_trait::async_trait;
    use docket_core::LockError;

    fn make_manager() -> LockManager {
        LockManager::new(Arc::new(InMemoryLockBackend::new()), Duration::from_secs(10))
    }

    fn sample_key() -> AnalysisKey {
        AnalysisKey::derive(&["h1".to_string()], "m", "p", None)
    }

    #[tokio::test]
    async fn test_acquire_then_conflict() {
        let manager = make_manager();
        let key = sample_key();

        let first = manager.acquire(&key).await;
        assert!(first.is_acquired());

        let second = manager.acquire(&key).await;
        match second {
            LockAttempt::Held { remaining } => {
                assert!(remaining.is_some());
            }
            LockAttempt::Acquired(_) => panic!("second acquisition must not succeed"),
        }
    }

    #[tokio::test]
    async fn test_release_frees_the_key() {
        let manager = make_manager();
        let key = sample_key();

        let lease = match manager.acquire(&key).await {
            LockAttempt::Acquired(lease) => lease,
            LockAttempt::Held { .. } => panic!("expected acquisition"),
        };

        assert!(manager.release(lease).await.unwrap());
        assert!(!manager.is_held(&key).await.unwrap());
        assert!(manager.acquire(&key).await.is_acquired());
    }

    #[tokio::test]
    async fn test_release_with_foreign_token_is_noop() {
        let backend = Arc::new(InMemoryLockBackend::new());
        let manager = LockManager::new(backend.clone(), Duration::from_secs(10));
        let key = sample_key();

        let _lease = match manager.acquire(&key).await {
            LockAttempt::Acquired(lease) => lease,
            LockAttempt::Held { .. } => panic!("expected acquisition"),
        };

        // A lease forged with the wrong token must not release the lock.
        let forged = LockLease {
            name: LockManager::lock_name(&key),
            token: "not-the-owner".to_string(),
        };
        assert!(!manager.release(forged).await.unwrap());
        assert!(manager.is_held(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_with_correct_token_succeeds_before_expiry() {
        let manager = make_manager();
        let key = sample_key();

        let lease = match manager.acquire(&key).await {
            LockAttempt::Acquired(lease) => lease,
            LockAttempt::Held { .. } => panic!("expected acquisition"),
        };
        // TTL has not lapsed; the owner can always release.
        assert!(manager.release(lease).await.unwrap());
    }

    /// Backend that always errors, simulating an unreachable lock store.
    struct UnreachableBackend;

    #[async_trait]
    impl LockBackend for UnreachableBackend {
        async fn try_set(
            &self,
            _name: &str,
            _token: &str,
            _ttl: Duration,
        ) -> Result<bool, LockError> {
            Err(LockError::Unreachable {
                reason: "connection refused".to_string(),
            })
        }

        async fn ttl_remaining(&self, _name: &str) -> Result<Option<Duration>, LockError> {
            Err(LockError::Unreachable {
                reason: "connection refused".to_string(),
            })
        }

        async fn compare_and_delete(&self, _name: &str, _token: &str) -> Result<bool, LockError> {
            Err(LockError::Unreachable {
                reason: "connection refused".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_unreachable_backend_fails_closed() {
        let manager = LockManager::new(Arc::new(UnreachableBackend), Duration::from_secs(10));
        let attempt = manager.acquire(&sample_key()).await;
        assert!(!attempt.is_acquired());
    }
}
