//! In-memory lock backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docket_core::LockError;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// In-memory lock backend for tests and single-node deployments.
///
/// Expiry is enforced lazily: an expired entry is treated as absent the
/// next time it is touched.
#[derive(Debug, Default)]
pub struct InMemoryLockBackend {
    locks: Mutex<HashMap<String, StoredLock>>,
}

#[derive(Debug, Clone)]
struct StoredLock {
    token: String,
    expires_at: DateTime<Utc>,
}

impl StoredLock {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl InMemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockBackend for InMemoryLockBackend {
    async fn try_set(&self, name: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = Utc::now();
        let mut locks = self.locks.lock().await;

        if let Some(existing) = locks.get(name) {
            if !existing.is_expired(now) {
                return Ok(false);
            }
        }

        let ttl = chrono::Duration::from_std(ttl)
            .unwrap_or_else(|_| chrono::Duration::milliseconds(ttl.as_millis() as i64));
        locks.insert(
            name.to_string(),
            StoredLock {
                token: token.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn ttl_remaining(&self, name: &str) -> Result<Option<Duration>, LockError> {
        let now = Utc::now();
        let locks = self.locks.lock().await;
        Ok(locks.get(name).and_then(|lock| {
            if lock.is_expired(now) {
                None
            } else {
                (lock.expires_at - now).to_std().ok()
            }
        }))
    }

    async fn compare_and_delete(&self, name: &str, token: &str) -> Result<bool, LockError> {
        let now = Utc::now();
        let mut locks = self.locks.lock().await;
        match locks.get(name) {
            Some(lock) if !lock.is_expired(now) && lock.token == token => {
                locks.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_if_absent() {
        let backend = InMemoryLockBackend::new();
        assert!(backend
            .try_set("lock:a", "t1", Duration::from_secs(10))
            .await
            .unwrap());
        assert!(!backend
            .try_set("lock:a", "t2", Duration::from_secs(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_reacquired() {
        let backend = InMemoryLockBackend::new();
        assert!(backend
            .try_set("lock:a", "t1", Duration::from_millis(1))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(backend
            .try_set("lock:a", "t2", Duration::from_secs(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_delete_requires_matching_token() {
        let backend = InMemoryLockBackend::new();
        backend
            .try_set("lock:a", "t1", Duration::from_secs(10))
            .await
            .unwrap();

        assert!(!backend.compare_and_delete("lock:a", "t2").await.unwrap());
        assert!(backend.ttl_remaining("lock:a").await.unwrap().is_some());

        assert!(backend.compare_and_delete("lock:a", "t1").await.unwrap());
        assert!(backend.ttl_remaining("lock:a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl_remaining_decreases() {
        let backend = InMemoryLockBackend::new();
        backend
            .try_set("lock:a", "t1", Duration::from_secs(10))
            .await
            .unwrap();
        let remaining = backend.ttl_remaining("lock:a").await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(10));
        assert!(remaining > Duration::from_secs(8));
    }
}
