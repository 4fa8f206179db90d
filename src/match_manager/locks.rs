//! Named, TTL-bounded locks guarding rooms and queue keys: expiry bounds
//! how long a crashed owner can stall the system.
//!
//! A single in-process `tokio::sync::Mutex` cannot be forcibly revoked
//! out from under a guard a task still holds. What this table *can* do
//! is bound how long a caller waits to acquire one: [`LockTable::acquire`]
//! wraps the wait in [`tokio::time::timeout`], surfacing
//! [`CoreError::Timeout`] instead of hanging forever, so a wedged holder
//! degrades to a recoverable timeout the FSM can act on rather than a
//! stalled process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::{CoreError, CoreResult};

#[derive(Default)]
pub struct LockTable {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Held for as long as the caller needs the named resource exclusive;
/// dropping it releases the lock.
pub struct LockGuard {
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

impl LockTable {
    pub fn new() -> Self {
        LockTable {
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn handle(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquires the named lock, failing with [`CoreError::Timeout`] if it
    /// is not free within `ttl`.
    pub async fn acquire(&self, name: &str, ttl: Duration) -> CoreResult<LockGuard> {
        let handle = self.handle(name).await;
        match tokio::time::timeout(ttl, handle.lock_owned()).await {
            Ok(guard) => Ok(LockGuard { _guard: guard }),
            Err(_) => Err(CoreError::Timeout {
                context: format!("lock '{name}' was not free within its TTL"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn two_distinct_names_do_not_contend() {
        let table = LockTable::new();
        let _a = table.acquire("room:1", Duration::from_millis(50)).await.unwrap();
        let _b = table.acquire("room:2", Duration::from_millis(50)).await.unwrap();
    }

    #[tokio::test]
    async fn a_held_lock_times_out_for_a_second_caller() {
        let table = Arc::new(LockTable::new());
        let guard = table.acquire("room:1", Duration::from_millis(50)).await.unwrap();
        let err = table.acquire("room:1", Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, CoreError::Timeout { .. }));
        drop(guard);
        assert!(table.acquire("room:1", Duration::from_millis(50)).await.is_ok());
    }
}
