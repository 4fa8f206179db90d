//! Matchmaking queues keyed by `(game_type, bet_amount)`. This module
//! holds only the plain data structure; the manager in [`super`] is
//! responsible for taking the per-key lock before touching one.

use std::collections::VecDeque;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::money::Money;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueKey {
    pub game_type: String,
    pub bet_amount: Money,
}

impl QueueKey {
    pub fn new(game_type: impl Into<String>, bet_amount: Money) -> Self {
        QueueKey {
            game_type: game_type.into(),
            bet_amount,
        }
    }

    /// Name this key's entry uses in the manager's [`super::locks::LockTable`].
    pub fn lock_name(&self) -> String {
        format!("queue:{}:{}", self.game_type, self.bet_amount)
    }
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub account_id: Uuid,
    pub session_handle: Uuid,
    pub client_seed: String,
    pub ip: IpAddr,
    pub device_fingerprint: String,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    entries: VecDeque<QueueEntry>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: QueueEntry) {
        self.entries.push_back(entry);
    }

    /// Scans for, removes, and returns a distinct-account opponent for
    /// `account_id`.
    pub fn pop_opponent_for(&mut self, account_id: Uuid) -> Option<QueueEntry> {
        let idx = self.entries.iter().position(|e| e.account_id != account_id)?;
        self.entries.remove(idx)
    }

    /// Removes `account_id` from the queue. Idempotent: removing an
    /// account that is not queued is a no-op.
    pub fn remove(&mut self, account_id: Uuid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.account_id != account_id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(account_id: Uuid) -> QueueEntry {
        QueueEntry {
            account_id,
            session_handle: Uuid::new_v4(),
            client_seed: "seed".to_string(),
            ip: IpAddr::from([127, 0, 0, 1]),
            device_fingerprint: "test-device".to_string(),
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn pop_opponent_skips_the_same_account() {
        let mut q = MatchmakingQueue::new();
        let a = Uuid::new_v4();
        q.push(entry(a));
        assert!(q.pop_opponent_for(a).is_none());
        let b = Uuid::new_v4();
        q.push(entry(b));
        let opponent = q.pop_opponent_for(a).unwrap();
        assert_eq!(opponent.account_id, b);
    }

    #[test]
    fn cancelling_when_not_queued_is_a_no_op() {
        let mut q = MatchmakingQueue::new();
        assert!(!q.remove(Uuid::new_v4()));
        assert!(q.is_empty());
    }
}
