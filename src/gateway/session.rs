//! Session multiplexing: the gateway holds only identifiers. A room owns
//! its [`crate::match_manager::PlayerConnection`]s; this table maps a
//! transport-level session handle to `(account_id, room_id)` and nothing
//! heavier, breaking the room <-> player <-> gateway reference cycle by
//! indirection through ids.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::ServerEvent;

/// One registered transport-level connection.
struct SessionEntry {
    account_id: Uuid,
    room_id: Option<Uuid>,
    outbox: mpsc::UnboundedSender<ServerEvent>,
    last_seen: DateTime<Utc>,
}

/// Session handle -> `(account_id, room_id)` plus room membership,
/// guarded by a single lock: one small lock rather than one per session,
/// since sessions are cheap to register/remove compared to rooms.
#[derive(Default)]
pub struct SessionTable {
    sessions: HashMap<Uuid, SessionEntry>,
    rooms: HashMap<Uuid, HashSet<Uuid>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session for `account_id`, returning the sending
    /// half of its outbound channel's receiver-owning half is kept by the
    /// transport; the gateway only ever pushes onto `outbox`.
    pub fn register(
        &mut self,
        session_handle: Uuid,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.insert(
            session_handle,
            SessionEntry {
                account_id,
                room_id: None,
                outbox: tx,
                last_seen: now,
            },
        );
        rx
    }

    pub fn remove(&mut self, session_handle: Uuid) {
        if let Some(entry) = self.sessions.remove(&session_handle) {
            if let Some(room_id) = entry.room_id {
                if let Some(members) = self.rooms.get_mut(&room_id) {
                    members.remove(&session_handle);
                }
            }
        }
    }

    pub fn join_room(&mut self, session_handle: Uuid, room_id: Uuid) {
        if let Some(entry) = self.sessions.get_mut(&session_handle) {
            entry.room_id = Some(room_id);
        }
        self.rooms.entry(room_id).or_default().insert(session_handle);
    }

    pub fn account_of(&self, session_handle: Uuid) -> Option<Uuid> {
        self.sessions.get(&session_handle).map(|e| e.account_id)
    }

    pub fn room_of(&self, session_handle: Uuid) -> Option<Uuid> {
        self.sessions.get(&session_handle).and_then(|e| e.room_id)
    }

    pub fn touch(&mut self, session_handle: Uuid, now: DateTime<Utc>) {
        if let Some(entry) = self.sessions.get_mut(&session_handle) {
            entry.last_seen = now;
        }
    }

    pub fn last_seen(&self, session_handle: Uuid) -> Option<DateTime<Utc>> {
        self.sessions.get(&session_handle).map(|e| e.last_seen)
    }

    /// Delivers `event` to exactly one session. A dropped receiver
    /// (disconnected transport) is a no-op; the gateway does not treat a
    /// full/closed channel as fatal.
    pub fn to_session(&self, session_handle: Uuid, event: ServerEvent) {
        if let Some(entry) = self.sessions.get(&session_handle) {
            let _ = entry.outbox.send(event);
        }
    }

    /// Broadcasts `event` to every session in `room_id`.
    pub fn to_room(&self, room_id: Uuid, event: ServerEvent) {
        if let Some(members) = self.rooms.get(&room_id) {
            for handle in members {
                self.to_session(*handle, event.clone());
            }
        }
    }

    /// Broadcasts `event` to every session in `room_id` other than
    /// `except`.
    pub fn to_room_except(&self, room_id: Uuid, except: Uuid, event: ServerEvent) {
        if let Some(members) = self.rooms.get(&room_id) {
            for handle in members {
                if *handle != except {
                    self.to_session(*handle, event.clone());
                }
            }
        }
    }

    /// Sessions whose last heartbeat is older than `timeout`. Returns
    /// `(session_handle, account_id)` pairs for the caller to report to
    /// the match manager.
    pub fn room_members_with_stale_heartbeat(
        &self,
        now: DateTime<Utc>,
        timeout: std::time::Duration,
    ) -> Vec<(Uuid, Uuid)> {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::seconds(10));
        self.sessions
            .iter()
            .filter(|(_, entry)| entry.room_id.is_some() && now - entry.last_seen > timeout)
            .map(|(handle, entry)| (*handle, entry.account_id))
            .collect()
    }

    pub fn room_members(&self, room_id: Uuid) -> Vec<Uuid> {
        self.rooms
            .get(&room_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_room_except_skips_the_excluded_session() {
        let mut table = SessionTable::new();
        let room = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rx_a = table.register(a, Uuid::new_v4(), Utc::now());
        let mut rx_b = table.register(b, Uuid::new_v4(), Utc::now());
        table.join_room(a, room);
        table.join_room(b, room);

        table.to_room_except(room, a, ServerEvent::MatchStarted);
        assert!(rx_a.try_recv().is_err());
        assert!(matches!(rx_b.try_recv().unwrap(), ServerEvent::MatchStarted));
    }

    #[test]
    fn removing_a_session_drops_its_room_membership() {
        let mut table = SessionTable::new();
        let room = Uuid::new_v4();
        let a = Uuid::new_v4();
        let _rx = table.register(a, Uuid::new_v4(), Utc::now());
        table.join_room(a, room);
        table.remove(a);
        assert!(table.room_members(room).is_empty());
    }
}
