//! Room state, player connections, and the house bot.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::boardgame::BoardGame;
use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomState {
    Matchmaking,
    Locked,
    InProgress,
    Validation,
    Settlement,
    Disputed,
    Completed,
    Cancelled,
}

impl RoomState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RoomState::Completed | RoomState::Cancelled)
    }

    /// The room's legal state-transition table.
    pub fn allows(self, next: RoomState) -> bool {
        use RoomState::*;
        matches!(
            (self, next),
            (Matchmaking, Locked)
                | (Matchmaking, Cancelled)
                | (Locked, InProgress)
                | (Locked, Cancelled)
                | (InProgress, Validation)
                | (InProgress, Disputed)
                | (Validation, Settlement)
                | (Validation, Disputed)
                | (Settlement, Completed)
                | (Settlement, Disputed)
                | (Disputed, Completed)
                | (Disputed, Cancelled)
        )
    }
}

/// A player's connection state within one room. Lifecycle bound to the
/// room: the room owns this struct, the gateway only ever holds
/// identifiers pointing at it.
#[derive(Debug, Clone)]
pub struct PlayerConnection {
    pub account_id: Uuid,
    pub session_handle: Uuid,
    pub is_ready: bool,
    pub is_connected: bool,
    pub ip: IpAddr,
    pub device_fingerprint: String,
    pub escrow_confirmed: bool,
    pub escrow_tx_hash: Option<[u8; 32]>,
    pub balance_at_lock: Option<Money>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub is_house_bot: bool,
    pub disconnected_at: Option<DateTime<Utc>>,
    /// Bumped on every disconnect/reconnect so a stale grace-timer task
    /// spawned against an earlier generation can recognise it no longer
    /// applies.
    pub reconnect_generation: u64,
}

impl PlayerConnection {
    pub fn new(account_id: Uuid, session_handle: Uuid, ip: IpAddr, device_fingerprint: String) -> Self {
        PlayerConnection {
            account_id,
            session_handle,
            is_ready: false,
            is_connected: true,
            ip,
            device_fingerprint,
            escrow_confirmed: false,
            escrow_tx_hash: None,
            balance_at_lock: None,
            last_heartbeat: None,
            is_house_bot: false,
            disconnected_at: None,
            reconnect_generation: 0,
        }
    }

    pub fn house_bot(account_id: Uuid) -> Self {
        PlayerConnection {
            account_id,
            session_handle: Uuid::new_v4(),
            is_ready: true,
            is_connected: true,
            ip: IpAddr::from([127, 0, 0, 1]),
            device_fingerprint: "house-bot".to_string(),
            escrow_confirmed: true,
            escrow_tx_hash: None,
            balance_at_lock: None,
            last_heartbeat: None,
            is_house_bot: true,
            disconnected_at: None,
            reconnect_generation: 0,
        }
    }
}

/// Configuration for a match's house opponent. The bot is a normal
/// participant subject to the board-game engine's own rules; this struct
/// carries no special-cased outcome logic.
#[derive(Debug, Clone)]
pub struct HouseBot {
    pub account_id: Uuid,
    /// Accepted for forward-compatibility with a future difficulty dial;
    /// not read by [`crate::boardgame`]'s resolution.
    pub win_probability: f64,
}

impl HouseBot {
    pub fn new(account_id: Uuid, win_probability: f64) -> Self {
        HouseBot {
            account_id,
            win_probability,
        }
    }
}

/// Server-authoritative room for one match. Owned by the match manager;
/// players hold only non-owning back-references (their `account_id`).
pub struct MatchRoom {
    pub match_id: Uuid,
    pub game_type: String,
    pub bet_amount: Money,
    pub state: RoomState,
    pub players: Vec<PlayerConnection>,
    pub created_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    /// Opaque 32-byte session identifier.
    pub session_id: [u8; 32],
    pub initial_state_hash: Option<[u8; 32]>,
    pub ledger_entry_id: Option<Uuid>,
    pub board: Option<BoardGame>,
    pub had_mass_outage: bool,
}

impl MatchRoom {
    pub fn new(match_id: Uuid, game_type: impl Into<String>, bet_amount: Money, players: Vec<PlayerConnection>) -> Self {
        let mut session_id = [0u8; 32];
        use rand::RngCore;
        rand::thread_rng().fill_bytes(&mut session_id);
        MatchRoom {
            match_id,
            game_type: game_type.into(),
            bet_amount,
            state: RoomState::Matchmaking,
            players,
            created_at: Utc::now(),
            locked_at: None,
            started_at: None,
            session_id,
            initial_state_hash: None,
            ledger_entry_id: None,
            board: None,
            had_mass_outage: false,
        }
    }

    pub fn human_players(&self) -> impl Iterator<Item = &PlayerConnection> {
        self.players.iter().filter(|p| !p.is_house_bot)
    }

    pub fn all_humans_ready(&self) -> bool {
        self.human_players().all(|p| p.is_ready)
    }

    pub fn all_humans_confirmed_escrow(&self) -> bool {
        self.human_players().all(|p| p.escrow_confirmed)
    }

    pub fn player_mut(&mut self, account_id: Uuid) -> Option<&mut PlayerConnection> {
        self.players.iter_mut().find(|p| p.account_id == account_id)
    }

    pub fn player(&self, account_id: Uuid) -> Option<&PlayerConnection> {
        self.players.iter().find(|p| p.account_id == account_id)
    }

    pub fn account_ids(&self) -> Vec<Uuid> {
        self.players.iter().map(|p| p.account_id).collect()
    }

    /// `H(match_id || session_id || per-player{balance_at_lock, ip,
    /// device} || bet || locked_at)`.
    pub fn compute_initial_state_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.match_id.as_bytes());
        hasher.update(self.session_id);
        for p in &self.players {
            hasher.update(p.account_id.as_bytes());
            if let Some(b) = p.balance_at_lock {
                hasher.update(b.as_decimal().to_string().as_bytes());
            }
            hasher.update(p.ip.to_string().as_bytes());
            hasher.update(p.device_fingerprint.as_bytes());
        }
        hasher.update(self.bet_amount.as_decimal().to_string().as_bytes());
        if let Some(locked_at) = self.locked_at {
            hasher.update(locked_at.to_rfc3339().as_bytes());
        }
        hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_transition_table_covers_every_state() {
        use RoomState::*;
        assert!(Matchmaking.allows(Locked));
        assert!(Matchmaking.allows(Cancelled));
        assert!(!Matchmaking.allows(InProgress));
        assert!(Locked.allows(InProgress));
        assert!(InProgress.allows(Validation));
        assert!(Validation.allows(Settlement));
        assert!(Settlement.allows(Completed));
        assert!(Disputed.allows(Completed));
        assert!(Disputed.allows(Cancelled));
        assert!(!Completed.allows(InProgress));
        assert!(Completed.is_terminal());
        assert!(Cancelled.is_terminal());
    }
}
