//! Wire event envelope. A discriminated, tagged-variant union: every
//! event carries an explicit payload record and an unrecognised `type`
//! is a deserialization error, not a silently-ignored message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::match_manager::RoomState;
use crate::money::Money;
use crate::physics::{ShotInput, Vec3, Verdict};
use crate::shield::PlayerSecurityProfile;

/// Client -> server events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinMatchmaking {
        game_type: String,
        bet_amount: Money,
        client_seed: String,
        security_profile: PlayerSecurityProfile,
    },
    CancelMatchmaking {
        game_type: String,
        bet_amount: Money,
    },
    PlayerReady {
        match_id: Uuid,
        client_seed: String,
    },
    ConfirmEscrow {
        match_id: Uuid,
        transaction_hash: String,
    },
    GameMove {
        match_id: Uuid,
        move_type: String,
        move_data: serde_json::Value,
    },
    Heartbeat {
        client_timestamp: DateTime<Utc>,
        sequence: u64,
        game_state: Option<String>,
    },
    SubmitGameResult {
        match_id: Uuid,
        claimed_winner: Uuid,
        final_state: GameResultPayload,
        client_hash: String,
    },
    BoardRollDice {
        match_id: Uuid,
        client_seed: Option<String>,
    },
    BoardMovePiece {
        match_id: Uuid,
        piece_id: u8,
    },
}

/// Payload shape of `submit_game_result.final_state` for a physics-shot
/// match. Board-game matches settle automatically
/// once the engine itself reports `game_over`; a `submit_game_result` for
/// those is only a client acknowledgement, compared against the room's
/// already-recorded winner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameResultPayload {
    pub shot_index: u32,
    pub input: ShotInput,
    pub claimed_verdict: Verdict,
    pub claimed_final_position: Option<Vec3>,
}

/// Server -> client events: every event the core actually emits is
/// represented here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        session_id: Uuid,
    },
    MatchmakingQueued,
    MatchmakingDenied {
        reason: String,
        retry_after: Option<u64>,
    },
    MatchFound {
        match_id: Uuid,
        session_id: String,
        server_seed_hash: String,
        players: Vec<Uuid>,
    },
    MatchLocked {
        initial_state_hash: String,
        escrow_required: Money,
    },
    MatchStarted,
    PlayerReadyUpdate {
        account_id: Uuid,
        is_ready: bool,
    },
    PlayerDisconnected {
        account_id: Uuid,
        grace_period_secs: u64,
    },
    MoveReceived {
        sequence: u64,
    },
    HeartbeatAck {
        server_timestamp: DateTime<Utc>,
        sequence: u64,
        connection_quality: f64,
        warning: Option<String>,
    },
    MatchValidating,
    MatchCancelled {
        reason: String,
        code: String,
    },
    GameOver {
        winner: Uuid,
        prize: Money,
        fee: Money,
        rake_level: String,
        rake_rate: String,
        ledger_entry: Uuid,
        treasury_summary: Money,
    },
    Error {
        message: String,
        code: String,
    },
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
            code: code.to_string(),
        }
    }
}

/// Maps a [`crate::match_manager::RoomState`] reached by a dispatch call to
/// the server event the gateway should broadcast, for the states that have
/// a direct 1:1 wire event.
pub fn room_state_event(state: RoomState) -> Option<ServerEvent> {
    match state {
        RoomState::InProgress => Some(ServerEvent::MatchStarted),
        RoomState::Validation => Some(ServerEvent::MatchValidating),
        _ => None,
    }
}
