//! Event dispatch: maps wire events onto
//! [`crate::match_manager::MatchManager`] calls and turns the results back
//! into outbound [`ServerEvent`]s.

use std::net::IpAddr;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::ledger::Storage;
use crate::match_manager::{GameResultClaim, JoinOutcome, MatchManager, RoomState};
use crate::physics::shadow::GameKind;

use super::events::{room_state_event, ClientEvent, GameResultPayload, ServerEvent};
use super::session::SessionTable;

/// Bidirectional session-oriented gateway. Generic
/// over the same [`Storage`] the ledger/match manager use, since it is
/// constructed around one [`MatchManager`] instance.
pub struct Gateway<S: Storage> {
    manager: std::sync::Arc<MatchManager<S>>,
    sessions: AsyncMutex<SessionTable>,
    config: Config,
}

impl<S: Storage> Gateway<S> {
    pub fn new(manager: std::sync::Arc<MatchManager<S>>, config: Config) -> Self {
        Gateway {
            manager,
            sessions: AsyncMutex::new(SessionTable::new()),
            config,
        }
    }

    /// Registers a new transport-level session for `account_id` and sends
    /// the `connected` event.
    pub async fn connect(&self, account_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let session_handle = Uuid::new_v4();
        let rx = {
            let mut sessions = self.sessions.lock().await;
            let rx = sessions.register(session_handle, account_id, Utc::now());
            sessions.to_session(session_handle, ServerEvent::Connected { session_id: session_handle });
            rx
        };
        (session_handle, rx)
    }

    pub async fn disconnect(&self, session_handle: Uuid) {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(session_handle);
    }

    /// Every 3s nominal heartbeat feeds the jitter detector and resets
    /// presence. Returns the ack event the caller should send back.
    pub async fn heartbeat(
        &self,
        session_handle: Uuid,
        client_timestamp: chrono::DateTime<Utc>,
        sequence: u64,
        game_state: Option<String>,
    ) -> CoreResult<ServerEvent> {
        let account_id = {
            let mut sessions = self.sessions.lock().await;
            let account_id = sessions
                .account_of(session_handle)
                .ok_or_else(|| CoreError::NotFound(format!("session {session_handle}")))?;
            sessions.touch(session_handle, Utc::now());
            account_id
        };
        let now = Utc::now();
        let is_spike = self
            .manager
            .heartbeat(account_id, client_timestamp, sequence, game_state, now)
            .await;
        let rtt_ms = (now - client_timestamp).num_milliseconds();
        let connection_quality = (1.0 - (rtt_ms as f64 / 1000.0)).clamp(0.0, 1.0);
        Ok(ServerEvent::HeartbeatAck {
            server_timestamp: now,
            sequence,
            connection_quality,
            warning: if is_spike { Some("latency spike detected".to_string()) } else { None },
        })
    }

    /// Checks every session's last heartbeat against the configured
    /// timeout and reports disconnects to the match manager's missed-
    /// heartbeat check. Intended to be driven by a periodic tick in the
    /// embedding binary.
    pub async fn sweep_missed_heartbeats(&self, active_players: u32, disconnected_in_last_30s: u32) {
        let now = Utc::now();
        let stale: Vec<(Uuid, Uuid)> = {
            let sessions = self.sessions.lock().await;
            sessions
                .room_members_with_stale_heartbeat(now, self.config.heartbeat_timeout)
        };
        for (session_handle, account_id) in stale {
            let room_id = {
                let sessions = self.sessions.lock().await;
                sessions.room_of(session_handle)
            };
            if let Some(room_id) = room_id {
                let _ = self
                    .manager
                    .mark_disconnected(room_id, account_id, now, active_players, disconnected_in_last_30s)
                    .await;
                let mut sessions = self.sessions.lock().await;
                sessions.to_room(
                    room_id,
                    ServerEvent::PlayerDisconnected {
                        account_id,
                        grace_period_secs: self.config.reconnect_grace.as_secs(),
                    },
                );
            }
        }
    }

    /// Dispatches one inbound [`ClientEvent`] for `session_handle`,
    /// driving the appropriate [`MatchManager`] call and broadcasting the
    /// resulting server event(s) to the room.
    pub async fn handle_event(
        &self,
        session_handle: Uuid,
        ip: IpAddr,
        device_fingerprint: &str,
        event: ClientEvent,
    ) -> CoreResult<()> {
        let account_id = {
            let mut sessions = self.sessions.lock().await;
            sessions.touch(session_handle, Utc::now());
            sessions
                .account_of(session_handle)
                .ok_or_else(|| CoreError::NotFound(format!("session {session_handle}")))?
        };

        match event {
            ClientEvent::JoinMatchmaking {
                game_type,
                bet_amount,
                client_seed,
                security_profile,
            } => {
                self.dispatch_join_matchmaking(
                    session_handle,
                    account_id,
                    ip,
                    device_fingerprint,
                    &game_type,
                    bet_amount,
                    &client_seed,
                    &security_profile,
                )
                .await
            }
            ClientEvent::CancelMatchmaking { game_type, bet_amount } => {
                self.manager.cancel_matchmaking(account_id, &game_type, bet_amount).await?;
                Ok(())
            }
            ClientEvent::PlayerReady { match_id, client_seed: _ } => {
                let state = self.manager.player_ready(match_id, account_id).await?;
                self.broadcast_room_state(match_id, state).await;
                Ok(())
            }
            ClientEvent::ConfirmEscrow { match_id, transaction_hash } => {
                let hash = parse_hash(&transaction_hash)?;
                let state = self.manager.confirm_escrow(match_id, account_id, hash).await?;
                self.broadcast_room_state(match_id, state).await;
                Ok(())
            }
            ClientEvent::BoardRollDice { match_id, client_seed } => {
                let seed = client_seed.unwrap_or_else(|| account_id.to_string());
                let roll = self.manager.board_roll_dice(match_id, account_id, &seed).await?;
                let mut sessions = self.sessions.lock().await;
                sessions.to_room(match_id, ServerEvent::MoveReceived { sequence: roll.nonce });
                Ok(())
            }
            ClientEvent::BoardMovePiece { match_id, piece_id } => {
                let state = self.manager.board_move_piece(match_id, account_id, piece_id).await?;
                self.broadcast_room_state(match_id, state).await;
                Ok(())
            }
            ClientEvent::GameMove { match_id, .. } => {
                // Generic moves outside the board-game engine are logged
                // for replay but do not themselves drive the FSM; a game
                // mode with its own move schema would extend this arm.
                let mut sessions = self.sessions.lock().await;
                sessions.to_room_except(match_id, session_handle, ServerEvent::MoveReceived { sequence: 0 });
                Ok(())
            }
            ClientEvent::Heartbeat { .. } => {
                // handled by `Gateway::heartbeat`, which needs a direct
                // reply channel rather than a room broadcast.
                Ok(())
            }
            ClientEvent::SubmitGameResult {
                match_id,
                claimed_winner,
                final_state,
                client_hash: _,
            } => {
                self.dispatch_submit_result(match_id, claimed_winner, final_state).await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_join_matchmaking(
        &self,
        session_handle: Uuid,
        account_id: Uuid,
        ip: IpAddr,
        device_fingerprint: &str,
        game_type: &str,
        bet_amount: crate::money::Money,
        client_seed: &str,
        profile: &crate::shield::PlayerSecurityProfile,
    ) -> CoreResult<()> {
        let result = self
            .manager
            .join_matchmaking(
                account_id,
                session_handle,
                game_type,
                bet_amount,
                profile,
                ip,
                device_fingerprint,
                client_seed,
                Utc::now(),
            )
            .await;

        match result {
            Ok((JoinOutcome::Queued, _verdict)) => {
                let sessions = self.sessions.lock().await;
                sessions.to_session(session_handle, ServerEvent::MatchmakingQueued);
                Ok(())
            }
            Ok((JoinOutcome::Matched { match_id }, _verdict)) => {
                let mut sessions = self.sessions.lock().await;
                sessions.join_room(session_handle, match_id);
                sessions.to_session(
                    session_handle,
                    ServerEvent::MatchFound {
                        match_id,
                        session_id: match_id.to_string(),
                        server_seed_hash: String::new(),
                        players: vec![account_id],
                    },
                );
                Ok(())
            }
            Err(CoreError::CollusionSuspected { level }) => {
                let sessions = self.sessions.lock().await;
                sessions.to_session(
                    session_handle,
                    ServerEvent::MatchmakingDenied {
                        reason: format!("collusion suspected ({level:?})"),
                        retry_after: None,
                    },
                );
                Ok(())
            }
            Err(e) => {
                let sessions = self.sessions.lock().await;
                sessions.to_session(
                    session_handle,
                    ServerEvent::MatchmakingDenied {
                        reason: e.to_string(),
                        retry_after: retry_after_for(&e),
                    },
                );
                Ok(())
            }
        }
    }

    async fn dispatch_submit_result(
        &self,
        match_id: Uuid,
        claimed_winner: Uuid,
        final_state: GameResultPayload,
    ) -> CoreResult<()> {
        let claim = GameResultClaim::Shot {
            kind: GameKind::Penalty,
            shot_index: final_state.shot_index,
            input: final_state.input,
            claimed_verdict: final_state.claimed_verdict,
            claimed_final_position: final_state.claimed_final_position,
        };
        let outcome = self.manager.submit_shot_result(match_id, claimed_winner, claim).await?;
        self.broadcast_room_state(match_id, outcome.room_state).await;
        if let Some(shadow) = outcome.shadow_verdict {
            if shadow.requires_review() {
                let sessions = self.sessions.lock().await;
                sessions.to_room(
                    match_id,
                    ServerEvent::error("shadow_mismatch", format!("{shadow:?}")),
                );
            }
        }
        Ok(())
    }

    async fn broadcast_room_state(&self, match_id: Uuid, state: RoomState) {
        if let Some(event) = room_state_event(state) {
            let sessions = self.sessions.lock().await;
            sessions.to_room(match_id, event);
        }
        if state == RoomState::Cancelled {
            let sessions = self.sessions.lock().await;
            sessions.to_room(
                match_id,
                ServerEvent::MatchCancelled {
                    reason: "match cancelled".to_string(),
                    code: "cancelled".to_string(),
                },
            );
        }
    }
}

fn retry_after_for(e: &CoreError) -> Option<u64> {
    match e {
        CoreError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
        CoreError::Quarantined { retry_after_secs } => Some(*retry_after_secs),
        _ => None,
    }
}

fn parse_hash(s: &str) -> CoreResult<[u8; 32]> {
    let bytes = hex_decode(s).ok_or_else(|| CoreError::IntegrityViolation {
        account: Uuid::nil(),
        detail: "transaction_hash is not valid hex".to_string(),
    })?;
    if bytes.len() != 32 {
        return Err(CoreError::IntegrityViolation {
            account: Uuid::nil(),
            detail: "transaction_hash must be 32 bytes".to_string(),
        });
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
