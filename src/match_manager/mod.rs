//! Matchmaking queues and the room state machine. `MatchManager<S>` is
//! the orchestrator: it owns the queues and rooms, drives every FSM
//! trigger, and is the only thing that calls into
//! [`crate::ledger::Ledger`] on a room's behalf.

pub mod fsm;
pub mod locks;
pub mod queue;
pub mod room;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

pub use locks::LockTable;
pub use queue::{MatchmakingQueue, QueueEntry, QueueKey};
pub use room::{HouseBot, MatchRoom, PlayerConnection, RoomState};

use crate::boardgame::{BoardGame, GameState as BoardState};
use crate::config::Config;
use crate::dice::DiceRoll;
use crate::error::{CoreError, CoreResult};
use crate::jitter::{DisconnectClass, JitterDetector};
use crate::ledger::{Ledger, LedgerEntry, Storage};
use crate::money::Money;
use crate::physics::shadow::{self, GameKind, ShadowVerdict};
use crate::physics::{ShotInput, Vec3, Verdict};
use crate::shield::{PlayerSecurityProfile, Shield, ShieldVerdict};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Matched { match_id: Uuid },
    Queued,
}

/// What a `submit_game_result` / `board` event is claiming happened, so
/// [`MatchManager`] knows which validation path to run during the
/// `in_progress -> validation` transition.
#[derive(Debug, Clone)]
pub enum GameResultClaim {
    /// The board-game engine (C6) is already server-authoritative; this
    /// variant only asks the manager to check the engine's own recorded
    /// winner against what the client claims.
    Board,
    /// A physics shot (C5) claim that must be shadow-validated before
    /// the manager trusts it.
    Shot {
        kind: GameKind,
        shot_index: u32,
        input: ShotInput,
        claimed_verdict: Verdict,
        claimed_final_position: Option<Vec3>,
    },
}

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub shadow_verdict: Option<ShadowVerdict>,
    pub room_state: RoomState,
    pub ledger_entry: Option<LedgerEntry>,
}

pub struct MatchManager<S: Storage> {
    ledger: Arc<Ledger<S>>,
    shield: AsyncMutex<Shield>,
    jitter: AsyncMutex<JitterDetector>,
    config: Config,
    locks: LockTable,
    queues: AsyncMutex<HashMap<QueueKey, MatchmakingQueue>>,
    rooms: AsyncMutex<HashMap<Uuid, Arc<AsyncMutex<MatchRoom>>>>,
    /// Ledger account backing the house bot's infinite balance. `None`
    /// disables bot fallback entirely.
    house_bot_account_id: Option<Uuid>,
}

impl<S: Storage> MatchManager<S> {
    pub fn new(ledger: Arc<Ledger<S>>, config: Config, house_bot_account_id: Option<Uuid>) -> Self {
        MatchManager {
            ledger,
            shield: AsyncMutex::new(Shield::new(config.clone())),
            jitter: AsyncMutex::new(JitterDetector::new()),
            config,
            locks: LockTable::new(),
            queues: AsyncMutex::new(HashMap::new()),
            rooms: AsyncMutex::new(HashMap::new()),
            house_bot_account_id,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn room_arc(&self, match_id: Uuid) -> CoreResult<Arc<AsyncMutex<MatchRoom>>> {
        self.rooms
            .lock()
            .await
            .get(&match_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(match_id.to_string()))
    }

    /// Acquires the TTL-bounded named lock for `match_id` and then the
    /// room's own interior-mutability guard, which is uncontended once
    /// the named lock is held.
    async fn lock_room(&self, match_id: Uuid) -> CoreResult<(locks::LockGuard, Arc<AsyncMutex<MatchRoom>>)> {
        let guard = self
            .locks
            .acquire(&format!("room:{match_id}"), self.config.room_lock_ttl)
            .await?;
        let arc = self.room_arc(match_id).await?;
        Ok((guard, arc))
    }

    // ---- matchmaking ----

    /// Enqueues `account_id` for `(game_type, bet_amount)`, or pairs it
    /// immediately against a waiting opponent / house bot.
    #[allow(clippy::too_many_arguments)]
    pub async fn join_matchmaking(
        &self,
        account_id: Uuid,
        session_handle: Uuid,
        game_type: &str,
        bet_amount: Money,
        profile: &PlayerSecurityProfile,
        ip: IpAddr,
        device_fingerprint: &str,
        client_seed: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<(JoinOutcome, ShieldVerdict)> {
        let verdict = {
            let mut shield = self.shield.lock().await;
            shield.record_access(account_id, ip, device_fingerprint, now);
            shield.evaluate(profile, bet_amount, now)?
        };

        let key = QueueKey::new(game_type, bet_amount);
        let _guard = self
            .locks
            .acquire(&key.lock_name(), self.config.queue_lock_ttl)
            .await?;

        let opponent = {
            let mut queues = self.queues.lock().await;
            queues.entry(key.clone()).or_default().pop_opponent_for(account_id)
        };

        if let Some(opponent) = opponent {
            let collusion = {
                let shield = self.shield.lock().await;
                shield.check_collusion(
                    account_id,
                    opponent.account_id,
                    ip,
                    opponent.ip,
                    device_fingerprint,
                    &opponent.device_fingerprint,
                )
            };
            if collusion.is_refused() {
                // scenario 6: refused before `locked`;
                // nothing was escrowed yet, so there is nothing to
                // refund, only the queue position to restore.
                let mut queues = self.queues.lock().await;
                queues.entry(key).or_default().push(opponent);
                return Err(CoreError::CollusionSuspected { level: collusion.level });
            }
            {
                let mut shield = self.shield.lock().await;
                shield.record_pairing(account_id, opponent.account_id);
            }
            let players = vec![
                PlayerConnection::new(account_id, session_handle, ip, device_fingerprint.to_string()),
                PlayerConnection::new(
                    opponent.account_id,
                    opponent.session_handle,
                    opponent.ip,
                    opponent.device_fingerprint.clone(),
                ),
            ];
            let room = MatchRoom::new(Uuid::new_v4(), game_type, bet_amount, players);
            let match_id = room.match_id;
            self.rooms.lock().await.insert(match_id, Arc::new(AsyncMutex::new(room)));
            return Ok((JoinOutcome::Matched { match_id }, verdict));
        }

        if let Some(bot_id) = self.house_bot_account_id {
            let players = vec![
                PlayerConnection::new(account_id, session_handle, ip, device_fingerprint.to_string()),
                PlayerConnection::house_bot(bot_id),
            ];
            let room = MatchRoom::new(Uuid::new_v4(), game_type, bet_amount, players);
            let match_id = room.match_id;
            self.rooms.lock().await.insert(match_id, Arc::new(AsyncMutex::new(room)));
            return Ok((JoinOutcome::Matched { match_id }, verdict));
        }

        let mut queues = self.queues.lock().await;
        queues.entry(key).or_default().push(QueueEntry {
            account_id,
            session_handle,
            client_seed: client_seed.to_string(),
            ip,
            device_fingerprint: device_fingerprint.to_string(),
            enqueued_at: now,
        });
        Ok((JoinOutcome::Queued, verdict))
    }

    /// Randomised house-bot response delay a caller should wait before
    /// announcing a bot-paired match: 500 ms plus jitter. Not applied
    /// internally so `join_matchmaking` stays synchronous and easy to
    /// test.
    pub fn house_bot_response_delay(&self) -> std::time::Duration {
        let jitter_ms = rand::thread_rng().gen_range(0..=self.config.house_bot_max_jitter.as_millis() as u64);
        self.config.house_bot_min_delay + std::time::Duration::from_millis(jitter_ms)
    }

    /// Removes `account_id` from `(game_type, bet_amount)`'s queue.
    /// Idempotent.
    pub async fn cancel_matchmaking(&self, account_id: Uuid, game_type: &str, bet_amount: Money) -> CoreResult<bool> {
        let key = QueueKey::new(game_type, bet_amount);
        let _guard = self
            .locks
            .acquire(&key.lock_name(), self.config.queue_lock_ttl)
            .await?;
        let mut queues = self.queues.lock().await;
        Ok(queues.entry(key).or_default().remove(account_id))
    }

    // ---- room lifecycle ----

    /// `player_ready` event: marks a player ready and, once every human
    /// has readied up, attempts the `matchmaking -> locked` transition.
    pub async fn player_ready(self: &Arc<Self>, match_id: Uuid, account_id: Uuid) -> CoreResult<RoomState> {
        let (_guard, arc) = self.lock_room(match_id).await?;
        let mut room = arc.lock().await;
        room.player_mut(account_id)
            .ok_or_else(|| CoreError::NotFound(format!("player {account_id} in match {match_id}")))?
            .is_ready = true;

        if room.state != RoomState::Matchmaking || !room.all_humans_ready() {
            return Ok(room.state);
        }

        let bet = room.bet_amount;
        let human_ids: Vec<Uuid> = room.human_players().map(|p| p.account_id).collect();
        let mut locked_so_far = Vec::new();
        let mut lock_failure = None;
        for id in &human_ids {
            match self.ledger.lock_escrow(*id, bet, match_id).await {
                Ok(account) => {
                    locked_so_far.push(*id);
                    room.player_mut(*id).unwrap().balance_at_lock = Some(account.available);
                }
                Err(e) => {
                    lock_failure = Some(e);
                    break;
                }
            }
        }

        if let Some(err) = lock_failure {
            for id in locked_so_far {
                let _ = self.ledger.release_escrow(id, bet, match_id, true).await;
            }
            fsm::transition(&mut room, RoomState::Cancelled)?;
            log::warn!("match {match_id} cancelled at lock: {err}");
            return Ok(room.state);
        }

        room.locked_at = Some(Utc::now());
        room.initial_state_hash = Some(room.compute_initial_state_hash());
        fsm::transition(&mut room, RoomState::Locked)?;

        for id in &human_ids {
            let hash = self.ledger.tip_hash(*id).await?;
            room.player_mut(*id).unwrap().escrow_tx_hash = hash;
        }

        drop(room);
        self.spawn_escrow_confirm_timeout(match_id);
        Ok(RoomState::Locked)
    }

    fn spawn_escrow_confirm_timeout(self: &Arc<Self>, match_id: Uuid) {
        let manager = Arc::clone(self);
        let grace = self.config.escrow_confirm_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Err(e) = manager.expire_escrow_confirmation(match_id).await {
                log::debug!("escrow-confirm timeout for {match_id} was a no-op: {e}");
            }
        });
    }

    /// `confirm_escrow` event: accepts a client's acknowledgement of its
    /// own lock and, once every human has confirmed, starts the match
    /// via the `locked -> in_progress` transition.
    pub async fn confirm_escrow(&self, match_id: Uuid, account_id: Uuid, claimed_tx_hash: [u8; 32]) -> CoreResult<RoomState> {
        let (_guard, arc) = self.lock_room(match_id).await?;
        let mut room = arc.lock().await;
        if room.state != RoomState::Locked {
            return Ok(room.state);
        }
        let player = room
            .player_mut(account_id)
            .ok_or_else(|| CoreError::NotFound(format!("player {account_id} in match {match_id}")))?;
        if player.escrow_tx_hash != Some(claimed_tx_hash) {
            return Err(CoreError::IntegrityViolation {
                account: account_id,
                detail: "confirm_escrow transaction_hash does not match the recorded lock".to_string(),
            });
        }
        player.escrow_confirmed = true;

        if !room.all_humans_confirmed_escrow() {
            return Ok(room.state);
        }

        let account_ids = room.account_ids();
        let board = BoardGame::new(match_id, &account_ids)?;
        room.board = Some(board);
        room.board.as_mut().unwrap().start()?;
        room.started_at = Some(Utc::now());
        fsm::transition(&mut room, RoomState::InProgress)?;
        Ok(RoomState::InProgress)
    }

    /// Timeout branch of `locked -> in_progress`: if escrow confirmation
    /// never completed, refunds everyone locked and cancels the match
    ///.
    async fn expire_escrow_confirmation(&self, match_id: Uuid) -> CoreResult<()> {
        let (_guard, arc) = self.lock_room(match_id).await?;
        let mut room = arc.lock().await;
        if room.state != RoomState::Locked || room.all_humans_confirmed_escrow() {
            return Ok(());
        }
        let bet = room.bet_amount;
        let human_ids: Vec<Uuid> = room.human_players().map(|p| p.account_id).collect();
        for id in human_ids {
            self.ledger.release_escrow(id, bet, match_id, true).await?;
        }
        fsm::transition(&mut room, RoomState::Cancelled)?;
        Ok(())
    }

    // ---- board game play ----

    pub async fn board_roll_dice(&self, match_id: Uuid, account_id: Uuid, client_seed: &str) -> CoreResult<DiceRoll> {
        let (_guard, arc) = self.lock_room(match_id).await?;
        let mut room = arc.lock().await;
        let seat = room
            .account_ids()
            .iter()
            .position(|id| *id == account_id)
            .ok_or_else(|| CoreError::NotFound(format!("player {account_id} in match {match_id}")))?;
        let board = room
            .board
            .as_mut()
            .ok_or_else(|| CoreError::InvalidTransition { from: "no board".to_string(), to: "roll_dice".to_string() })?;
        let roll = board.roll_dice(seat, client_seed)?;
        let finished = board.state() == BoardState::Completed;
        if finished {
            self.finalize_board_game(&mut room, match_id).await?;
        }
        Ok(roll)
    }

    pub async fn board_move_piece(&self, match_id: Uuid, account_id: Uuid, piece_id: u8) -> CoreResult<RoomState> {
        let (_guard, arc) = self.lock_room(match_id).await?;
        let mut room = arc.lock().await;
        let seat = room
            .account_ids()
            .iter()
            .position(|id| *id == account_id)
            .ok_or_else(|| CoreError::NotFound(format!("player {account_id} in match {match_id}")))?;
        let board = room
            .board
            .as_mut()
            .ok_or_else(|| CoreError::InvalidTransition { from: "no board".to_string(), to: "move_piece".to_string() })?;
        board.move_piece(seat, piece_id)?;
        if board.state() == BoardState::Completed {
            self.finalize_board_game(&mut room, match_id).await?;
        }
        Ok(room.state)
    }

    /// Drives `in_progress -> validation -> settlement -> completed` once
    /// the board engine itself reports `game_over`.
    async fn finalize_board_game(&self, room: &mut MatchRoom, match_id: Uuid) -> CoreResult<()> {
        fsm::transition(room, RoomState::Validation)?;
        let winner = room
            .board
            .as_ref()
            .and_then(|b| b.winner())
            .ok_or_else(|| CoreError::NotFound("board game has no winner yet".to_string()))?;
        let loser = room
            .account_ids()
            .into_iter()
            .find(|id| *id != winner)
            .ok_or_else(|| CoreError::NotFound("no opposing player to settle against".to_string()))?;
        fsm::transition(room, RoomState::Settlement)?;
        self.settle(room, match_id, winner, loser).await
    }

    /// `submit_game_result` for a physics shot match: shadow-validates
    /// the claim before trusting it.
    pub async fn submit_shot_result(
        &self,
        match_id: Uuid,
        claimed_winner: Uuid,
        claim: GameResultClaim,
    ) -> CoreResult<ValidationOutcome> {
        let (_guard, arc) = self.lock_room(match_id).await?;
        let mut room = arc.lock().await;
        fsm::transition(&mut room, RoomState::Validation)?;

        let GameResultClaim::Shot { kind, shot_index, input, claimed_verdict, claimed_final_position } = claim else {
            return Err(CoreError::InvalidTransition {
                from: "validation".to_string(),
                to: "submit_shot_result called with a non-shot claim".to_string(),
            });
        };
        let (_result, verdict) = shadow::validate(kind, match_id, shot_index, &input, claimed_verdict, claimed_final_position);

        if verdict.requires_review() {
            fsm::transition(&mut room, RoomState::Disputed)?;
            return Ok(ValidationOutcome { shadow_verdict: Some(verdict), room_state: room.state, ledger_entry: None });
        }

        let loser = room
            .account_ids()
            .into_iter()
            .find(|id| *id != claimed_winner)
            .ok_or_else(|| CoreError::NotFound("no opposing player to settle against".to_string()))?;
        fsm::transition(&mut room, RoomState::Settlement)?;
        self.settle(&mut room, match_id, claimed_winner, loser).await?;
        Ok(ValidationOutcome {
            shadow_verdict: Some(verdict),
            room_state: room.state,
            ledger_entry: None,
        })
    }

    /// `settlement -> completed`. On failure the room stays in
    /// `settlement` for retry rather than silently dropping to
    /// `completed`.
    async fn settle(&self, room: &mut MatchRoom, match_id: Uuid, winner: Uuid, loser: Uuid) -> CoreResult<()> {
        let entry = self
            .ledger
            .settle_match(match_id, winner, loser, room.bet_amount, 2)
            .await?;
        room.ledger_entry_id = Some(entry.id);
        fsm::transition(room, RoomState::Completed)?;
        Ok(())
    }

    // ---- reconnection & disconnect classification ----

    pub async fn heartbeat(
        &self,
        account_id: Uuid,
        client_ts: DateTime<Utc>,
        seq: u64,
        game_state_tag: Option<String>,
        server_now: DateTime<Utc>,
    ) -> bool {
        let mut jitter = self.jitter.lock().await;
        jitter.profile_mut(account_id).record_heartbeat(client_ts, seq, game_state_tag, server_now)
    }

    /// Marks a player disconnected and schedules the appropriate grace
    /// timer based on C4's classification.
    pub async fn mark_disconnected(
        self: &Arc<Self>,
        match_id: Uuid,
        account_id: Uuid,
        now: DateTime<Utc>,
        active_players: u32,
        disconnected_in_last_30s: u32,
    ) -> CoreResult<DisconnectClass> {
        let class = {
            let jitter = self.jitter.lock().await;
            jitter.classify_disconnect(account_id, now, active_players, disconnected_in_last_30s)
        };

        let (_guard, arc) = self.lock_room(match_id).await?;
        let mut room = arc.lock().await;
        let player = room
            .player_mut(account_id)
            .ok_or_else(|| CoreError::NotFound(format!("player {account_id} in match {match_id}")))?;
        player.is_connected = false;
        player.disconnected_at = Some(now);
        player.reconnect_generation += 1;
        let generation = player.reconnect_generation;

        let grace = if class == DisconnectClass::MassOutage {
            room.had_mass_outage = true;
            self.config.mass_outage_grace
        } else {
            self.config.reconnect_grace
        };
        drop(room);

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Err(e) = manager.expire_disconnect(match_id, account_id, generation).await {
                log::debug!("disconnect-grace expiry for {match_id}/{account_id} was a no-op: {e}");
            }
        });

        Ok(class)
    }

    pub async fn reconnect(&self, match_id: Uuid, account_id: Uuid, new_session_handle: Uuid) -> CoreResult<()> {
        let (_guard, arc) = self.lock_room(match_id).await?;
        let mut room = arc.lock().await;
        let player = room
            .player_mut(account_id)
            .ok_or_else(|| CoreError::NotFound(format!("player {account_id} in match {match_id}")))?;
        player.is_connected = true;
        player.disconnected_at = None;
        player.session_handle = new_session_handle;
        player.reconnect_generation += 1;
        Ok(())
    }

    /// If `account_id` is still disconnected under the same grace-timer
    /// `generation` that scheduled this call, declares it the loser by
    /// forfeit and settles (or cancels, if the match never started).
    async fn expire_disconnect(&self, match_id: Uuid, account_id: Uuid, generation: u64) -> CoreResult<()> {
        let (_guard, arc) = self.lock_room(match_id).await?;
        let mut room = arc.lock().await;
        if room.state.is_terminal() {
            return Ok(());
        }
        let still_disconnected = room
            .player(account_id)
            .map(|p| !p.is_connected && p.reconnect_generation == generation)
            .unwrap_or(false);
        if !still_disconnected {
            return Ok(());
        }

        match room.state {
            RoomState::Locked => {
                let bet = room.bet_amount;
                let human_ids: Vec<Uuid> = room.human_players().map(|p| p.account_id).collect();
                for id in human_ids {
                    self.ledger.release_escrow(id, bet, match_id, true).await?;
                }
                fsm::transition(&mut room, RoomState::Cancelled)?;
                Ok(())
            }
            RoomState::InProgress => {
                let winner = room
                    .account_ids()
                    .into_iter()
                    .find(|id| *id != account_id)
                    .ok_or_else(|| CoreError::NotFound("no opposing player to forfeit to".to_string()))?;
                if let Some(board) = room.board.as_mut() {
                    board.abandon();
                }
                fsm::transition(&mut room, RoomState::Validation)?;
                fsm::transition(&mut room, RoomState::Settlement)?;
                self.settle(&mut room, match_id, winner, account_id).await
            }
            _ => Ok(()),
        }
    }
}
