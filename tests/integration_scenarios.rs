//! End-to-end scenarios driving the public crate API across module
//! boundaries (matchmaking -> escrow -> settlement, shield refusals,
//! shadow validation, dice verification, disconnect classification).
//! Module-level `#[cfg(test)]` blocks cover the narrower per-component
//! edge cases; these exercise the seams between components.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use kompite_core::dice::{verify_roll, FairDice};
use kompite_core::jitter::DisconnectClass;
use kompite_core::ledger::LedgerIntegrity;
use kompite_core::match_manager::{GameResultClaim, JoinOutcome, RoomState};
use kompite_core::physics::shadow::GameKind;
use kompite_core::physics::{Spin, Vec3, Verdict};
use kompite_core::shield::{KycStatus, PlayerSecurityProfile};
use kompite_core::{Config, Ledger, MatchManager, MemoryStore, Money, Storage};

fn profile(account_id: Uuid) -> PlayerSecurityProfile {
    PlayerSecurityProfile {
        account_id,
        frozen: false,
        quarantine_until: None,
        trust_score: 80,
        kyc_status: KycStatus::Unverified,
        failed_matches_last_hour: 0,
        recent_win_rate: None,
        recent_match_count: 0,
        recent_disconnects: 0,
    }
}

fn centered_goal_shot() -> kompite_core::physics::ShotInput {
    kompite_core::physics::ShotInput {
        start: Vec3::new(0.0, 0.2, 0.0),
        horizontal_angle: 0.0,
        vertical_angle: 0.2,
        power: 1.0,
        spin: Spin::default(),
    }
}

/// Pairs `a` and `b` from distinct IPs/devices, readies both, and locks
/// escrow for both, returning the manager, ledger, and match id right
/// before `confirm_escrow` so each scenario can take it from there.
async fn paired_and_locked(
    bet: Money,
) -> (Arc<MatchManager<MemoryStore>>, Arc<Ledger<MemoryStore>>, Uuid, Uuid, Uuid) {
    let ledger = Arc::new(Ledger::new(MemoryStore::new(), Config::default()));
    let a = ledger.open_account(Money::from_i64(1_000)).await.unwrap();
    let b = ledger.open_account(Money::from_i64(1_000)).await.unwrap();
    let manager = Arc::new(MatchManager::new(ledger.clone(), Config::default(), None));

    let now = Utc::now();
    manager
        .join_matchmaking(
            a.id,
            Uuid::new_v4(),
            "penalty",
            bet,
            &profile(a.id),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            "device-a",
            "seed-a",
            now,
        )
        .await
        .unwrap();
    let (outcome, _) = manager
        .join_matchmaking(
            b.id,
            Uuid::new_v4(),
            "penalty",
            bet,
            &profile(b.id),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            "device-b",
            "seed-b",
            now,
        )
        .await
        .unwrap();
    let JoinOutcome::Matched { match_id } = outcome else {
        panic!("two distinct accounts on the same queue key must pair");
    };

    manager.player_ready(match_id, a.id).await.unwrap();
    let state = manager.player_ready(match_id, b.id).await.unwrap();
    assert_eq!(state, RoomState::Locked);

    (manager, ledger, match_id, a.id, b.id)
}

#[tokio::test]
async fn happy_path_shot_settlement_credits_winner_and_fee() {
    let bet = Money::from_i64(10);
    let (manager, ledger, match_id, a, b) = paired_and_locked(bet).await;

    let hash_a = ledger.tip_hash(a).await.unwrap().unwrap();
    let hash_b = ledger.tip_hash(b).await.unwrap().unwrap();
    manager.confirm_escrow(match_id, a, hash_a).await.unwrap();
    let state = manager.confirm_escrow(match_id, b, hash_b).await.unwrap();
    assert_eq!(state, RoomState::InProgress);

    let input = centered_goal_shot();
    let honest = kompite_core::physics::penalty::simulate(match_id, 0, &input);
    let outcome = manager
        .submit_shot_result(
            match_id,
            a,
            GameResultClaim::Shot {
                kind: GameKind::Penalty,
                shot_index: 0,
                input,
                claimed_verdict: honest.verdict,
                claimed_final_position: Some(honest.final_position),
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.room_state, RoomState::Completed);

    // tier 1 (bet in [1, 10]) charges 8%; two players' bets form the pot.
    let winner = ledger.storage_for_test().load_account(a).await.unwrap().unwrap();
    let loser = ledger.storage_for_test().load_account(b).await.unwrap().unwrap();
    assert_eq!(loser.available.to_string(), "990.0000");
    assert_eq!(loser.escrow_match.to_string(), "0.0000");
    // winner started at 990 after lock, then receives the pot minus fee.
    assert!(winner.available > Money::from_i64(990));

    let report = ledger.verify_ledger().await.unwrap();
    assert_eq!(report.integrity, LedgerIntegrity::Ok);
    assert!(report.drift.is_zero());
}

#[tokio::test]
async fn insufficient_funds_at_lock_cancels_match_and_refunds_opponent() {
    let ledger = Arc::new(Ledger::new(MemoryStore::new(), Config::default()));
    let rich = ledger.open_account(Money::from_i64(100)).await.unwrap();
    let poor = ledger.open_account(Money::from_i64(5)).await.unwrap();
    let manager = Arc::new(MatchManager::new(ledger.clone(), Config::default(), None));
    let ip = IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1));
    let now = Utc::now();

    manager
        .join_matchmaking(rich.id, Uuid::new_v4(), "ludo", Money::from_i64(10), &profile(rich.id), ip, "dev-a", "seed-a", now)
        .await
        .unwrap();
    let (outcome, _) = manager
        .join_matchmaking(poor.id, Uuid::new_v4(), "ludo", Money::from_i64(10), &profile(poor.id), ip, "dev-b", "seed-b", now)
        .await
        .unwrap();
    let JoinOutcome::Matched { match_id } = outcome else { panic!("expected a match") };

    manager.player_ready(match_id, rich.id).await.unwrap();
    let state = manager.player_ready(match_id, poor.id).await.unwrap();
    assert_eq!(state, RoomState::Cancelled);

    let reloaded_rich = ledger.storage_for_test().load_account(rich.id).await.unwrap().unwrap();
    assert_eq!(reloaded_rich.available.to_string(), "100.0000");
    assert_eq!(reloaded_rich.escrow_match.to_string(), "0.0000");
}

#[tokio::test]
async fn fraudulent_shot_claim_is_disputed_not_settled() {
    let bet = Money::from_i64(10);
    let (manager, ledger, match_id, a, b) = paired_and_locked(bet).await;

    let hash_a = ledger.tip_hash(a).await.unwrap().unwrap();
    let hash_b = ledger.tip_hash(b).await.unwrap().unwrap();
    manager.confirm_escrow(match_id, a, hash_a).await.unwrap();
    manager.confirm_escrow(match_id, b, hash_b).await.unwrap();

    let input = centered_goal_shot();
    let honest = kompite_core::physics::penalty::simulate(match_id, 0, &input);
    let bogus_verdict = if honest.verdict == Verdict::Goal { Verdict::Miss } else { Verdict::Goal };
    let outcome = manager
        .submit_shot_result(
            match_id,
            a,
            GameResultClaim::Shot {
                kind: GameKind::Penalty,
                shot_index: 0,
                input,
                claimed_verdict: bogus_verdict,
                claimed_final_position: Some(Vec3::new(500.0, 500.0, 500.0)),
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.room_state, RoomState::Disputed);
    assert!(outcome.shadow_verdict.unwrap().requires_review());

    // escrow stays locked pending review; neither account is settled.
    let a_account = ledger.storage_for_test().load_account(a).await.unwrap().unwrap();
    assert_eq!(a_account.escrow_match.to_string(), bet.to_string());
}

#[tokio::test]
async fn repeated_latency_spikes_classify_a_disconnect_as_suspicious() {
    let bet = Money::from_i64(10);
    let (manager, ledger, match_id, a, b) = paired_and_locked(bet).await;
    let hash_a = ledger.tip_hash(a).await.unwrap().unwrap();
    let hash_b = ledger.tip_hash(b).await.unwrap().unwrap();
    manager.confirm_escrow(match_id, a, hash_a).await.unwrap();
    manager.confirm_escrow(match_id, b, hash_b).await.unwrap();

    let base = Utc::now();
    for i in 0..12 {
        let client_ts = base + ChronoDuration::seconds(i);
        manager.heartbeat(a, client_ts, i as u64, None, client_ts + ChronoDuration::milliseconds(80)).await;
    }
    // two fresh spikes within the 60s window flip classify_disconnect to
    // Suspicious.
    let mut last_now = base;
    for i in 12..14 {
        let client_ts = base + ChronoDuration::seconds(i);
        let server_now = client_ts + ChronoDuration::milliseconds(900);
        manager.heartbeat(a, client_ts, i as u64, None, server_now).await;
        last_now = server_now;
    }

    let class = manager.mark_disconnected(match_id, a, last_now, 2, 0).await.unwrap();
    assert_eq!(class, DisconnectClass::Suspicious);
}

#[tokio::test]
async fn provably_fair_dice_rolls_verify_against_the_revealed_seed() {
    let match_id = Uuid::new_v4();
    let mut dice = FairDice::new(match_id);
    let published_hash = dice.server_seed_hash();

    let rolls: Vec<_> = (0..20).map(|n| dice.roll(&format!("player-{n}"))).collect();
    for roll in &rolls {
        assert_eq!(roll.server_seed_hash, published_hash);
        assert!((1..=6).contains(&roll.value));
    }

    let revealed = dice.reveal_server_seed();
    for roll in &rolls {
        assert!(verify_roll(&revealed, roll));
    }

    // tampering with even one recorded value breaks verification.
    let mut tampered = rolls[0].clone();
    tampered.value = if tampered.value == 6 { 1 } else { tampered.value + 1 };
    assert!(!verify_roll(&revealed, &tampered));
}

#[tokio::test]
async fn colluding_devices_are_refused_pairing_with_high_collusion_level() {
    let ledger = Arc::new(Ledger::new(MemoryStore::new(), Config::default()));
    let a = ledger.open_account(Money::from_i64(100)).await.unwrap();
    let b = ledger.open_account(Money::from_i64(100)).await.unwrap();
    let manager = Arc::new(MatchManager::new(ledger, Config::default(), None));
    let shared_ip = IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9));
    let now = Utc::now();

    manager
        .join_matchmaking(a.id, Uuid::new_v4(), "ludo", Money::from_i64(10), &profile(a.id), shared_ip, "shared-device", "seed-a", now)
        .await
        .unwrap();
    let result = manager
        .join_matchmaking(b.id, Uuid::new_v4(), "ludo", Money::from_i64(10), &profile(b.id), shared_ip, "shared-device", "seed-b", now)
        .await;

    match result {
        Err(kompite_core::CoreError::CollusionSuspected { level }) => {
            assert_eq!(level, kompite_core::shield::CollusionLevel::High);
        }
        other => panic!("expected a collusion refusal, got {other:?}"),
    }

    // account `a` keeps its place in the queue; cancelling it should
    // report it was actually present.
    let removed = manager.cancel_matchmaking(a.id, "ludo", Money::from_i64(10)).await.unwrap();
    assert!(removed);
}
