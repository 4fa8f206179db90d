//! Tunable constants gathered in one place instead of scattered literals,
//! so a deployment can adjust grace periods / thresholds without touching
//! logic.

use crate::money::Money;
use rust_decimal::Decimal;
use std::time::Duration;

/// One commission bracket (a bet-size range, its rate, and a display name).
#[derive(Debug, Clone)]
pub struct CommissionTier {
    pub id: u8,
    pub min_bet: Money,
    /// `None` means unbounded above (the `[51, inf)` bracket).
    pub max_bet: Option<Money>,
    pub rate: Decimal,
    pub name: &'static str,
}

impl CommissionTier {
    fn covers(&self, bet: Money) -> bool {
        if bet < self.min_bet {
            return false;
        }
        match self.max_bet {
            Some(max) => bet <= max,
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub commission_tiers: Vec<CommissionTier>,

    /// Client ack timeout after `locked` before the match is cancelled.
    pub escrow_confirm_grace: Duration,
    /// Reconnect grace window for a dropped player.
    pub reconnect_grace: Duration,
    /// Extended grace applied when the jitter detector reports a mass
    /// outage rather than a single dropped player.
    pub mass_outage_grace: Duration,

    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub heartbeat_ring_capacity: usize,
    pub jitter_window: Duration,
    pub missed_heartbeats_before_classification: u32,

    pub matchmaking_rate_limit_window: Duration,
    pub matchmaking_rate_limit_max: u32,
    pub ip_device_history_ttl: Duration,

    pub min_trust_score: u8,
    pub kyc_bet_threshold: Money,
    pub kyc_trust_threshold: u8,
    pub risk_review_threshold: u8,

    pub house_bot_min_delay: Duration,
    pub house_bot_max_jitter: Duration,
    pub house_bot_win_probability: f64,

    pub max_players_per_room: usize,

    /// Upper bound a caller waits to acquire a named room/queue lock
    /// before getting `CoreError::Timeout` back instead of blocking forever.
    pub room_lock_ttl: Duration,
    pub queue_lock_ttl: Duration,
}

impl Config {
    pub fn commission_tier_for(&self, bet: Money) -> Option<&CommissionTier> {
        self.commission_tiers.iter().find(|t| t.covers(bet))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            commission_tiers: vec![
                CommissionTier {
                    id: 1,
                    min_bet: Money::from_i64(1),
                    max_bet: Some(Money::from_i64(10)),
                    rate: Decimal::new(8, 2), // 0.08
                    name: "seed",
                },
                CommissionTier {
                    id: 2,
                    min_bet: Money::from_i64(11),
                    max_bet: Some(Money::from_i64(50)),
                    rate: Decimal::new(6, 2), // 0.06
                    name: "competitor",
                },
                CommissionTier {
                    id: 3,
                    min_bet: Money::from_i64(51),
                    max_bet: None,
                    rate: Decimal::new(5, 2), // 0.05
                    name: "pro",
                },
            ],
            escrow_confirm_grace: Duration::from_secs(10),
            reconnect_grace: Duration::from_secs(45),
            mass_outage_grace: Duration::from_secs(120),
            heartbeat_interval: Duration::from_secs(3),
            heartbeat_timeout: Duration::from_secs(10),
            heartbeat_ring_capacity: 100,
            jitter_window: Duration::from_secs(60),
            missed_heartbeats_before_classification: 3,
            matchmaking_rate_limit_window: Duration::from_secs(60),
            matchmaking_rate_limit_max: 10,
            ip_device_history_ttl: Duration::from_secs(24 * 60 * 60),
            min_trust_score: 30,
            kyc_bet_threshold: Money::from_i64(100),
            kyc_trust_threshold: 70,
            risk_review_threshold: 70,
            house_bot_min_delay: Duration::from_millis(500),
            house_bot_max_jitter: Duration::from_millis(250),
            house_bot_win_probability: 0.5,
            max_players_per_room: 4,
            room_lock_ttl: Duration::from_secs(5),
            queue_lock_ttl: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_boundaries_at_commission_edges() {
        let cfg = Config::default();
        assert_eq!(cfg.commission_tier_for(Money::from_i64(10)).unwrap().id, 1);
        assert_eq!(cfg.commission_tier_for(Money::from_i64(11)).unwrap().id, 2);
        assert_eq!(cfg.commission_tier_for(Money::from_i64(50)).unwrap().id, 2);
        assert_eq!(cfg.commission_tier_for(Money::from_i64(51)).unwrap().id, 3);
    }
}
