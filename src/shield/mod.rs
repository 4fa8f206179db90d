//! Pre-match eligibility filter and collusion detector.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KycStatus {
    Unverified,
    Pending,
    Verified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CollusionLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Snapshot of everything the shield needs to know about one account at
/// the moment it requests matchmaking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSecurityProfile {
    pub account_id: Uuid,
    pub frozen: bool,
    pub quarantine_until: Option<DateTime<Utc>>,
    pub trust_score: u8,
    pub kyc_status: KycStatus,
    pub failed_matches_last_hour: u32,
    pub recent_win_rate: Option<f64>,
    pub recent_match_count: u32,
    pub recent_disconnects: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShieldVerdict {
    Approved { risk: u32 },
    ReviewRequired { risk: u32 },
}

#[derive(Debug, Clone)]
struct AccessRecord {
    account_id: Uuid,
    seen_at: DateTime<Utc>,
}

/// Trust / rate-limit / collusion gate. Owns the per-account rate-limit
/// window and the IP/device history multimaps.
pub struct Shield {
    config: Config,
    match_requests: HashMap<Uuid, Vec<DateTime<Utc>>>,
    ip_history: HashMap<IpAddr, Vec<AccessRecord>>,
    device_history: HashMap<String, Vec<AccessRecord>>,
    /// prior pairings seen, keyed by the unordered pair of account ids.
    pairing_history: HashMap<(Uuid, Uuid), u32>,
}

fn pair_key(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Shield {
    pub fn new(config: Config) -> Self {
        Shield {
            config,
            match_requests: HashMap::new(),
            ip_history: HashMap::new(),
            device_history: HashMap::new(),
            pairing_history: HashMap::new(),
        }
    }

    fn evict_stale(&mut self, now: DateTime<Utc>) {
        let ttl = ChronoDuration::from_std(self.config.ip_device_history_ttl)
            .unwrap_or(ChronoDuration::hours(24));
        for records in self.ip_history.values_mut() {
            records.retain(|r| now - r.seen_at < ttl);
        }
        for records in self.device_history.values_mut() {
            records.retain(|r| now - r.seen_at < ttl);
        }
    }

    /// Records that `account_id` made a request from `ip`/`device` at
    /// `now`, for later collusion comparisons.
    pub fn record_access(&mut self, account_id: Uuid, ip: IpAddr, device: &str, now: DateTime<Utc>) {
        self.evict_stale(now);
        self.ip_history
            .entry(ip)
            .or_default()
            .push(AccessRecord { account_id, seen_at: now });
        self.device_history
            .entry(device.to_string())
            .or_default()
            .push(AccessRecord { account_id, seen_at: now });
    }

    fn rate_limited(&mut self, account_id: Uuid, now: DateTime<Utc>) -> bool {
        let window = ChronoDuration::from_std(self.config.matchmaking_rate_limit_window)
            .unwrap_or(ChronoDuration::seconds(60));
        let entry = self.match_requests.entry(account_id).or_default();
        entry.retain(|t| now - *t < window);
        entry.push(now);
        entry.len() as u32 > self.config.matchmaking_rate_limit_max
    }

    /// Runs the ordered eligibility checks for a proposed bet. The first
    /// failing check short-circuits with its corresponding error; a pass
    /// accumulates risk and returns a verdict.
    pub fn evaluate(
        &mut self,
        profile: &PlayerSecurityProfile,
        bet_amount: Money,
        now: DateTime<Utc>,
    ) -> CoreResult<ShieldVerdict> {
        if profile.frozen {
            return Err(CoreError::AccountFrozen {
                account: profile.account_id,
            });
        }
        if let Some(until) = profile.quarantine_until {
            if now < until {
                let retry_after_secs = (until - now).num_seconds().max(0) as u64;
                return Err(CoreError::Quarantined { retry_after_secs });
            }
        }
        if profile.trust_score < self.config.min_trust_score {
            return Err(CoreError::LowTrust {
                score: profile.trust_score,
            });
        }
        if bet_amount >= self.config.kyc_bet_threshold && profile.kyc_status != KycStatus::Verified {
            return Err(CoreError::KycRequired);
        }

        let mut risk: u32 = 0;
        if bet_amount >= self.config.kyc_bet_threshold
            && profile.trust_score < self.config.kyc_trust_threshold
        {
            risk += 15;
        }

        if self.rate_limited(profile.account_id, now) {
            return Err(CoreError::RateLimited { retry_after_secs: 60 });
        }

        match profile.trust_score {
            30..=69 => risk += 15,
            0..=29 => risk += 30,
            _ => {}
        }
        if profile.failed_matches_last_hour >= 5 {
            risk += 25;
        }
        if profile.recent_match_count >= 20 {
            if let Some(rate) = profile.recent_win_rate {
                if rate >= 0.85 {
                    risk += 20;
                }
            }
        }
        if profile.recent_disconnects >= 3 {
            risk += 15;
        }

        if risk >= self.config.risk_review_threshold as u32 {
            Ok(ShieldVerdict::ReviewRequired { risk })
        } else {
            Ok(ShieldVerdict::Approved { risk })
        }
    }

    /// Records that `a` and `b` were just paired into a match, for future
    /// `frequent_encounters` comparisons.
    pub fn record_pairing(&mut self, a: Uuid, b: Uuid) {
        *self.pairing_history.entry(pair_key(a, b)).or_insert(0) += 1;
    }

    /// Collusion check for the paired players of a match.
    pub fn check_collusion(
        &self,
        a: Uuid,
        b: Uuid,
        ip_a: IpAddr,
        ip_b: IpAddr,
        device_a: &str,
        device_b: &str,
    ) -> CollusionResult {
        let same_ip = ip_a == ip_b;
        let same_device = device_a == device_b;
        let ip_history_overlap = self.accounts_for_ip(ip_a).contains(&b)
            || self.accounts_for_ip(ip_b).contains(&a);
        let device_history_overlap = self.accounts_for_device(device_a).contains(&b)
            || self.accounts_for_device(device_b).contains(&a);
        let frequent_encounters = *self.pairing_history.get(&pair_key(a, b)).unwrap_or(&0) > 10;

        let mut indicators = Vec::new();
        if same_ip {
            indicators.push("same_ip");
        }
        if same_device {
            indicators.push("same_device");
        }
        if ip_history_overlap {
            indicators.push("ip_history_overlap");
        }
        if device_history_overlap {
            indicators.push("device_history_overlap");
        }
        if frequent_encounters {
            indicators.push("frequent_encounters");
        }

        let at_high = same_device || device_history_overlap;

        let level = if at_high && indicators.len() >= 3 {
            CollusionLevel::Critical
        } else if at_high {
            CollusionLevel::High
        } else if !indicators.is_empty() {
            CollusionLevel::Medium
        } else {
            CollusionLevel::Low
        };

        CollusionResult {
            indicators: indicators.into_iter().map(str::to_string).collect(),
            level,
        }
    }

    fn accounts_for_ip(&self, ip: IpAddr) -> Vec<Uuid> {
        self.ip_history
            .get(&ip)
            .map(|records| records.iter().map(|r| r.account_id).collect())
            .unwrap_or_default()
    }

    fn accounts_for_device(&self, device: &str) -> Vec<Uuid> {
        self.device_history
            .get(device)
            .map(|records| records.iter().map(|r| r.account_id).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct CollusionResult {
    pub indicators: Vec<String>,
    pub level: CollusionLevel,
}

impl CollusionResult {
    pub fn is_refused(&self) -> bool {
        matches!(self.level, CollusionLevel::High | CollusionLevel::Critical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

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

    #[test]
    fn trust_score_exactly_thirty_admits_twenty_nine_rejects() {
        let mut shield = Shield::new(Config::default());
        let mut p = profile(Uuid::new_v4());
        p.trust_score = 30;
        assert!(shield.evaluate(&p, Money::from_i64(5), Utc::now()).is_ok());

        let mut shield2 = Shield::new(Config::default());
        p.trust_score = 29;
        assert!(matches!(
            shield2.evaluate(&p, Money::from_i64(5), Utc::now()),
            Err(CoreError::LowTrust { score: 29 })
        ));
    }

    #[test]
    fn large_bet_without_kyc_is_denied() {
        let mut shield = Shield::new(Config::default());
        let p = profile(Uuid::new_v4());
        let err = shield
            .evaluate(&p, Money::from_i64(100), Utc::now())
            .unwrap_err();
        assert!(matches!(err, CoreError::KycRequired));
    }

    #[test]
    fn eleventh_request_within_the_window_is_rate_limited() {
        let mut shield = Shield::new(Config::default());
        let p = profile(Uuid::new_v4());
        let now = Utc::now();
        for _ in 0..10 {
            shield.evaluate(&p, Money::from_i64(5), now).unwrap();
        }
        let err = shield.evaluate(&p, Money::from_i64(5), now).unwrap_err();
        assert!(matches!(err, CoreError::RateLimited { .. }));
    }

    #[test]
    fn same_device_pairing_is_refused_as_high() {
        let mut shield = Shield::new(Config::default());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let ip_a = IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4));
        let ip_b = IpAddr::V4(Ipv4Addr::new(5, 6, 7, 8));
        shield.record_access(a, ip_a, "device-x", Utc::now());
        shield.record_access(b, ip_b, "device-x", Utc::now());
        let result = shield.check_collusion(a, b, ip_a, ip_b, "device-x", "device-x");
        assert_eq!(result.level, CollusionLevel::High);
        assert!(result.is_refused());
    }

    #[test]
    fn unrelated_players_have_low_collusion_risk() {
        let shield = Shield::new(Config::default());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let ip_a = IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1));
        let ip_b = IpAddr::V4(Ipv4Addr::new(2, 2, 2, 2));
        let result = shield.check_collusion(a, b, ip_a, ip_b, "device-a", "device-b");
        assert_eq!(result.level, CollusionLevel::Low);
        assert!(!result.is_refused());
    }
}
