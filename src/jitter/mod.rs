//! Heartbeat-stream jitter / lag-switch detector.

use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

const RING_CAPACITY: usize = 100;
const BASELINE_SAMPLE_COUNT: usize = 20;
const BASELINE_MIN_SAMPLES: usize = 10;
const SPIKE_RTT_MS: f64 = 500.0;
const SPIKE_NORMALIZED_DEV: f64 = 2.5;
const SPIKE_WINDOW_SECS: i64 = 60;
const MASS_OUTAGE_FRACTION: f64 = 0.20;
const MASS_OUTAGE_WINDOW_SECS: i64 = 30;

/// Game-state tags that count as "critical moments" for the purposes of
/// `spikes_during_critical`.
const CRITICAL_STATES: &[&str] = &[
    "shooting",
    "defending",
    "penalty",
    "match_point",
    "final_move",
    "winning_position",
    "losing_position",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSample {
    pub server_ts: DateTime<Utc>,
    pub client_ts: DateTime<Utc>,
    pub rtt_ms: f64,
    pub seq: u64,
    pub game_state_tag: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectClass {
    MassOutage,
    LagSwitch,
    Suspicious,
    Genuine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectAction {
    ApplyGracePeriod,
    MonitorOnReconnect,
    FlagForReview,
    PauseOrRollback,
}

impl DisconnectClass {
    pub fn recommended_action(self) -> DisconnectAction {
        match self {
            DisconnectClass::Genuine => DisconnectAction::ApplyGracePeriod,
            DisconnectClass::Suspicious => DisconnectAction::MonitorOnReconnect,
            DisconnectClass::LagSwitch => DisconnectAction::FlagForReview,
            DisconnectClass::MassOutage => DisconnectAction::PauseOrRollback,
        }
    }
}

/// Per-account latency profile: a bounded ring of heartbeat samples plus
/// derived baseline/critical-moment state.
#[derive(Debug, Clone)]
pub struct LatencyProfile {
    samples: VecDeque<HeartbeatSample>,
    spike_timestamps: VecDeque<DateTime<Utc>>,
    spikes_during_critical: u32,
    total_critical_moments: u32,
    missed_heartbeats: u32,
    previously_flagged: bool,
}

impl Default for LatencyProfile {
    fn default() -> Self {
        LatencyProfile {
            samples: VecDeque::with_capacity(RING_CAPACITY),
            spike_timestamps: VecDeque::new(),
            spikes_during_critical: 0,
            total_critical_moments: 0,
            missed_heartbeats: 0,
            previously_flagged: false,
        }
    }
}

impl LatencyProfile {
    pub fn new() -> Self {
        Self::default()
    }

    fn baseline(&self) -> Option<(f64, f64)> {
        if self.samples.len() < BASELINE_MIN_SAMPLES {
            return None;
        }
        let mut recent: Vec<f64> = self
            .samples
            .iter()
            .rev()
            .take(BASELINE_SAMPLE_COUNT)
            .map(|s| s.rtt_ms)
            .collect();
        recent.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let trimmed: &[f64] = if recent.len() > 4 {
            &recent[2..recent.len() - 2]
        } else {
            &recent[..]
        };
        let mean = trimmed.iter().sum::<f64>() / trimmed.len() as f64;
        let variance =
            trimmed.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / trimmed.len() as f64;
        Some((mean, variance.sqrt()))
    }

    pub fn baseline_rtt(&self) -> Option<f64> {
        self.baseline().map(|(mean, _)| mean)
    }

    pub fn baseline_std(&self) -> Option<f64> {
        self.baseline().map(|(_, std)| std)
    }

    /// Feeds one heartbeat into the profile. `server_now` is taken
    /// explicitly rather than read from the clock so call sites (and
    /// tests) control it.
    ///
    /// RTT here is `server_now - client_ts`, without clock
    /// synchronisation between client and server; it is a relative
    /// signal only, not an absolute latency measurement. Any replacement
    /// must preserve that caveat.
    pub fn record_heartbeat(
        &mut self,
        client_ts: DateTime<Utc>,
        seq: u64,
        game_state_tag: Option<String>,
        server_now: DateTime<Utc>,
    ) -> bool {
        let rtt_ms = (server_now - client_ts).num_milliseconds() as f64;
        let baseline = self.baseline();
        let normalized_dev = baseline
            .map(|(mean, std)| (rtt_ms - mean) / (std + 1.0))
            .unwrap_or(0.0);
        let is_spike = rtt_ms >= SPIKE_RTT_MS || normalized_dev >= SPIKE_NORMALIZED_DEV;

        let is_critical = game_state_tag
            .as_deref()
            .map(|tag| CRITICAL_STATES.contains(&tag))
            .unwrap_or(false);
        if is_critical {
            self.total_critical_moments += 1;
            if is_spike {
                self.spikes_during_critical += 1;
            }
        }

        if is_spike {
            self.spike_timestamps.push_back(server_now);
            let cutoff = server_now - ChronoDuration::seconds(SPIKE_WINDOW_SECS);
            while self
                .spike_timestamps
                .front()
                .is_some_and(|t| *t < cutoff)
            {
                self.spike_timestamps.pop_front();
            }
        }

        self.samples.push_back(HeartbeatSample {
            server_ts: server_now,
            client_ts,
            rtt_ms,
            seq,
            game_state_tag,
        });
        if self.samples.len() > RING_CAPACITY {
            self.samples.pop_front();
        }
        self.missed_heartbeats = 0;

        is_spike
    }

    pub fn record_missed_heartbeat(&mut self) {
        self.missed_heartbeats += 1;
    }

    pub fn missed_heartbeats(&self) -> u32 {
        self.missed_heartbeats
    }

    fn spike_count_in_window(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - ChronoDuration::seconds(SPIKE_WINDOW_SECS);
        self.spike_timestamps.iter().filter(|t| **t >= cutoff).count()
    }

    fn critical_spike_ratio(&self) -> f64 {
        if self.total_critical_moments == 0 {
            0.0
        } else {
            self.spikes_during_critical as f64 / self.total_critical_moments as f64
        }
    }

    /// `clamp(0, |normalised_dev| * 10 + spikes * 5 +
    /// (crit_spikes / max(1, crit_total)) * 40, 100)` evaluated against
    /// the most recent sample.
    pub fn jitter_score(&self, now: DateTime<Utc>) -> f64 {
        let normalized_dev = self
            .samples
            .back()
            .zip(self.baseline())
            .map(|(sample, (mean, std))| (sample.rtt_ms - mean) / (std + 1.0))
            .unwrap_or(0.0);
        let spikes = self.spike_count_in_window(now) as f64;
        let crit_spikes = self.spikes_during_critical as f64;
        let crit_total = self.total_critical_moments.max(1) as f64;
        let raw = normalized_dev.abs() * 10.0 + spikes * 5.0 + (crit_spikes / crit_total) * 40.0;
        raw.clamp(0.0, 100.0)
    }

    pub fn is_suspicious(&self, now: DateTime<Utc>) -> bool {
        let spike_count = self.spike_count_in_window(now);
        if spike_count >= 3 {
            return true;
        }
        self.total_critical_moments >= 5 && self.critical_spike_ratio() > 0.6
    }

    /// Score including the `+30` adjustment the "critical spike ratio"
    /// branch of `is_suspicious` adds.
    pub fn jitter_score_with_critical_bonus(&self, now: DateTime<Utc>) -> f64 {
        let base = self.jitter_score(now);
        let bonus = if self.total_critical_moments >= 5 && self.critical_spike_ratio() > 0.6 {
            30.0
        } else {
            0.0
        };
        (base + bonus).clamp(0.0, 100.0)
    }
}

/// Tracks latency profiles for every connected account and answers
/// disconnect-classification questions.
#[derive(Default)]
pub struct JitterDetector {
    profiles: std::collections::HashMap<uuid::Uuid, LatencyProfile>,
    flagged: std::collections::HashSet<uuid::Uuid>,
}

impl JitterDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile_mut(&mut self, account_id: uuid::Uuid) -> &mut LatencyProfile {
        self.profiles.entry(account_id).or_default()
    }

    pub fn profile(&self, account_id: uuid::Uuid) -> Option<&LatencyProfile> {
        self.profiles.get(&account_id)
    }

    pub fn flag(&mut self, account_id: uuid::Uuid) {
        self.flagged.insert(account_id);
    }

    /// Classifies a disconnect for `account_id` once at least 3
    /// heartbeats have been missed. `active_players` and
    /// `disconnected_in_last_30s` describe the rest of the match's
    /// population at the moment of the call.
    pub fn classify_disconnect(
        &self,
        account_id: uuid::Uuid,
        now: DateTime<Utc>,
        active_players: u32,
        disconnected_in_last_30s: u32,
    ) -> DisconnectClass {
        let _ = now;
        if active_players > 0 {
            let fraction = disconnected_in_last_30s as f64 / active_players as f64;
            if fraction >= MASS_OUTAGE_FRACTION {
                return DisconnectClass::MassOutage;
            }
        }
        if self.flagged.contains(&account_id) {
            return DisconnectClass::LagSwitch;
        }
        let recent_spikes = self
            .profiles
            .get(&account_id)
            .map(|p| p.spike_count_in_window(now))
            .unwrap_or(0);
        if recent_spikes >= 2 {
            return DisconnectClass::Suspicious;
        }
        DisconnectClass::Genuine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    /// Baseline RTTs chosen so the trimmed mean/std is 400/50: at 500ms
    /// `normalized_dev` is only ~1.96, well under the 2.5 threshold, so a
    /// spike here can only be explained by the `rtt_ms >= SPIKE_RTT_MS`
    /// branch, not the deviation branch.
    fn seed_baseline(profile: &mut LatencyProfile, base: DateTime<Utc>) {
        let rtts_ms = [300, 300, 350, 350, 350, 450, 450, 450, 500, 500];
        for (i, rtt) in rtts_ms.iter().enumerate() {
            let client_ts = base + Duration::seconds(i as i64);
            profile.record_heartbeat(
                client_ts,
                i as u64,
                None,
                client_ts + Duration::milliseconds(*rtt),
            );
        }
    }

    #[test]
    fn rtt_exactly_500ms_is_a_spike() {
        let mut profile = LatencyProfile::new();
        let base = Utc::now();
        seed_baseline(&mut profile, base);
        let client_ts = base + Duration::seconds(20);
        let spike = profile.record_heartbeat(
            client_ts,
            20,
            None,
            client_ts + Duration::milliseconds(500),
        );
        assert!(spike);
    }

    #[test]
    fn rtt_just_under_500ms_is_not_a_spike() {
        let mut profile = LatencyProfile::new();
        let base = Utc::now();
        seed_baseline(&mut profile, base);
        let client_ts = base + Duration::seconds(20);
        let spike = profile.record_heartbeat(
            client_ts,
            20,
            None,
            client_ts + Duration::milliseconds(499),
        );
        assert!(!spike);
    }

    /// Baseline RTTs chosen so the trimmed mean/std is 100/3: at 110ms
    /// `normalized_dev` is exactly `(110 - 100) / (3 + 1) = 2.5`, isolating
    /// the `normalized_dev >= SPIKE_NORMALIZED_DEV` branch (rtt itself is
    /// nowhere near the 500ms branch).
    #[test]
    fn normalized_dev_exactly_two_point_five_is_a_spike() {
        let mut profile = LatencyProfile::new();
        let base = Utc::now();
        let rtts_ms = [94, 94, 97, 97, 97, 103, 103, 103, 106, 106];
        for (i, rtt) in rtts_ms.iter().enumerate() {
            let client_ts = base + Duration::seconds(i as i64);
            profile.record_heartbeat(
                client_ts,
                i as u64,
                None,
                client_ts + Duration::milliseconds(*rtt),
            );
        }
        let client_ts = base + Duration::seconds(20);
        let spike = profile.record_heartbeat(
            client_ts,
            20,
            None,
            client_ts + Duration::milliseconds(110),
        );
        assert!(spike);
    }

    #[test]
    fn normalized_dev_just_under_two_point_five_is_not_a_spike() {
        let mut profile = LatencyProfile::new();
        let base = Utc::now();
        let rtts_ms = [94, 94, 97, 97, 97, 103, 103, 103, 106, 106];
        for (i, rtt) in rtts_ms.iter().enumerate() {
            let client_ts = base + Duration::seconds(i as i64);
            profile.record_heartbeat(
                client_ts,
                i as u64,
                None,
                client_ts + Duration::milliseconds(*rtt),
            );
        }
        let client_ts = base + Duration::seconds(20);
        let spike = profile.record_heartbeat(
            client_ts,
            20,
            None,
            client_ts + Duration::milliseconds(109),
        );
        assert!(!spike);
    }

    #[test]
    fn lag_switch_scenario_hits_jitter_score_threshold() {
        let mut profile = LatencyProfile::new();
        let base = Utc::now();
        for i in 0..10 {
            let client_ts = base + Duration::seconds(i);
            profile.record_heartbeat(client_ts, i as u64, None, client_ts + Duration::milliseconds(80));
        }
        let mut last_now = base;
        for i in 10..14 {
            let client_ts = base + Duration::seconds(i);
            let server_now = client_ts + Duration::milliseconds(800);
            profile.record_heartbeat(
                client_ts,
                i as u64,
                Some("match_point".to_string()),
                server_now,
            );
            last_now = server_now;
        }
        assert!(profile.jitter_score_with_critical_bonus(last_now) >= 85.0);
        assert!(profile.is_suspicious(last_now));
        assert_eq!(profile.critical_spike_ratio(), 1.0);
    }

    #[test]
    fn ring_buffer_wraps_without_losing_baseline_stability() {
        let mut profile = LatencyProfile::new();
        let base = Utc::now();
        for i in 0..150 {
            let client_ts = base + Duration::seconds(i);
            profile.record_heartbeat(client_ts, i as u64, None, client_ts + Duration::milliseconds(80));
        }
        assert_eq!(profile.samples.len(), RING_CAPACITY);
        let baseline = profile.baseline_rtt().unwrap();
        assert!((baseline - 80.0).abs() < 1.0);
    }

    #[test]
    fn mass_outage_classification_when_fraction_exceeds_threshold() {
        let detector = JitterDetector::new();
        let account = uuid::Uuid::new_v4();
        let class = detector.classify_disconnect(account, Utc::now(), 10, 3);
        assert_eq!(class, DisconnectClass::MassOutage);
        assert_eq!(class.recommended_action(), DisconnectAction::PauseOrRollback);
    }

    #[test]
    fn genuine_disconnect_when_nothing_else_applies() {
        let detector = JitterDetector::new();
        let account = uuid::Uuid::new_v4();
        let class = detector.classify_disconnect(account, Utc::now(), 10, 0);
        assert_eq!(class, DisconnectClass::Genuine);
        assert_eq!(class.recommended_action(), DisconnectAction::ApplyGracePeriod);
    }
}
