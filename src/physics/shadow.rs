//! Shadow validator: compares a client-reported shot outcome against an
//! independent server re-simulation.
//!
//! The server never trusts the client claim; it always re-runs the
//! matching simulator (`penalty::simulate` or `basketball::simulate`)
//! and classifies the comparison.

use serde::{Deserialize, Serialize};

use super::{ShotInput, ShotResult, Verdict};

/// Distance threshold (metres) below which a verdict-matching shot is
/// still flagged as a minor discrepancy rather than fully valid.
const MINOR_DISCREPANCY_DISTANCE: f64 = 5.0;
/// Distance threshold above which a verdict-mismatched shot is treated
/// as outright fraud rather than a major discrepancy.
const FRAUD_DISTANCE: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShadowMismatchKind {
    Minor,
    Major,
    Fraud,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowVerdict {
    Valid,
    MinorDiscrepancy,
    MajorDiscrepancy,
    FraudSuspected,
}

impl ShadowVerdict {
    pub fn requires_review(self) -> bool {
        matches!(self, ShadowVerdict::MajorDiscrepancy | ShadowVerdict::FraudSuspected)
    }

    pub fn mismatch_kind(self) -> Option<ShadowMismatchKind> {
        match self {
            ShadowVerdict::Valid => None,
            ShadowVerdict::MinorDiscrepancy => Some(ShadowMismatchKind::Minor),
            ShadowVerdict::MajorDiscrepancy => Some(ShadowMismatchKind::Major),
            ShadowVerdict::FraudSuspected => Some(ShadowMismatchKind::Fraud),
        }
    }
}

/// Which fixed-step simulator a shadow check re-runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameKind {
    Penalty,
    Basketball,
}

/// Re-runs the simulator matching `kind` and classifies the comparison
/// against the client's claimed `verdict` (and, if supplied, its claimed
/// final position).
pub fn validate(
    kind: GameKind,
    match_id: uuid::Uuid,
    shot_index: u32,
    input: &ShotInput,
    claimed_verdict: Verdict,
    claimed_final_position: Option<super::Vec3>,
) -> (ShotResult, ShadowVerdict) {
    let server_result = match kind {
        GameKind::Penalty => super::penalty::simulate(match_id, shot_index, input),
        GameKind::Basketball => super::basketball::simulate(match_id, shot_index, input),
    };

    let compare_against = claimed_final_position.unwrap_or(server_result.final_position);
    let delta = server_result.final_position.distance(&compare_against);
    let verdicts_match = server_result.verdict == claimed_verdict;

    let verdict = match (verdicts_match, delta <= MINOR_DISCREPANCY_DISTANCE, delta <= FRAUD_DISTANCE) {
        (true, true, _) => ShadowVerdict::Valid,
        (true, false, _) => ShadowVerdict::MinorDiscrepancy,
        (false, _, true) => ShadowVerdict::MajorDiscrepancy,
        (false, _, false) => ShadowVerdict::FraudSuspected,
    };

    (server_result, verdict)
}
