//! Error kinds surfaced by the core.
//!
//! Only [`CoreError::InsufficientFunds`] and [`CoreError::InvalidTransition`]
//! are expected-and-recovered by callers. Everything else propagates to the
//! client verbatim; the server never silently alters a game outcome to work
//! around an error.

use crate::money::Money;
use crate::physics::shadow::ShadowMismatchKind;
use crate::shield::CollusionLevel;
use uuid::Uuid;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Balance hash mismatch, broken tx chain, or a bad ledger equation.
    /// Fatal for the offending account: the caller must freeze it and
    /// surface an alert, never retry silently.
    #[error("integrity violation on account {account}: {detail}")]
    IntegrityViolation { account: Uuid, detail: String },

    #[error("account {account} is frozen and rejects further mutation")]
    AccountFrozen { account: Uuid },

    #[error("insufficient funds in account {account}: needed {needed}, available {available}")]
    InsufficientFunds {
        account: Uuid,
        needed: Money,
        available: Money,
    },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("account in quarantine, retry after {retry_after_secs}s")]
    Quarantined { retry_after_secs: u64 },

    #[error("kyc verification required for this bet amount")]
    KycRequired,

    #[error("collusion suspected at level {level:?}")]
    CollusionSuspected { level: CollusionLevel },

    #[error("trust score {score} below the admission floor")]
    LowTrust { score: u8 },

    #[error("operation timed out: {context}")]
    Timeout { context: String },

    #[error("shadow validation mismatch: {0:?}")]
    ShadowMismatch(ShadowMismatchKind),

    #[error("ledger entry {0} already committed")]
    AlreadySettled(Uuid),

    #[error("arithmetic overflow")]
    Overflow,

    #[error("not found: {0}")]
    NotFound(String),
}

impl CoreError {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::InsufficientFunds { .. } | CoreError::InvalidTransition { .. }
        )
    }
}
