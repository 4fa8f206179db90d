//! Per-account balance with a tamper-evident integrity hash.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustLevel {
    Green,
    Yellow,
    Red,
}

impl TrustLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            70..=100 => TrustLevel::Green,
            30..=69 => TrustLevel::Yellow,
            _ => TrustLevel::Red,
        }
    }
}

/// Which of the three sub-balances a transaction moved. Kept distinct
/// from [`crate::ledger::transaction::TransactionKind`] because a single
/// ledger operation (e.g. `lockEscrow`) touches two sub-balances and is
/// recorded as a pair of transactions that share a kind but differ here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubBalance {
    Available,
    EscrowMatch,
    EscrowOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub available: Money,
    pub escrow_match: Money,
    pub escrow_out: Money,
    pub balance_salt: [u8; 16],
    pub integrity_hash: [u8; 32],
    pub balance_version: u64,
    pub trust_score: u8,
    pub frozen: bool,
}

impl Account {
    pub fn new(id: Uuid, initial_available: Money, balance_salt: [u8; 16]) -> Self {
        let mut account = Account {
            id,
            available: initial_available,
            escrow_match: Money::zero(),
            escrow_out: Money::zero(),
            balance_salt,
            integrity_hash: [0u8; 32],
            balance_version: 0,
            trust_score: 100,
            frozen: false,
        };
        account.integrity_hash = account.recompute_integrity_hash();
        account
    }

    pub fn total(&self) -> Money {
        // infallible: balances never exceed what checked arithmetic already
        // proved fits, so the widening add here cannot overflow in practice.
        self.available + self.escrow_match + self.escrow_out
    }

    /// `H(account_id || available || escrow_match || escrow_out || salt)`.
    /// Covers all three sub-balances so the hash detects tampering with
    /// any of them, tying `integrity_hash` to the account's full balance
    /// state.
    pub fn recompute_integrity_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.available.as_decimal().to_string().as_bytes());
        hasher.update(self.escrow_match.as_decimal().to_string().as_bytes());
        hasher.update(self.escrow_out.as_decimal().to_string().as_bytes());
        hasher.update(self.balance_salt);
        hasher.finalize().into()
    }

    pub fn verify_integrity(&self) -> bool {
        self.integrity_hash == self.recompute_integrity_hash()
    }

    /// Bumps the optimistic-concurrency version and recomputes the
    /// integrity hash. Must be called after every mutation to a
    /// sub-balance, before the account is persisted.
    pub fn refresh_hash(&mut self) {
        self.balance_version += 1;
        self.integrity_hash = self.recompute_integrity_hash();
    }

    pub fn trust_level(&self) -> TrustLevel {
        TrustLevel::from_score(self.trust_score)
    }

    pub fn sub_balance(&self, which: SubBalance) -> Money {
        match which {
            SubBalance::Available => self.available,
            SubBalance::EscrowMatch => self.escrow_match,
            SubBalance::EscrowOut => self.escrow_out,
        }
    }

    pub(crate) fn set_sub_balance(&mut self, which: SubBalance, value: Money) {
        match which {
            SubBalance::Available => self.available = value,
            SubBalance::EscrowMatch => self.escrow_match = value,
            SubBalance::EscrowOut => self.escrow_out = value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_account_has_a_consistent_hash() {
        let acc = Account::new(Uuid::new_v4(), Money::from_i64(100), [7u8; 16]);
        assert!(acc.verify_integrity());
    }

    #[test]
    fn tampering_with_a_sub_balance_breaks_the_hash() {
        let mut acc = Account::new(Uuid::new_v4(), Money::from_i64(100), [7u8; 16]);
        acc.available = Money::from_i64(1_000_000);
        assert!(!acc.verify_integrity());
    }

    #[test]
    fn trust_level_boundaries() {
        assert_eq!(TrustLevel::from_score(30), TrustLevel::Yellow);
        assert_eq!(TrustLevel::from_score(29), TrustLevel::Red);
        assert_eq!(TrustLevel::from_score(70), TrustLevel::Green);
        assert_eq!(TrustLevel::from_score(69), TrustLevel::Yellow);
    }
}
