//! Triple-entry settlement record for one match liquidation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::Money;

pub const TREASURY_LABEL: &str = "LK_TREASURY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementStatus {
    Pending,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub match_id: Uuid,
    pub loser_id: Uuid,
    pub winner_id: Uuid,
    pub treasury: String,
    pub debit_amount: Money,
    pub credit_amount: Money,
    pub rake_amount: Money,
    pub status: SettlementStatus,
}

impl LedgerEntry {
    pub fn new_pending(
        match_id: Uuid,
        winner_id: Uuid,
        loser_id: Uuid,
        debit_amount: Money,
        credit_amount: Money,
        rake_amount: Money,
    ) -> Self {
        LedgerEntry {
            id: Uuid::new_v4(),
            match_id,
            loser_id,
            winner_id,
            treasury: TREASURY_LABEL.to_string(),
            debit_amount,
            credit_amount,
            rake_amount,
            status: SettlementStatus::Pending,
        }
    }

    /// `debit_amount = credit_amount + rake_amount`.
    pub fn balances(&self) -> bool {
        self.credit_amount
            .checked_add(self.rake_amount)
            .map(|sum| sum == self.debit_amount)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_equation_holds_for_a_consistent_entry() {
        let e = LedgerEntry::new_pending(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Money::from_i64(50),
            Money::from_i64(47),
            Money::from_i64(3),
        );
        assert!(e.balances());
    }

    #[test]
    fn balance_equation_fails_for_an_inconsistent_entry() {
        let e = LedgerEntry::new_pending(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Money::from_i64(50),
            Money::from_i64(40),
            Money::from_i64(3),
        );
        assert!(!e.balances());
    }
}
