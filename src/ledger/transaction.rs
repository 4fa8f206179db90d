//! Hash-chained per-account transaction log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::ledger::account::SubBalance;
use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    EscrowLock,
    EscrowRelease,
    PrizeCredit,
    SystemFee,
    Rollback,
    Adjustment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub kind: TransactionKind,
    pub sub_balance: SubBalance,
    pub amount: Money,
    pub balance_before: Money,
    pub balance_after: Money,
    pub previous_tx_hash: Option<[u8; 32]>,
    pub transaction_hash: [u8; 32],
    pub created_at: DateTime<Utc>,
    pub reference: Option<String>,
}

impl Transaction {
    /// `H(previous || amount || created_at || account_id)`.
    pub fn compute_hash(
        previous: Option<[u8; 32]>,
        amount: Money,
        created_at: DateTime<Utc>,
        account_id: Uuid,
    ) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(previous.unwrap_or([0u8; 32]));
        hasher.update(amount.as_decimal().to_string().as_bytes());
        hasher.update(created_at.to_rfc3339().as_bytes());
        hasher.update(account_id.as_bytes());
        hasher.finalize().into()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account_id: Uuid,
        kind: TransactionKind,
        sub_balance: SubBalance,
        amount: Money,
        balance_before: Money,
        balance_after: Money,
        previous_tx_hash: Option<[u8; 32]>,
        created_at: DateTime<Utc>,
        reference: Option<String>,
    ) -> Self {
        let transaction_hash =
            Transaction::compute_hash(previous_tx_hash, amount, created_at, account_id);
        Transaction {
            id: Uuid::new_v4(),
            account_id,
            kind,
            sub_balance,
            amount,
            balance_before,
            balance_after,
            previous_tx_hash,
            transaction_hash,
            created_at,
            reference,
        }
    }
}

/// Verifies that `chain`, in the order given, forms a valid per-account
/// hash chain: each entry's `previous_tx_hash` must equal the prior
/// entry's `transaction_hash`.
pub fn verify_chain(chain: &[Transaction]) -> bool {
    chain.windows(2).all(|pair| {
        let (prev, next) = (&pair[0], &pair[1]);
        next.previous_tx_hash == Some(prev.transaction_hash)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx_at(account: Uuid, prev: Option<[u8; 32]>, when: DateTime<Utc>) -> Transaction {
        Transaction::new(
            account,
            TransactionKind::Deposit,
            SubBalance::Available,
            Money::from_i64(10),
            Money::zero(),
            Money::from_i64(10),
            prev,
            when,
            None,
        )
    }

    #[test]
    fn chain_of_two_links_correctly() {
        let account = Uuid::new_v4();
        let t0 = Utc::now();
        let first = tx_at(account, None, t0);
        let second = tx_at(account, Some(first.transaction_hash), t0);
        assert!(verify_chain(&[first, second]));
    }

    #[test]
    fn broken_link_is_detected() {
        let account = Uuid::new_v4();
        let t0 = Utc::now();
        let first = tx_at(account, None, t0);
        let second = tx_at(account, Some([0xFFu8; 32]), t0);
        assert!(!verify_chain(&[first, second]));
    }
}
