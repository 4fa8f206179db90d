//! The escrow + triple-entry ledger.
//!
//! `Ledger<S>` is generic over [`Storage`] the way a handful of small,
//! well-scoped ledger crates in the wild are: the ledger owns concurrency
//! control (a per-account lock held across the read-modify-write cycle)
//! and delegates durability to `S`.

pub mod account;
pub mod entry;
pub mod store;
pub mod transaction;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rand::RngCore;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

pub use account::{Account, SubBalance, TrustLevel};
pub use entry::{LedgerEntry, SettlementStatus, TREASURY_LABEL};
pub use store::{MemoryStore, Storage};
pub use transaction::{Transaction, TransactionKind};

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::money::Money;

/// Summary returned by [`Ledger::verify_ledger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerIntegrity {
    Ok,
    Alert,
}

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub integrity: LedgerIntegrity,
    pub drift: Money,
    pub invalid_entries: Vec<Uuid>,
}

pub struct Ledger<S: Storage> {
    storage: Arc<S>,
    config: Config,
    account_locks: AsyncMutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl<S: Storage> Ledger<S> {
    pub fn new(storage: Arc<S>, config: Config) -> Self {
        Ledger {
            storage,
            config,
            account_locks: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Direct access to the backing store, for assertions a caller can't
    /// make through the ledger's own read-modify-write API (tests and
    /// audit tooling only).
    #[doc(hidden)]
    pub fn storage_for_test(&self) -> &Arc<S> {
        &self.storage
    }

    async fn lock_handle(&self, account_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut locks = self.account_locks.lock().await;
        locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Opens a new account with an `available` balance of `initial` and a
    /// freshly generated `balance_salt`.
    pub async fn open_account(&self, initial: Money) -> CoreResult<Account> {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let account = Account::new(Uuid::new_v4(), initial, salt);
        self.storage.save_account(account.clone()).await?;
        Ok(account)
    }

    async fn load_checked(&self, account_id: Uuid) -> CoreResult<Account> {
        let account = self
            .storage
            .load_account(account_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(account_id.to_string()))?;
        if account.frozen {
            return Err(CoreError::AccountFrozen { account: account_id });
        }
        if !account.verify_integrity() {
            return Err(CoreError::IntegrityViolation {
                account: account_id,
                detail: "stored integrity_hash does not match recomputed hash".to_string(),
            });
        }
        Ok(account)
    }

    /// Freezes an account in place, called by any caller that observes an
    /// [`CoreError::IntegrityViolation`] for it. Freezing itself bypasses
    /// the integrity check (an already-corrupt account must still be
    /// freezable).
    pub async fn freeze_account(&self, account_id: Uuid) -> CoreResult<()> {
        let lock = self.lock_handle(account_id).await;
        let _guard = lock.lock().await;
        let mut account = self
            .storage
            .load_account(account_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(account_id.to_string()))?;
        account.frozen = true;
        self.storage.save_account(account).await
    }

    async fn append_tx(
        &self,
        account_id: Uuid,
        kind: TransactionKind,
        sub_balance: SubBalance,
        amount: Money,
        balance_before: Money,
        balance_after: Money,
        reference: Option<String>,
    ) -> CoreResult<()> {
        let previous = self.storage.tip_hash(account_id).await?;
        let tx = Transaction::new(
            account_id,
            kind,
            sub_balance,
            amount,
            balance_before,
            balance_after,
            previous,
            Utc::now(),
            reference,
        );
        self.storage.append_transaction(tx).await
    }

    /// Credits `amount` into an account's `available` sub-balance. Used
    /// for deposits, prize payouts once escrow has already been released,
    /// and adjustments.
    pub async fn credit(
        &self,
        account_id: Uuid,
        amount: Money,
        kind: TransactionKind,
        reference: Option<String>,
    ) -> CoreResult<Account> {
        let lock = self.lock_handle(account_id).await;
        let _guard = lock.lock().await;
        let mut account = self.load_checked(account_id).await?;
        let before = account.available;
        let after = before.checked_add(amount).ok_or(CoreError::Overflow)?;
        account.available = after;
        account.refresh_hash();
        self.append_tx(
            account_id,
            kind,
            SubBalance::Available,
            amount,
            before,
            after,
            reference,
        )
        .await?;
        self.storage.save_account(account.clone()).await?;
        Ok(account)
    }

    /// Debits `amount` from an account's `available` sub-balance.
    pub async fn debit(
        &self,
        account_id: Uuid,
        amount: Money,
        kind: TransactionKind,
        reference: Option<String>,
    ) -> CoreResult<Account> {
        let lock = self.lock_handle(account_id).await;
        let _guard = lock.lock().await;
        let mut account = self.load_checked(account_id).await?;
        if account.available < amount {
            return Err(CoreError::InsufficientFunds {
                account: account_id,
                needed: amount,
                available: account.available,
            });
        }
        let before = account.available;
        let after = before.checked_sub(amount).ok_or(CoreError::Overflow)?;
        account.available = after;
        account.refresh_hash();
        self.append_tx(
            account_id,
            kind,
            SubBalance::Available,
            amount,
            before,
            after,
            reference,
        )
        .await?;
        self.storage.save_account(account.clone()).await?;
        Ok(account)
    }

    /// Moves `amount` from `available` into `escrow_match`, recording a
    /// paired debit-from-available / credit-to-escrow transaction pair.
    pub async fn lock_escrow(&self, account_id: Uuid, amount: Money, match_id: Uuid) -> CoreResult<Account> {
        let lock = self.lock_handle(account_id).await;
        let _guard = lock.lock().await;
        let mut account = self.load_checked(account_id).await?;
        if account.available < amount {
            return Err(CoreError::InsufficientFunds {
                account: account_id,
                needed: amount,
                available: account.available,
            });
        }
        let avail_before = account.available;
        let avail_after = avail_before.checked_sub(amount).ok_or(CoreError::Overflow)?;
        let escrow_before = account.escrow_match;
        let escrow_after = escrow_before.checked_add(amount).ok_or(CoreError::Overflow)?;
        account.available = avail_after;
        account.escrow_match = escrow_after;
        account.refresh_hash();

        let reference = Some(format!("match:{match_id}"));
        self.append_tx(
            account_id,
            TransactionKind::EscrowLock,
            SubBalance::Available,
            amount,
            avail_before,
            avail_after,
            reference.clone(),
        )
        .await?;
        self.append_tx(
            account_id,
            TransactionKind::EscrowLock,
            SubBalance::EscrowMatch,
            amount,
            escrow_before,
            escrow_after,
            reference,
        )
        .await?;
        self.storage.save_account(account.clone()).await?;
        Ok(account)
    }

    /// Mirror of [`Ledger::lock_escrow`]: moves `amount` back out of
    /// `escrow_match`. When `refund_to_available` is true the funds
    /// return to the original holder's `available` balance (a cancelled
    /// match); when false the escrow is simply vacated without a
    /// corresponding `available` credit, because ownership is being
    /// transferred elsewhere as part of a settlement the caller is
    /// driving (see [`Ledger::settle_match`]).
    pub async fn release_escrow(
        &self,
        account_id: Uuid,
        amount: Money,
        match_id: Uuid,
        refund_to_available: bool,
    ) -> CoreResult<Account> {
        let lock = self.lock_handle(account_id).await;
        let _guard = lock.lock().await;
        let mut account = self.load_checked(account_id).await?;
        if account.escrow_match < amount {
            return Err(CoreError::InsufficientFunds {
                account: account_id,
                needed: amount,
                available: account.escrow_match,
            });
        }
        let escrow_before = account.escrow_match;
        let escrow_after = escrow_before.checked_sub(amount).ok_or(CoreError::Overflow)?;
        account.escrow_match = escrow_after;

        let reference = Some(format!("match:{match_id}"));
        self.append_tx(
            account_id,
            TransactionKind::EscrowRelease,
            SubBalance::EscrowMatch,
            amount,
            escrow_before,
            escrow_after,
            reference.clone(),
        )
        .await?;

        if refund_to_available {
            let avail_before = account.available;
            let avail_after = avail_before.checked_add(amount).ok_or(CoreError::Overflow)?;
            account.available = avail_after;
            self.append_tx(
                account_id,
                TransactionKind::EscrowRelease,
                SubBalance::Available,
                amount,
                avail_before,
                avail_after,
                reference,
            )
            .await?;
        }
        account.refresh_hash();
        self.storage.save_account(account.clone()).await?;
        Ok(account)
    }

    /// Atomic winner/loser/treasury settlement.
    ///
    /// Acquires the winner's and loser's account locks in ascending
    /// `Uuid` order, the global ordering used for every cross-account
    /// operation, then the treasury's own lock last (nothing else locks
    /// the treasury, so this cannot deadlock against the account-pair
    /// ordering).
    pub async fn settle_match(
        &self,
        match_id: Uuid,
        winner_id: Uuid,
        loser_id: Uuid,
        bet: Money,
        num_players: u32,
    ) -> CoreResult<LedgerEntry> {
        let tier = self
            .config
            .commission_tier_for(bet)
            .ok_or_else(|| CoreError::NotFound("no commission tier covers this bet".to_string()))?;
        let fee_per_player = bet.mul_rate_rounded(tier.rate);
        let total_pot = bet.checked_mul_u32(num_players).ok_or(CoreError::Overflow)?;
        let total_fee = fee_per_player
            .checked_mul_u32(num_players)
            .ok_or(CoreError::Overflow)?;
        let prize = total_pot.checked_sub(total_fee).ok_or(CoreError::Overflow)?;

        let mut entry = LedgerEntry::new_pending(match_id, winner_id, loser_id, total_pot, prize, total_fee);
        if !entry.balances() {
            return Err(CoreError::IntegrityViolation {
                account: winner_id,
                detail: "settlement balance equation failed before any mutation".to_string(),
            });
        }
        self.storage.save_ledger_entry(entry.clone()).await?;

        let (first, second) = if winner_id <= loser_id {
            (winner_id, loser_id)
        } else {
            (loser_id, winner_id)
        };
        let lock_first = self.lock_handle(first).await;
        let lock_second = self.lock_handle(second).await;
        let _g1 = lock_first.lock().await;
        let _g2 = lock_second.lock().await;

        match self
            .settle_locked(&mut entry, winner_id, loser_id, bet, prize, total_fee, match_id)
            .await
        {
            Ok(()) => {
                entry.status = SettlementStatus::Committed;
                self.storage.save_ledger_entry(entry.clone()).await?;
                Ok(entry)
            }
            Err(e) => {
                entry.status = SettlementStatus::RolledBack;
                // escrow is left intact on failure; only the entry's own
                // status changes step 5.
                self.storage.save_ledger_entry(entry.clone()).await?;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn settle_locked(
        &self,
        _entry: &mut LedgerEntry,
        winner_id: Uuid,
        loser_id: Uuid,
        bet: Money,
        prize: Money,
        total_fee: Money,
        match_id: Uuid,
    ) -> CoreResult<()> {
        let mut loser = self
            .storage
            .load_account(loser_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(loser_id.to_string()))?;
        if loser.escrow_match < bet {
            return Err(CoreError::InsufficientFunds {
                account: loser_id,
                needed: bet,
                available: loser.escrow_match,
            });
        }
        let mut winner = self
            .storage
            .load_account(winner_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(winner_id.to_string()))?;
        if winner.escrow_match < bet {
            return Err(CoreError::InsufficientFunds {
                account: winner_id,
                needed: bet,
                available: winner.escrow_match,
            });
        }

        let reference = Some(format!("match:{match_id}"));

        // loser's escrow_match -= bet
        let loser_escrow_before = loser.escrow_match;
        let loser_escrow_after = loser_escrow_before
            .checked_sub(bet)
            .ok_or(CoreError::Overflow)?;
        loser.escrow_match = loser_escrow_after;
        loser.refresh_hash();
        self.append_tx(
            loser_id,
            TransactionKind::EscrowRelease,
            SubBalance::EscrowMatch,
            bet,
            loser_escrow_before,
            loser_escrow_after,
            reference.clone(),
        )
        .await?;
        self.storage.save_account(loser.clone()).await?;

        // winner's escrow_match -= bet
        let winner_escrow_before = winner.escrow_match;
        let winner_escrow_after = winner_escrow_before
            .checked_sub(bet)
            .ok_or(CoreError::Overflow)?;
        winner.escrow_match = winner_escrow_after;
        self.append_tx(
            winner_id,
            TransactionKind::EscrowRelease,
            SubBalance::EscrowMatch,
            bet,
            winner_escrow_before,
            winner_escrow_after,
            reference.clone(),
        )
        .await?;

        // winner's available += prize
        let winner_avail_before = winner.available;
        let winner_avail_after = winner_avail_before
            .checked_add(prize)
            .ok_or(CoreError::Overflow)?;
        winner.available = winner_avail_after;
        winner.refresh_hash();
        self.append_tx(
            winner_id,
            TransactionKind::PrizeCredit,
            SubBalance::Available,
            prize,
            winner_avail_before,
            winner_avail_after,
            reference.clone(),
        )
        .await?;
        self.storage.save_account(winner.clone()).await?;

        // treasury += total_fee
        self.storage.add_treasury(total_fee).await?;
        self.append_tx(
            Uuid::nil(),
            TransactionKind::SystemFee,
            SubBalance::Available,
            total_fee,
            Money::zero(),
            Money::zero(),
            reference,
        )
        .await?;

        Ok(())
    }

    /// Traverses all committed [`LedgerEntry`]s, recomputes the treasury
    /// balance by summing `rake_amount`, and checks each entry's balance
    /// equation.
    pub async fn verify_ledger(&self) -> CoreResult<VerifyReport> {
        let entries = self.storage.committed_ledger_entries().await?;
        let expected_treasury: Money = entries.iter().map(|e| e.rake_amount).sum();
        let actual_treasury = self.storage.treasury_balance().await?;
        let drift = expected_treasury
            .checked_sub(actual_treasury)
            .unwrap_or(expected_treasury);

        let invalid_entries: Vec<Uuid> = entries
            .iter()
            .filter(|e| !e.balances())
            .map(|e| e.id)
            .collect();

        let integrity = if drift.is_zero() && invalid_entries.is_empty() {
            LedgerIntegrity::Ok
        } else {
            LedgerIntegrity::Alert
        };

        Ok(VerifyReport {
            integrity,
            drift,
            invalid_entries,
        })
    }

    /// Tip hash of an account's transaction chain, used by callers (e.g.
    /// the match manager's `confirm_escrow` trigger) that need to check a
    /// client-reported `transaction_hash` against what was actually
    /// recorded.
    pub async fn tip_hash(&self, account_id: Uuid) -> CoreResult<Option<[u8; 32]>> {
        self.storage.tip_hash(account_id).await
    }

    /// Replays an account's transaction chain and returns the balance
    /// each sub-balance should hold, as a cross-check independent of the
    /// stored `integrity_hash`: balance is always re-derivable from the
    /// chain, never just asserted via the stored hash.
    pub async fn recompute_balance_from_chain(&self, account_id: Uuid) -> CoreResult<Money> {
        let chain = self.storage.transactions_for(account_id).await?;
        if !transaction::verify_chain(&chain) {
            return Err(CoreError::IntegrityViolation {
                account: account_id,
                detail: "transaction chain is broken".to_string(),
            });
        }
        let mut totals: HashMap<SubBalance, Money> = HashMap::new();
        for tx in &chain {
            totals.insert(tx.sub_balance, tx.balance_after);
        }
        Ok(totals.values().copied().sum())
    }
}
