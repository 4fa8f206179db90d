//! Durable-store interface. Persistent-store choice is treated as an
//! external collaborator; this trait is the seam. Mirrors the
//! generic-over-storage shape used by comparable ledger crates in the
//! wild (a `Ledger<S>` parameterized on a `Storage` implementor).
//!
//! Every method is declared `-> impl Future<Output = ...> + Send`
//! instead of plain `async fn`: a plain `async fn` in a trait returns a
//! future with no `Send` bound, and `Ledger<S>`'s callers (the match
//! manager's grace-timer tasks) `tokio::spawn` futures that await these
//! methods through a generic `S: Storage`. The multi-thread runtime's
//! `spawn` requires `Send + 'static`, which the compiler cannot prove
//! through an unbounded associated future in generic code, so the bound
//! has to be stated here explicitly.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::ledger::account::Account;
use crate::ledger::entry::{LedgerEntry, SettlementStatus};
use crate::ledger::transaction::Transaction;
use crate::money::Money;

pub trait Storage: Send + Sync + 'static {
    fn load_account(&self, id: Uuid) -> impl Future<Output = CoreResult<Option<Account>>> + Send;
    fn save_account(&self, account: Account) -> impl Future<Output = CoreResult<()>> + Send;

    fn append_transaction(&self, tx: Transaction) -> impl Future<Output = CoreResult<()>> + Send;
    fn tip_hash(&self, account_id: Uuid) -> impl Future<Output = CoreResult<Option<[u8; 32]>>> + Send;
    fn transactions_for(&self, account_id: Uuid) -> impl Future<Output = CoreResult<Vec<Transaction>>> + Send;

    fn save_ledger_entry(&self, entry: LedgerEntry) -> impl Future<Output = CoreResult<()>> + Send;
    fn ledger_entry(&self, id: Uuid) -> impl Future<Output = CoreResult<Option<LedgerEntry>>> + Send;
    fn committed_ledger_entries(&self) -> impl Future<Output = CoreResult<Vec<LedgerEntry>>> + Send;

    fn treasury_balance(&self) -> impl Future<Output = CoreResult<Money>> + Send;
    fn add_treasury(&self, amount: Money) -> impl Future<Output = CoreResult<Money>> + Send;
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    transactions: HashMap<Uuid, Vec<Transaction>>,
    ledger_entries: HashMap<Uuid, LedgerEntry>,
    treasury_balance: Money,
}

/// In-memory `Storage` sufficient for the whole test suite and for an
/// embedder to swap out later. Internally single-guarded: callers rely on
/// `Ledger`'s own per-account locks for the read-modify-write discipline;
/// this guard only protects the map itself.
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryStore {
            state: RwLock::new(MemoryState::default()),
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore {
            state: RwLock::new(MemoryState::default()),
        }
    }
}

impl Storage for MemoryStore {
    async fn load_account(&self, id: Uuid) -> CoreResult<Option<Account>> {
        Ok(self.state.read().await.accounts.get(&id).cloned())
    }

    async fn save_account(&self, account: Account) -> CoreResult<()> {
        self.state.write().await.accounts.insert(account.id, account);
        Ok(())
    }

    async fn append_transaction(&self, tx: Transaction) -> CoreResult<()> {
        self.state
            .write()
            .await
            .transactions
            .entry(tx.account_id)
            .or_default()
            .push(tx);
        Ok(())
    }

    async fn tip_hash(&self, account_id: Uuid) -> CoreResult<Option<[u8; 32]>> {
        Ok(self
            .state
            .read()
            .await
            .transactions
            .get(&account_id)
            .and_then(|chain| chain.last())
            .map(|tx| tx.transaction_hash))
    }

    async fn transactions_for(&self, account_id: Uuid) -> CoreResult<Vec<Transaction>> {
        Ok(self
            .state
            .read()
            .await
            .transactions
            .get(&account_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_ledger_entry(&self, entry: LedgerEntry) -> CoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.ledger_entries.get(&entry.id) {
            if existing.status == SettlementStatus::Committed
                && entry.status == SettlementStatus::Committed
            {
                return Err(CoreError::AlreadySettled(entry.id));
            }
        }
        state.ledger_entries.insert(entry.id, entry);
        Ok(())
    }

    async fn ledger_entry(&self, id: Uuid) -> CoreResult<Option<LedgerEntry>> {
        Ok(self.state.read().await.ledger_entries.get(&id).cloned())
    }

    async fn committed_ledger_entries(&self) -> CoreResult<Vec<LedgerEntry>> {
        Ok(self
            .state
            .read()
            .await
            .ledger_entries
            .values()
            .filter(|e| e.status == SettlementStatus::Committed)
            .cloned()
            .collect())
    }

    async fn treasury_balance(&self) -> CoreResult<Money> {
        Ok(self.state.read().await.treasury_balance)
    }

    async fn add_treasury(&self, amount: Money) -> CoreResult<Money> {
        let mut state = self.state.write().await;
        state.treasury_balance = state
            .treasury_balance
            .checked_add(amount)
            .ok_or(CoreError::Overflow)?;
        Ok(state.treasury_balance)
    }
}
