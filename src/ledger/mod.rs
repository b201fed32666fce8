pub mod memory;
pub mod reconciler;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{EngineError, Result};
use crate::investment::{AccrualProgress, Investment};
use crate::types::{Currency, InvestmentId, LedgerEntryKind, UserId};

pub use memory::InMemoryStore;
pub use reconciler::{CommitOutcome, CommitReceipt, LedgerAudit, Reconciler};

/// uniqueness key of a committed payout
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    pub investment_id: InvestmentId,
    pub boundary: DateTime<Utc>,
    pub kind: LedgerEntryKind,
}

/// immutable record of one committed payout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub investment_id: InvestmentId,
    pub owner_id: UserId,
    /// the boundary this entry settles
    pub boundary: DateTime<Utc>,
    pub amount: Money,
    pub currency: Currency,
    pub kind: LedgerEntryKind,
    pub committed_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        investment: &Investment,
        boundary: DateTime<Utc>,
        amount: Money,
        kind: LedgerEntryKind,
        committed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            investment_id: investment.id,
            owner_id: investment.owner_id,
            boundary,
            amount,
            currency: investment.currency,
            kind,
            committed_at,
        }
    }

    pub fn key(&self) -> LedgerKey {
        LedgerKey {
            investment_id: self.investment_id,
            boundary: self.boundary,
            kind: self.kind,
        }
    }
}

/// result of an attempted ledger insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerInsert {
    Inserted,
    /// an entry with the same key is already recorded
    Conflict,
}

/// operations available inside one atomic store transaction
pub trait StoreTransaction {
    fn investment(&self, id: InvestmentId) -> Result<Investment>;

    fn insert_ledger_entry(&mut self, entry: LedgerEntry) -> Result<LedgerInsert>;

    fn put_investment(&mut self, investment: Investment) -> Result<()>;
}

/// Persistent store for investments and ledger entries.
///
/// Implementations must enforce uniqueness of `LedgerKey` and make
/// `transaction` all-or-nothing: when the closure returns an error nothing it
/// staged becomes visible.
pub trait InvestmentStore: Send + Sync {
    fn insert_investment(&self, investment: Investment) -> Result<()>;

    fn get_investment(&self, id: InvestmentId) -> Result<Investment>;

    /// active investments with a due boundary or stale accrual
    fn find_due(&self, now: DateTime<Utc>, granularity: Duration) -> Result<Vec<Investment>>;

    fn ledger_entries(&self, id: InvestmentId) -> Result<Vec<LedgerEntry>>;

    fn transaction<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> Result<T>;

    /// compare-and-set write of plain accrual progress
    fn save_progress(&self, progress: &AccrualProgress) -> Result<Investment> {
        self.transaction(|tx| {
            let mut investment = tx.investment(progress.investment_id)?;
            if !investment.is_active() {
                return Err(EngineError::InvestmentNotActive {
                    id: investment.id,
                    status: investment.status,
                });
            }
            if investment.revision != progress.base_revision {
                return Err(EngineError::StaleInvestment {
                    id: investment.id,
                    expected: progress.base_revision,
                    found: investment.revision,
                });
            }
            investment.apply_progress(progress);
            tx.put_investment(investment.clone())?;
            Ok(investment)
        })
    }
}
