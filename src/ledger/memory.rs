use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use crate::errors::{EngineError, Result};
use crate::investment::Investment;
use crate::ledger::{InvestmentStore, LedgerEntry, LedgerInsert, LedgerKey, StoreTransaction};
use crate::types::InvestmentId;

#[derive(Debug, Default)]
struct StoreState {
    investments: HashMap<InvestmentId, Investment>,
    ledger: BTreeMap<LedgerKey, LedgerEntry>,
}

/// In-process store.
///
/// A single lock serialises transactions, which gives the same guarantees as a
/// serialisable database transaction over "insert ledger entry + update
/// investment".
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|_| EngineError::StoreUnavailable {
            message: "store lock poisoned".to_string(),
        })
    }

    /// every investment, in no particular order
    pub fn investments(&self) -> Result<Vec<Investment>> {
        Ok(self.lock()?.investments.values().cloned().collect())
    }

    /// every ledger entry, ordered by key
    pub fn all_ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self.lock()?.ledger.values().cloned().collect())
    }
}

/// staged writes of one transaction
struct MemoryTransaction<'a> {
    committed: &'a StoreState,
    investments: HashMap<InvestmentId, Investment>,
    entries: BTreeMap<LedgerKey, LedgerEntry>,
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn investment(&self, id: InvestmentId) -> Result<Investment> {
        self.investments
            .get(&id)
            .or_else(|| self.committed.investments.get(&id))
            .cloned()
            .ok_or(EngineError::InvestmentNotFound { id })
    }

    fn insert_ledger_entry(&mut self, entry: LedgerEntry) -> Result<LedgerInsert> {
        let key = entry.key();
        if self.committed.ledger.contains_key(&key) || self.entries.contains_key(&key) {
            return Ok(LedgerInsert::Conflict);
        }
        self.entries.insert(key, entry);
        Ok(LedgerInsert::Inserted)
    }

    fn put_investment(&mut self, investment: Investment) -> Result<()> {
        if !self.committed.investments.contains_key(&investment.id) {
            return Err(EngineError::InvestmentNotFound { id: investment.id });
        }
        self.investments.insert(investment.id, investment);
        Ok(())
    }
}

impl InvestmentStore for InMemoryStore {
    fn insert_investment(&self, investment: Investment) -> Result<()> {
        let mut state = self.lock()?;
        if state.investments.contains_key(&investment.id) {
            return Err(EngineError::DuplicateInvestment { id: investment.id });
        }
        state.investments.insert(investment.id, investment);
        Ok(())
    }

    fn get_investment(&self, id: InvestmentId) -> Result<Investment> {
        self.lock()?
            .investments
            .get(&id)
            .cloned()
            .ok_or(EngineError::InvestmentNotFound { id })
    }

    fn find_due(&self, now: DateTime<Utc>, granularity: Duration) -> Result<Vec<Investment>> {
        let state = self.lock()?;
        let mut due: Vec<Investment> = state
            .investments
            .values()
            .filter(|inv| inv.is_due(now, granularity))
            .cloned()
            .collect();
        due.sort_by_key(|inv| (inv.next_cycle_boundary, inv.id));
        Ok(due)
    }

    fn ledger_entries(&self, id: InvestmentId) -> Result<Vec<LedgerEntry>> {
        let state = self.lock()?;
        Ok(state
            .ledger
            .values()
            .filter(|entry| entry.investment_id == id)
            .cloned()
            .collect())
    }

    fn transaction<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> Result<T>,
    {
        let mut state = self.lock()?;

        let mut tx = MemoryTransaction {
            committed: &*state,
            investments: HashMap::new(),
            entries: BTreeMap::new(),
        };
        // on error the staged writes are dropped with `tx`
        let value = work(&mut tx)?;
        let MemoryTransaction {
            investments,
            entries,
            ..
        } = tx;

        state.investments.extend(investments);
        state.ledger.extend(entries);
        Ok(value)
    }
}
