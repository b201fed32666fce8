use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use thiserror::Error;

use crate::decimal::Money;
use crate::errors::{EngineError, Result};
use crate::events::{Event, EventKind, EventStore};
use crate::types::{Currency, InvestmentId, UserId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("insufficient wallet context: {0}")]
    InsufficientContext(String),

    #[error("wallet unavailable: {0}")]
    Unavailable(String),
}

/// wallet the engine pays settled earnings and principal into
pub trait WalletService: Send + Sync {
    fn credit(&self, user_id: UserId, currency: Currency, amount: Money) -> std::result::Result<(), WalletError>;
}

/// best-effort notification dispatch
pub trait NotificationService: Send + Sync {
    fn notify(&self, user_id: UserId, kind: EventKind, payload: &Event) -> Result<()>;
}

/// one applied wallet credit
#[derive(Debug, Clone, PartialEq)]
pub struct WalletCredit {
    pub user_id: UserId,
    pub currency: Currency,
    pub amount: Money,
}

/// in-process wallet keeping balances per user and currency
#[derive(Debug, Default)]
pub struct InMemoryWallet {
    balances: Mutex<HashMap<(UserId, Currency), Money>>,
    credits: Mutex<Vec<WalletCredit>>,
    failing: AtomicBool,
}

impl InMemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// make every credit fail until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn balance(&self, user_id: UserId, currency: Currency) -> Money {
        self.balances
            .lock()
            .map(|b| b.get(&(user_id, currency)).copied().unwrap_or(Money::ZERO))
            .unwrap_or(Money::ZERO)
    }

    pub fn credits(&self) -> Vec<WalletCredit> {
        self.credits.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn credit_count(&self) -> usize {
        self.credits.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl WalletService for InMemoryWallet {
    fn credit(&self, user_id: UserId, currency: Currency, amount: Money) -> std::result::Result<(), WalletError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WalletError::Unavailable("wallet service offline".to_string()));
        }

        let mut balances = self
            .balances
            .lock()
            .map_err(|_| WalletError::Unavailable("balance lock poisoned".to_string()))?;
        let mut credits = self
            .credits
            .lock()
            .map_err(|_| WalletError::Unavailable("credit log lock poisoned".to_string()))?;

        *balances.entry((user_id, currency)).or_insert(Money::ZERO) += amount;
        credits.push(WalletCredit {
            user_id,
            currency,
            amount,
        });
        Ok(())
    }
}

/// notifier that keeps every event it is handed
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<EventStore>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|store| store.events().to_vec())
            .unwrap_or_default()
    }

    pub fn count(&self, investment_id: InvestmentId, kind: EventKind) -> usize {
        self.events
            .lock()
            .map(|store| store.count(investment_id, kind))
            .unwrap_or(0)
    }
}

impl NotificationService for RecordingNotifier {
    fn notify(&self, _user_id: UserId, _kind: EventKind, payload: &Event) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::NotificationFailed {
                reason: "notification channel down".to_string(),
            });
        }

        let mut store = self.events.lock().map_err(|_| EngineError::NotificationFailed {
            reason: "event store lock poisoned".to_string(),
        })?;
        store.emit(payload.clone());
        Ok(())
    }
}
