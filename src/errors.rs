use thiserror::Error;

use chrono::{DateTime, Utc};

use crate::decimal::{DailyRate, Money};
use crate::types::{InvestmentId, InvestmentStatus, LedgerEntryKind};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid daily rate: {rate}")]
    InvalidRate {
        rate: DailyRate,
    },

    #[error("invalid principal {principal}: {reason}")]
    InvalidPrincipal {
        principal: Money,
        reason: String,
    },

    #[error("invalid term: {message}")]
    InvalidTerm {
        message: String,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    #[error("investment not found: {id}")]
    InvestmentNotFound {
        id: InvestmentId,
    },

    #[error("investment {id} not active: current status is {status:?}")]
    InvestmentNotActive {
        id: InvestmentId,
        status: InvestmentStatus,
    },

    #[error("investment already exists: {id}")]
    DuplicateInvestment {
        id: InvestmentId,
    },

    #[error("stale investment {id}: expected revision {expected}, found {found}")]
    StaleInvestment {
        id: InvestmentId,
        expected: u64,
        found: u64,
    },

    #[error("boundary mismatch for {id}: effect settles {expected}, investment is at {found}")]
    BoundaryMismatch {
        id: InvestmentId,
        expected: DateTime<Utc>,
        found: DateTime<Utc>,
    },

    #[error("ledger conflict for {investment_id}: {kind:?} at {boundary} already recorded")]
    LedgerConflict {
        investment_id: InvestmentId,
        boundary: DateTime<Utc>,
        kind: LedgerEntryKind,
    },

    #[error("wallet credit of {amount} failed for investment {investment_id}: {reason}")]
    WalletCreditFailed {
        investment_id: InvestmentId,
        amount: Money,
        reason: String,
    },

    #[error("notification failed: {reason}")]
    NotificationFailed {
        reason: String,
    },

    #[error("store unavailable: {message}")]
    StoreUnavailable {
        message: String,
    },

    #[error("worker pool error: {message}")]
    WorkerPool {
        message: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// external-dependency failures that a later pass may succeed at
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::WalletCreditFailed { .. }
                | EngineError::StoreUnavailable { .. }
                | EngineError::StaleInvestment { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
