pub mod config;
pub mod cycle;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod interest;
pub mod investment;
pub mod ledger;
pub mod scheduler;
pub mod serialization;
pub mod services;
pub mod types;

// re-export key types
pub use config::{CycleDurationPolicy, EngineConfig, PlanConfig, SchedulerConfig};
pub use cycle::{CycleStateMachine, Effect, TickPlan};
pub use decimal::{DailyRate, Money};
pub use errors::{EngineError, Result};
pub use events::{Event, EventKind, EventStore};
pub use interest::{per_second_rate, AccrualClock, AccrualRate, AccrualSnapshot};
pub use investment::{AccrualProgress, Investment};
pub use ledger::{
    CommitOutcome, CommitReceipt, InMemoryStore, InvestmentStore, LedgerAudit, LedgerEntry,
    LedgerKey, Reconciler,
};
pub use scheduler::{InvestmentFailure, InvestmentOutcome, PassReport, SchedulerDriver};
pub use serialization::InvestmentView;
pub use services::{InMemoryWallet, NotificationService, RecordingNotifier, WalletError, WalletService};
pub use types::{
    Currency, CyclePhase, InvestmentId, InvestmentStatus, LedgerEntryKind, TermPayout, UserId,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
