use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// unique identifier for an investment
pub type InvestmentId = Uuid;

/// owner of an investment, as known to the wallet service
pub type UserId = Uuid;

/// investment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvestmentStatus {
    /// accruing and settling cycles
    Active,
    /// term end reached and settled
    Completed,
    /// cancelled externally, no further accrual
    Cancelled,
}

impl InvestmentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvestmentStatus::Active)
    }
}

/// currency the principal and payouts are denominated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Usdt,
    Btc,
    Eth,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Currency::Usd => "USD",
            Currency::Usdt => "USDT",
            Currency::Btc => "BTC",
            Currency::Eth => "ETH",
        };
        write!(f, "{}", code)
    }
}

/// kind of committed payout
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LedgerEntryKind {
    /// one closed accrual cycle
    CycleRoi,
    /// principal release at end of term
    TermCompletion,
}

/// where an active investment sits in its cycle loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CyclePhase {
    Accruing,
    CycleClosing,
    TermClosing,
}

/// What the term settlement pays into the wallet.
///
/// Every closed cycle is credited to the wallet when it closes. Under the default
/// the term settlement then pays the lifetime total again, so each cycle's
/// earnings reach the wallet twice. `PrincipalOnly` pays them exactly once.
/// Choose deliberately per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TermPayout {
    /// principal plus the lifetime total, on top of the per-cycle credits
    #[default]
    PrincipalAndAccumulated,
    /// principal plus the final partial cycle; earlier cycles were credited as they closed
    PrincipalOnly,
}
