/// serialization support for investments
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{DailyRate, Money};
use crate::errors::Result;
use crate::interest::{AccrualClock, AccrualRate};
use crate::investment::Investment;
use crate::types::{Currency, InvestmentId, InvestmentStatus, UserId};

/// serializable view of an investment's state
#[derive(Debug, Serialize, Deserialize)]
pub struct InvestmentView {
    pub id: InvestmentId,
    pub owner_id: UserId,
    pub plan: String,
    pub status: InvestmentStatus,
    pub currency: Currency,
    pub terms: TermsView,
    pub cycle: CycleView,
    pub earnings: EarningsView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TermsView {
    pub principal: Money,
    pub daily_rate: DailyRate,
    pub start_time: DateTime<Utc>,
    pub term_end_time: DateTime<Utc>,
    pub per_second_rate: AccrualRate,
    pub daily_earnings: Money,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CycleView {
    pub cycle_started_at: DateTime<Utc>,
    pub last_accrual_time: DateTime<Utc>,
    pub next_cycle_boundary: DateTime<Utc>,
    pub cycles_settled: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EarningsView {
    pub current_cycle_earned: Money,
    pub lifetime_accumulated: Money,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl InvestmentView {
    /// rates are derived with the clock's day length
    pub fn from_investment(investment: &Investment, clock: &AccrualClock) -> Result<Self> {
        let rate = clock.accrual_rate(investment)?;

        Ok(InvestmentView {
            id: investment.id,
            owner_id: investment.owner_id,
            plan: investment.plan_name.clone(),
            status: investment.status,
            currency: investment.currency,
            terms: TermsView {
                principal: investment.principal,
                daily_rate: investment.daily_rate,
                start_time: investment.start_time,
                term_end_time: investment.term_end_time,
                per_second_rate: rate,
                daily_earnings: clock.cycle_earnings(investment)?,
            },
            cycle: CycleView {
                cycle_started_at: investment.cycle_started_at,
                last_accrual_time: investment.last_accrual_time,
                next_cycle_boundary: investment.next_cycle_boundary,
                cycles_settled: investment.cycles_settled,
            },
            earnings: EarningsView {
                current_cycle_earned: investment.current_cycle_earned,
                lifetime_accumulated: investment.lifetime_accumulated,
                completed_at: investment.completed_at,
                cancelled_at: investment.cancelled_at,
            },
        })
    }

    /// convert to pretty-printed json string
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
