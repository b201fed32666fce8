use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::config::CycleDurationPolicy;
use crate::decimal::Money;
use crate::errors::Result;
use crate::interest::rate::{per_second_rate, AccrualRate};
use crate::interest::seconds_between;
use crate::investment::Investment;
use crate::types::InvestmentId;

/// advisory result of looking at an investment's clock at `now`
#[derive(Debug, Clone, PartialEq)]
pub struct AccrualSnapshot {
    pub investment_id: InvestmentId,
    /// earnings added since `last_accrual_time`
    pub accrued_delta: Money,
    /// `current_cycle_earned` once the delta is applied
    pub cycle_earned: Money,
    /// time the accrual now covers; never past the cycle boundary or term end
    pub accrued_through: DateTime<Utc>,
    /// seconds credited by this snapshot
    pub elapsed_seconds: Decimal,
    pub cycle_due: bool,
    pub term_due: bool,
    /// `now` was behind `last_accrual_time`
    pub clock_skew: bool,
}

/// pure accrual clock: no mutation, no i/o
#[derive(Debug, Clone, Copy)]
pub struct AccrualClock {
    policy: CycleDurationPolicy,
}

impl AccrualClock {
    pub fn new(policy: CycleDurationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &CycleDurationPolicy {
        &self.policy
    }

    /// per-second rate for this investment under the configured day length
    pub fn accrual_rate(&self, investment: &Investment) -> Result<AccrualRate> {
        let rate = per_second_rate(investment.principal, investment.daily_rate)?;
        Ok(rate.scaled(self.policy.time_scale()))
    }

    /// earnings for a full cycle
    pub fn cycle_earnings(&self, investment: &Investment) -> Result<Money> {
        let rate = self.accrual_rate(investment)?;
        Ok(rate.earned_over(Decimal::from(self.policy.day_length_secs)))
    }

    pub fn compute_accrual(&self, investment: &Investment, now: DateTime<Utc>) -> Result<AccrualSnapshot> {
        let rate = self.accrual_rate(investment)?;

        let clock_skew = now < investment.last_accrual_time;

        // cap at the boundary; the next cycle accrues only after this one closes
        let horizon = now
            .min(investment.next_cycle_boundary)
            .min(investment.term_end_time);
        let accrued_through = horizon.max(investment.last_accrual_time);
        let elapsed_seconds = seconds_between(investment.last_accrual_time, accrued_through);

        // cycle earnings are always rate × seconds-into-cycle, rounded once; deltas
        // between two such values telescope to the exact cycle total
        let since_cycle_start = seconds_between(investment.cycle_started_at, accrued_through);
        let cycle_earned = rate
            .earned_over(since_cycle_start)
            .max(investment.current_cycle_earned);
        let accrued_delta = cycle_earned - investment.current_cycle_earned;

        Ok(AccrualSnapshot {
            investment_id: investment.id,
            accrued_delta,
            cycle_earned,
            accrued_through,
            elapsed_seconds,
            cycle_due: now >= investment.next_cycle_boundary,
            term_due: now >= investment.term_end_time,
            clock_skew,
        })
    }
}
