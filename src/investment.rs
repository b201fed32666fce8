use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{CycleDurationPolicy, PlanConfig};
use crate::decimal::{DailyRate, Money};
use crate::errors::{EngineError, Result};
use crate::types::{Currency, InvestmentId, InvestmentStatus, TermPayout, UserId};

/// one principal placed under a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investment {
    // identification
    pub id: InvestmentId,
    pub owner_id: UserId,
    pub plan_name: String,

    // immutable terms
    pub principal: Money,
    pub daily_rate: DailyRate,
    pub currency: Currency,
    pub start_time: DateTime<Utc>,
    pub term_end_time: DateTime<Utc>,

    // status
    pub status: InvestmentStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,

    // cycle balances
    pub current_cycle_earned: Money,
    pub lifetime_accumulated: Money,
    pub cycles_settled: u32,

    // accrual clock
    pub cycle_started_at: DateTime<Utc>,
    pub last_accrual_time: DateTime<Utc>,
    pub next_cycle_boundary: DateTime<Utc>,

    /// bumped on every persisted change; guards read-modify-write
    pub revision: u64,
}

/// accrual progress computed by a tick, persisted when no boundary is due
#[derive(Debug, Clone, PartialEq)]
pub struct AccrualProgress {
    pub investment_id: InvestmentId,
    pub base_revision: u64,
    pub current_cycle_earned: Money,
    pub last_accrual_time: DateTime<Utc>,
}

impl Investment {
    /// activate an investment under a plan
    pub fn activate(
        plan: &PlanConfig,
        owner_id: UserId,
        principal: Money,
        policy: &CycleDurationPolicy,
        start_time: DateTime<Utc>,
    ) -> Result<Self> {
        plan.validate()?;
        policy.validate()?;

        if principal < plan.minimum_principal {
            return Err(EngineError::InvalidPrincipal {
                principal,
                reason: format!("below plan minimum {}", plan.minimum_principal),
            });
        }
        if let Some(max) = plan.maximum_principal {
            if principal > max {
                return Err(EngineError::InvalidPrincipal {
                    principal,
                    reason: format!("above plan maximum {}", max),
                });
            }
        }

        let mut investment = Self::from_terms(
            owner_id,
            principal,
            plan.daily_rate,
            plan.currency,
            start_time,
            policy.term_length(plan.term_days)?,
            policy.day_length(),
        )?;
        investment.plan_name = plan.name.clone();
        Ok(investment)
    }

    /// create from explicit terms
    pub fn from_terms(
        owner_id: UserId,
        principal: Money,
        daily_rate: DailyRate,
        currency: Currency,
        start_time: DateTime<Utc>,
        term: Duration,
        cycle_length: Duration,
    ) -> Result<Self> {
        if !principal.is_positive() {
            return Err(EngineError::InvalidPrincipal {
                principal,
                reason: "must be positive".to_string(),
            });
        }
        if daily_rate.is_negative() || daily_rate == DailyRate::ZERO {
            return Err(EngineError::InvalidRate { rate: daily_rate });
        }
        if term <= Duration::zero() {
            return Err(EngineError::InvalidTerm {
                message: format!("term must be positive, got {}s", term.num_seconds()),
            });
        }
        if cycle_length <= Duration::zero() {
            return Err(EngineError::InvalidTerm {
                message: format!("cycle must be positive, got {}s", cycle_length.num_seconds()),
            });
        }

        let term_end_time = offset(start_time, term, "term")?;
        let next_cycle_boundary = offset(start_time, cycle_length, "cycle")?;
        // the last cycle may open just before term end and run one cycle past it
        offset(term_end_time, cycle_length, "final cycle")?;

        Ok(Self {
            id: Uuid::new_v4(),
            owner_id,
            plan_name: String::new(),
            principal,
            daily_rate,
            currency,
            start_time,
            term_end_time,
            status: InvestmentStatus::Active,
            completed_at: None,
            cancelled_at: None,
            current_cycle_earned: Money::ZERO,
            lifetime_accumulated: Money::ZERO,
            cycles_settled: 0,
            cycle_started_at: start_time,
            last_accrual_time: start_time,
            next_cycle_boundary,
            revision: 0,
        })
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// whether the scheduler should pick this investment up at `now`
    pub fn is_due(&self, now: DateTime<Utc>, granularity: Duration) -> bool {
        self.is_active()
            && (self.next_cycle_boundary <= now
                || self.term_end_time <= now
                || now - self.last_accrual_time >= granularity)
    }

    /// amount the term settlement releases to the wallet
    pub fn term_payout(&self, payout: TermPayout) -> Money {
        match payout {
            TermPayout::PrincipalAndAccumulated => self.principal + self.lifetime_accumulated,
            TermPayout::PrincipalOnly => self.principal,
        }
    }

    /// record accrual without closing anything
    pub fn apply_progress(&mut self, progress: &AccrualProgress) {
        self.current_cycle_earned = progress.current_cycle_earned;
        self.last_accrual_time = progress.last_accrual_time;
        self.revision += 1;
    }

    /// move a closed cycle's earnings into the lifetime total and open the next cycle
    pub fn close_cycle(&mut self, amount: Money, boundary: DateTime<Utc>, cycle_length: Duration) {
        self.settle_cycle(amount, boundary);
        self.next_cycle_boundary = boundary + cycle_length;
        self.revision += 1;
    }

    /// close the still-open partial cycle at term end, then complete the investment
    pub fn close_term(&mut self, open_cycle_amount: Money, closed_at: DateTime<Utc>) {
        if open_cycle_amount.is_positive() {
            self.settle_cycle(open_cycle_amount, self.term_end_time);
        } else {
            self.current_cycle_earned = Money::ZERO;
            self.last_accrual_time = self.term_end_time;
        }
        self.status = InvestmentStatus::Completed;
        self.completed_at = Some(closed_at);
        self.revision += 1;
    }

    pub fn cancel(&mut self, cancelled_at: DateTime<Utc>) {
        self.status = InvestmentStatus::Cancelled;
        self.cancelled_at = Some(cancelled_at);
        self.revision += 1;
    }

    fn settle_cycle(&mut self, amount: Money, boundary: DateTime<Utc>) {
        self.lifetime_accumulated += amount;
        self.current_cycle_earned = Money::ZERO;
        self.cycle_started_at = boundary;
        self.last_accrual_time = boundary;
        self.cycles_settled += 1;
    }
}

fn offset(from: DateTime<Utc>, by: Duration, what: &str) -> Result<DateTime<Utc>> {
    from.checked_add_signed(by).ok_or_else(|| EngineError::InvalidTerm {
        message: format!("{} of {}s ends outside the supported date range", what, by.num_seconds()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn plan() -> PlanConfig {
        PlanConfig::new("gold", DailyRate::from_percent(dec!(6.7)), 30, Currency::Usdt)
            .with_limits(Money::from_major(100), Some(Money::from_major(1_000_000)))
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_activation_sets_clock() {
        let policy = CycleDurationPolicy::standard();
        let inv = Investment::activate(&plan(), Uuid::new_v4(), Money::from_major(100_000), &policy, start())
            .unwrap();

        assert_eq!(inv.status, InvestmentStatus::Active);
        assert_eq!(inv.plan_name, "gold");
        assert_eq!(inv.term_end_time, start() + Duration::days(30));
        assert_eq!(inv.next_cycle_boundary, start() + Duration::days(1));
        assert_eq!(inv.cycle_started_at, start());
        assert_eq!(inv.last_accrual_time, start());
        assert!(inv.current_cycle_earned.is_zero());
        assert!(inv.lifetime_accumulated.is_zero());
    }

    #[test]
    fn test_activation_rejects_bad_principal() {
        let policy = CycleDurationPolicy::standard();

        let below = Investment::activate(&plan(), Uuid::new_v4(), Money::from_major(50), &policy, start());
        assert!(matches!(below, Err(EngineError::InvalidPrincipal { .. })));

        let above = Investment::activate(&plan(), Uuid::new_v4(), Money::from_major(2_000_000), &policy, start());
        assert!(matches!(above, Err(EngineError::InvalidPrincipal { .. })));

        let negative = Investment::from_terms(
            Uuid::new_v4(),
            Money::from_major(-10),
            DailyRate::from_percent(dec!(1)),
            Currency::Usd,
            start(),
            Duration::days(10),
            Duration::days(1),
        );
        assert!(matches!(negative, Err(EngineError::InvalidPrincipal { .. })));
    }

    #[test]
    fn test_activation_rejects_bad_rate_and_term() {
        let rate = Investment::from_terms(
            Uuid::new_v4(),
            Money::from_major(1_000),
            DailyRate::from_percent(dec!(-0.5)),
            Currency::Usd,
            start(),
            Duration::days(10),
            Duration::days(1),
        );
        assert!(matches!(rate, Err(EngineError::InvalidRate { .. })));

        let term = Investment::from_terms(
            Uuid::new_v4(),
            Money::from_major(1_000),
            DailyRate::from_percent(dec!(1)),
            Currency::Usd,
            start(),
            Duration::zero(),
            Duration::days(1),
        );
        assert!(matches!(term, Err(EngineError::InvalidTerm { .. })));
    }

    #[test]
    fn test_out_of_range_terms_rejected() {
        let endless = Investment::from_terms(
            Uuid::new_v4(),
            Money::from_major(1_000),
            DailyRate::from_percent(dec!(1)),
            Currency::Usd,
            start(),
            Duration::MAX,
            Duration::days(1),
        );
        assert!(matches!(endless, Err(EngineError::InvalidTerm { .. })));

        let endless_cycle = Investment::from_terms(
            Uuid::new_v4(),
            Money::from_major(1_000),
            DailyRate::from_percent(dec!(1)),
            Currency::Usd,
            start(),
            Duration::days(10),
            Duration::MAX,
        );
        assert!(matches!(endless_cycle, Err(EngineError::InvalidTerm { .. })));

        // a day length that slipped past config loading is still refused
        let policy = CycleDurationPolicy::accelerated(10_000_000_000_000);
        let activated = Investment::activate(&plan(), Uuid::new_v4(), Money::from_major(1_000), &policy, start());
        assert!(matches!(activated, Err(EngineError::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_due_honours_boundaries_regardless_of_granularity() {
        let policy = CycleDurationPolicy::standard();
        let mut inv = Investment::activate(&plan(), Uuid::new_v4(), Money::from_major(1_000), &policy, start())
            .unwrap();

        // accrued a second before the boundary; granularity alone would skip it
        inv.last_accrual_time = inv.next_cycle_boundary - Duration::seconds(1);
        let granularity = Duration::hours(1);

        assert!(!inv.is_due(inv.next_cycle_boundary - Duration::milliseconds(500), granularity));
        assert!(inv.is_due(inv.next_cycle_boundary, granularity));

        inv.cancel(start());
        assert!(!inv.is_due(inv.next_cycle_boundary, granularity));
    }

    #[test]
    fn test_close_cycle_and_term() {
        let policy = CycleDurationPolicy::standard();
        let mut inv = Investment::activate(&plan(), Uuid::new_v4(), Money::from_major(100_000), &policy, start())
            .unwrap();

        let boundary = inv.next_cycle_boundary;
        inv.close_cycle(Money::from_major(6_700), boundary, policy.day_length());

        assert_eq!(inv.lifetime_accumulated, Money::from_major(6_700));
        assert!(inv.current_cycle_earned.is_zero());
        assert_eq!(inv.cycle_started_at, boundary);
        assert_eq!(inv.next_cycle_boundary, boundary + Duration::days(1));
        assert_eq!(inv.cycles_settled, 1);
        assert_eq!(inv.revision, 1);

        let closed_at = inv.term_end_time + Duration::minutes(3);
        inv.close_term(Money::from_major(50), closed_at);

        assert_eq!(inv.lifetime_accumulated, Money::from_major(6_750));
        assert_eq!(inv.status, InvestmentStatus::Completed);
        assert_eq!(inv.completed_at, Some(closed_at));
        assert_eq!(inv.cycles_settled, 2);
        assert_eq!(
            inv.term_payout(TermPayout::PrincipalAndAccumulated),
            Money::from_major(106_750)
        );
        assert_eq!(inv.term_payout(TermPayout::PrincipalOnly), Money::from_major(100_000));
    }
}
