use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::decimal::{DailyRate, Money};
use crate::errors::{EngineError, Result};
use crate::interest::SECONDS_PER_DAY;

/// earnings per second of accrual, kept at full decimal precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccrualRate(Decimal);

/// the single source of every accrual amount:
/// `principal × dailyRatePercent / 100 / 86400`
pub fn per_second_rate(principal: Money, daily_rate: DailyRate) -> Result<AccrualRate> {
    if principal.is_negative() {
        return Err(EngineError::InvalidPrincipal {
            principal,
            reason: "must not be negative".to_string(),
        });
    }
    if daily_rate.is_negative() {
        return Err(EngineError::InvalidRate { rate: daily_rate });
    }

    let per_day = principal.as_decimal() * daily_rate.as_fraction();
    Ok(AccrualRate(per_day / Decimal::from(SECONDS_PER_DAY)))
}

impl AccrualRate {
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// rescale for a compressed day (see `CycleDurationPolicy::time_scale`)
    pub fn scaled(&self, factor: Decimal) -> AccrualRate {
        AccrualRate(self.0 * factor)
    }

    /// earnings over `seconds`, rounded to money precision
    pub fn earned_over(&self, seconds: Decimal) -> Money {
        Money::from_decimal(self.0 * seconds)
    }

    /// earnings over one real day
    pub fn per_day(&self) -> Money {
        self.earned_over(Decimal::from(SECONDS_PER_DAY))
    }
}

impl fmt::Display for AccrualRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/s", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_per_second_rate() {
        let rate = per_second_rate(Money::from_major(100_000), DailyRate::from_percent(dec!(6.7))).unwrap();

        // 6700 a day spread over 86400 seconds
        assert_eq!(rate.as_decimal().round_dp(10), dec!(0.0775462963));
        assert_eq!(rate.earned_over(dec!(3600)).round_dp(2), Money::from_decimal(dec!(279.17)));
    }

    #[test]
    fn test_full_day_is_exact() {
        let rate = per_second_rate(Money::from_major(100_000), DailyRate::from_percent(dec!(6.7))).unwrap();
        assert_eq!(rate.per_day(), Money::from_major(6_700));

        let odd = per_second_rate(Money::from_str_exact("1234.56").unwrap(), DailyRate::from_percent(dec!(1.3)))
            .unwrap();
        assert_eq!(odd.per_day(), Money::from_decimal(dec!(16.04928)));
    }

    #[test]
    fn test_rejects_negative_inputs() {
        let bad_rate = per_second_rate(Money::from_major(1_000), DailyRate::from_percent(dec!(-1)));
        assert!(matches!(bad_rate, Err(EngineError::InvalidRate { .. })));

        let bad_principal = per_second_rate(Money::from_major(-1_000), DailyRate::from_percent(dec!(1)));
        assert!(matches!(bad_principal, Err(EngineError::InvalidPrincipal { .. })));
    }

    #[test]
    fn test_zero_principal_accrues_nothing() {
        let rate = per_second_rate(Money::ZERO, DailyRate::from_percent(dec!(5))).unwrap();
        assert!(rate.per_day().is_zero());
    }

    #[test]
    fn test_scaled_rate() {
        let rate = per_second_rate(Money::from_major(1_000), DailyRate::from_percent(dec!(2))).unwrap();
        // a 10-minute day earns the full day's 20 in 600 seconds
        let fast = rate.scaled(dec!(144));
        assert_eq!(fast.earned_over(dec!(600)), Money::from_major(20));
    }
}
