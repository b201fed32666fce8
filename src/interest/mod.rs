pub mod accrual;
pub mod rate;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

pub use accrual::{AccrualClock, AccrualSnapshot};
pub use rate::{per_second_rate, AccrualRate};

pub const SECONDS_PER_DAY: i64 = 86_400;

/// seconds from `from` to `to` at millisecond resolution, never negative
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> Decimal {
    let millis = (to - from).num_milliseconds().max(0);
    Decimal::new(millis, 3)
}
