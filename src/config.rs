use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::{DailyRate, Money};
use crate::errors::{EngineError, Result};
use crate::interest::SECONDS_PER_DAY;
use crate::types::{Currency, TermPayout};

/// engine configuration, fixed for the lifetime of a scheduler driver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub cycle_policy: CycleDurationPolicy,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub term_payout: TermPayout,
    #[serde(default)]
    pub plans: Vec<PlanConfig>,
}

/// length of an accrual day
///
/// Production runs on 86400-second days. QA deployments shrink the day so a whole
/// term can be observed in minutes; changing it means restarting the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleDurationPolicy {
    pub day_length_secs: i64,
}

/// scheduler driver settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// seconds between passes
    pub tick_interval_secs: u64,
    /// plain accrual ticks for an investment run at most this often
    pub minimum_accrual_granularity_secs: i64,
    /// size of the worker pool processing due investments
    pub worker_threads: usize,
    /// full ticks one investment may run within a single pass
    pub max_boundaries_per_pass: u32,
}

/// investment plan the immutable rate and term come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanConfig {
    pub name: String,
    pub daily_rate: DailyRate,
    pub term_days: u32,
    pub currency: Currency,
    #[serde(default)]
    pub minimum_principal: Money,
    #[serde(default)]
    pub maximum_principal: Option<Money>,
}

impl CycleDurationPolicy {
    /// 24-hour days
    pub fn standard() -> Self {
        Self {
            day_length_secs: SECONDS_PER_DAY,
        }
    }

    /// compressed days for manual QA
    pub fn accelerated(day_length_secs: i64) -> Self {
        Self { day_length_secs }
    }

    pub fn day_length(&self) -> Duration {
        Duration::try_seconds(self.day_length_secs).unwrap_or(Duration::MAX)
    }

    pub fn term_length(&self, days: u32) -> Result<Duration> {
        self.day_length_secs
            .checked_mul(days as i64)
            .and_then(Duration::try_seconds)
            .ok_or_else(|| EngineError::InvalidTerm {
                message: format!("{} days of {}s do not fit in a duration", days, self.day_length_secs),
            })
    }

    /// real days per policy day; scales the per-second rate so one policy day
    /// always earns one day's rate
    pub fn time_scale(&self) -> Decimal {
        Decimal::from(SECONDS_PER_DAY) / Decimal::from(self.day_length_secs)
    }

    pub fn is_accelerated(&self) -> bool {
        self.day_length_secs != SECONDS_PER_DAY
    }

    pub fn validate(&self) -> Result<()> {
        if self.day_length_secs <= 0 {
            return Err(EngineError::InvalidConfiguration {
                message: format!("day length must be positive, got {}s", self.day_length_secs),
            });
        }
        // the policy only ever shortens the day
        if self.day_length_secs > SECONDS_PER_DAY {
            return Err(EngineError::InvalidConfiguration {
                message: format!(
                    "day length cannot exceed {}s, got {}s",
                    SECONDS_PER_DAY, self.day_length_secs
                ),
            });
        }
        Ok(())
    }
}

impl Default for CycleDurationPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_interval_secs)
    }

    pub fn minimum_accrual_granularity(&self) -> Duration {
        Duration::try_seconds(self.minimum_accrual_granularity_secs).unwrap_or(Duration::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_secs == 0 {
            return Err(EngineError::InvalidConfiguration {
                message: "tick interval must be at least one second".to_string(),
            });
        }
        if self.minimum_accrual_granularity_secs < 0
            || Duration::try_seconds(self.minimum_accrual_granularity_secs).is_none()
        {
            return Err(EngineError::InvalidConfiguration {
                message: format!(
                    "minimum accrual granularity out of range: {}s",
                    self.minimum_accrual_granularity_secs
                ),
            });
        }
        if self.worker_threads == 0 {
            return Err(EngineError::InvalidConfiguration {
                message: "worker pool needs at least one thread".to_string(),
            });
        }
        if self.max_boundaries_per_pass == 0 {
            return Err(EngineError::InvalidConfiguration {
                message: "max boundaries per pass must be at least one".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            minimum_accrual_granularity_secs: 60,
            worker_threads: 4,
            max_boundaries_per_pass: 1,
        }
    }
}

impl PlanConfig {
    pub fn new(name: &str, daily_rate: DailyRate, term_days: u32, currency: Currency) -> Self {
        Self {
            name: name.to_string(),
            daily_rate,
            term_days,
            currency,
            minimum_principal: Money::ZERO,
            maximum_principal: None,
        }
    }

    pub fn with_limits(mut self, minimum: Money, maximum: Option<Money>) -> Self {
        self.minimum_principal = minimum;
        self.maximum_principal = maximum;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.daily_rate.is_negative() || self.daily_rate == DailyRate::ZERO {
            return Err(EngineError::InvalidRate {
                rate: self.daily_rate,
            });
        }
        if self.term_days == 0 {
            return Err(EngineError::InvalidConfiguration {
                message: format!("plan {} has a zero-day term", self.name),
            });
        }
        if let Some(max) = self.maximum_principal {
            if max < self.minimum_principal {
                return Err(EngineError::InvalidConfiguration {
                    message: format!(
                        "plan {}: maximum principal {} below minimum {}",
                        self.name, max, self.minimum_principal
                    ),
                });
            }
        }
        Ok(())
    }
}

impl EngineConfig {
    /// parse and validate a json configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.cycle_policy.validate()?;
        self.scheduler.validate()?;
        for plan in &self.plans {
            plan.validate()?;
        }
        Ok(())
    }

    pub fn plan(&self, name: &str) -> Option<&PlanConfig> {
        self.plans.iter().find(|p| p.name == name)
    }
}
