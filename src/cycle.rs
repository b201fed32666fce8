use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CycleDurationPolicy;
use crate::decimal::Money;
use crate::errors::Result;
use crate::interest::{AccrualClock, AccrualSnapshot};
use crate::investment::{AccrualProgress, Investment};
use crate::types::{CyclePhase, InvestmentId, InvestmentStatus, LedgerEntryKind};

/// side effect decided by a tick; applied only by the reconciler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    CloseCycle {
        investment_id: InvestmentId,
        boundary: DateTime<Utc>,
        amount: Money,
    },
    CloseTerm {
        investment_id: InvestmentId,
        term_end: DateTime<Utc>,
        principal: Money,
        lifetime_accumulated: Money,
        open_cycle_amount: Money,
    },
}

impl Effect {
    pub fn investment_id(&self) -> InvestmentId {
        match self {
            Effect::CloseCycle { investment_id, .. } | Effect::CloseTerm { investment_id, .. } => {
                *investment_id
            }
        }
    }

    /// the boundary this effect settles
    pub fn boundary(&self) -> DateTime<Utc> {
        match self {
            Effect::CloseCycle { boundary, .. } => *boundary,
            Effect::CloseTerm { term_end, .. } => *term_end,
        }
    }

    /// ledger entry kind guarding this effect
    pub fn kind(&self) -> LedgerEntryKind {
        match self {
            Effect::CloseCycle { .. } => LedgerEntryKind::CycleRoi,
            Effect::CloseTerm { .. } => LedgerEntryKind::TermCompletion,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        match self {
            Effect::CloseCycle { .. } => CyclePhase::CycleClosing,
            Effect::CloseTerm { .. } => CyclePhase::TermClosing,
        }
    }
}

/// decision for one investment on one tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickPlan {
    /// terminal status, nothing to do
    Idle {
        investment_id: InvestmentId,
        status: InvestmentStatus,
    },
    /// accrual only
    Accrue {
        snapshot: AccrualSnapshot,
        progress: AccrualProgress,
    },
    /// accrual reached a boundary that must be settled
    Settle {
        snapshot: AccrualSnapshot,
        progress: AccrualProgress,
        effect: Effect,
    },
}

impl TickPlan {
    pub fn phase(&self) -> Option<CyclePhase> {
        match self {
            TickPlan::Idle { .. } => None,
            TickPlan::Accrue { .. } => Some(CyclePhase::Accruing),
            TickPlan::Settle { effect, .. } => Some(effect.phase()),
        }
    }

    pub fn effect(&self) -> Option<&Effect> {
        match self {
            TickPlan::Settle { effect, .. } => Some(effect),
            _ => None,
        }
    }
}

/// Decides transitions for a single tick.
///
/// `Accruing -> CycleClosing -> Accruing` repeats once per cycle until the term
/// boundary, where `TermClosing -> Completed` ends the loop. At most one boundary
/// is settled per tick and an earlier cycle boundary always closes before the term.
#[derive(Debug, Clone, Copy)]
pub struct CycleStateMachine {
    clock: AccrualClock,
}

impl CycleStateMachine {
    pub fn new(policy: CycleDurationPolicy) -> Self {
        Self {
            clock: AccrualClock::new(policy),
        }
    }

    pub fn clock(&self) -> &AccrualClock {
        &self.clock
    }

    pub fn plan(&self, investment: &Investment, now: DateTime<Utc>) -> Result<TickPlan> {
        if !investment.is_active() {
            return Ok(TickPlan::Idle {
                investment_id: investment.id,
                status: investment.status,
            });
        }

        let snapshot = self.clock.compute_accrual(investment, now)?;
        if snapshot.clock_skew {
            warn!(
                investment_id = %investment.id,
                last_accrual = %investment.last_accrual_time,
                now = %now,
                "clock skew detected, accrual clamped to zero"
            );
        }

        let progress = AccrualProgress {
            investment_id: investment.id,
            base_revision: investment.revision,
            current_cycle_earned: snapshot.cycle_earned,
            last_accrual_time: snapshot.accrued_through,
        };

        let boundary = investment.next_cycle_boundary;
        let effect = if snapshot.cycle_due && boundary < investment.term_end_time {
            Some(Effect::CloseCycle {
                investment_id: investment.id,
                boundary,
                amount: snapshot.cycle_earned,
            })
        } else if snapshot.term_due {
            Some(Effect::CloseTerm {
                investment_id: investment.id,
                term_end: investment.term_end_time,
                principal: investment.principal,
                lifetime_accumulated: investment.lifetime_accumulated,
                open_cycle_amount: snapshot.cycle_earned,
            })
        } else {
            None
        };

        debug!(
            investment_id = %investment.id,
            delta = %snapshot.accrued_delta,
            cycle_earned = %snapshot.cycle_earned,
            cycle_due = snapshot.cycle_due,
            term_due = snapshot.term_due,
            "tick planned"
        );

        Ok(match effect {
            Some(effect) => TickPlan::Settle {
                snapshot,
                progress,
                effect,
            },
            None => TickPlan::Accrue { snapshot, progress },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::DailyRate;
    use crate::types::Currency;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn investment(term: Duration) -> Investment {
        Investment::from_terms(
            Uuid::new_v4(),
            Money::from_major(100_000),
            DailyRate::from_percent(dec!(6.7)),
            Currency::Usdt,
            start(),
            term,
            Duration::days(1),
        )
        .unwrap()
    }

    #[test]
    fn test_terminal_investment_is_idle() {
        let machine = CycleStateMachine::new(CycleDurationPolicy::standard());
        let mut inv = investment(Duration::days(30));
        inv.cancel(start());

        let plan = machine.plan(&inv, start() + Duration::days(3)).unwrap();
        assert!(matches!(plan, TickPlan::Idle { status: InvestmentStatus::Cancelled, .. }));
        assert_eq!(plan.phase(), None);
    }

    #[test]
    fn test_accrue_within_cycle() {
        let machine = CycleStateMachine::new(CycleDurationPolicy::standard());
        let inv = investment(Duration::days(30));

        let plan = machine.plan(&inv, start() + Duration::hours(1)).unwrap();
        match plan {
            TickPlan::Accrue { progress, .. } => {
                assert_eq!(progress.base_revision, inv.revision);
                assert_eq!(progress.last_accrual_time, start() + Duration::hours(1));
                assert_eq!(progress.current_cycle_earned.round_dp(2), Money::from_decimal(dec!(279.17)));
            }
            other => panic!("expected accrual, got {:?}", other),
        }
    }

    #[test]
    fn test_close_cycle_at_boundary() {
        let machine = CycleStateMachine::new(CycleDurationPolicy::standard());
        let inv = investment(Duration::days(30));

        let plan = machine.plan(&inv, inv.next_cycle_boundary).unwrap();
        assert_eq!(plan.phase(), Some(CyclePhase::CycleClosing));
        assert_eq!(
            plan.effect(),
            Some(&Effect::CloseCycle {
                investment_id: inv.id,
                boundary: inv.next_cycle_boundary,
                amount: Money::from_major(6_700),
            })
        );
    }

    #[test]
    fn test_earlier_cycle_closes_before_term() {
        let machine = CycleStateMachine::new(CycleDurationPolicy::standard());
        let inv = investment(Duration::days(3));

        // far past term end with the first cycle still open
        let plan = machine.plan(&inv, start() + Duration::days(10)).unwrap();
        let effect = plan.effect().unwrap();
        assert_eq!(effect.kind(), LedgerEntryKind::CycleRoi);
        assert_eq!(effect.boundary(), start() + Duration::days(1));
    }

    #[test]
    fn test_close_term_with_partial_cycle() {
        let machine = CycleStateMachine::new(CycleDurationPolicy::standard());
        let mut inv = investment(Duration::days(2) + Duration::hours(6));
        // two full cycles already settled
        inv.close_cycle(Money::from_major(6_700), start() + Duration::days(1), Duration::days(1));
        inv.close_cycle(Money::from_major(6_700), start() + Duration::days(2), Duration::days(1));

        let plan = machine.plan(&inv, inv.term_end_time + Duration::hours(1)).unwrap();
        assert_eq!(plan.phase(), Some(CyclePhase::TermClosing));
        assert_eq!(
            plan.effect(),
            Some(&Effect::CloseTerm {
                investment_id: inv.id,
                term_end: inv.term_end_time,
                principal: Money::from_major(100_000),
                lifetime_accumulated: Money::from_major(13_400),
                open_cycle_amount: Money::from_major(1_675),
            })
        );
    }

    #[test]
    fn test_term_aligned_with_cycle_boundary_closes_term() {
        let machine = CycleStateMachine::new(CycleDurationPolicy::standard());
        let inv = investment(Duration::days(1));

        let plan = machine.plan(&inv, inv.next_cycle_boundary).unwrap();
        match plan.effect() {
            Some(Effect::CloseTerm { open_cycle_amount, .. }) => {
                assert_eq!(*open_cycle_amount, Money::from_major(6_700));
            }
            other => panic!("expected term close, got {:?}", other),
        }
    }
}
