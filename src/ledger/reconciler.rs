use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CycleDurationPolicy;
use crate::cycle::Effect;
use crate::decimal::Money;
use crate::errors::{EngineError, Result};
use crate::events::Event;
use crate::investment::{AccrualProgress, Investment};
use crate::ledger::{InvestmentStore, LedgerEntry, LedgerInsert, LedgerKey};
use crate::services::{NotificationService, WalletService};
use crate::types::{InvestmentId, LedgerEntryKind, TermPayout, UserId};

/// outcome of committing an effect
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(CommitReceipt),
    /// the boundary was settled before; nothing was applied
    AlreadyCommitted { key: LedgerKey },
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed(_))
    }
}

/// what a successful commit applied
#[derive(Debug, Clone, PartialEq)]
pub struct CommitReceipt {
    pub entries: Vec<LedgerEntry>,
    pub wallet_credit: Money,
    pub investment: Investment,
}

/// read-only comparison of an investment's totals against its ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerAudit {
    pub investment_id: InvestmentId,
    pub lifetime_accumulated: Money,
    pub ledger_cycle_total: Money,
    pub cycles_settled: u32,
    pub cycle_entries: usize,
    pub term_settled: bool,
    pub consistent: bool,
}

/// Applies effects exactly once per ledger key.
///
/// The ledger insert comes first inside the store transaction; the investment
/// update and the wallet credit only follow a successful insert, and any error
/// rolls all of it back. Notifications go out after the transaction commits and
/// never undo it.
pub struct Reconciler<S: InvestmentStore> {
    store: Arc<S>,
    wallet: Arc<dyn WalletService>,
    notifier: Arc<dyn NotificationService>,
    policy: CycleDurationPolicy,
    term_payout: TermPayout,
}

impl<S: InvestmentStore> Reconciler<S> {
    pub fn new(
        store: Arc<S>,
        wallet: Arc<dyn WalletService>,
        notifier: Arc<dyn NotificationService>,
        policy: CycleDurationPolicy,
        term_payout: TermPayout,
    ) -> Self {
        Self {
            store,
            wallet,
            notifier,
            policy,
            term_payout,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// persist a newly activated investment
    pub fn register(&self, investment: Investment, now: DateTime<Utc>) -> Result<()> {
        let event = Event::InvestmentActivated {
            investment_id: investment.id,
            principal: investment.principal,
            currency: investment.currency,
            term_end: investment.term_end_time,
            timestamp: now,
        };
        let owner = investment.owner_id;

        info!(
            investment_id = %investment.id,
            principal = %investment.principal,
            rate = %investment.daily_rate,
            "investment activated"
        );
        self.store.insert_investment(investment)?;
        self.dispatch(owner, &event);
        Ok(())
    }

    /// write accrual progress; fails with `StaleInvestment` if the investment moved on
    pub fn record_progress(&self, progress: &AccrualProgress) -> Result<Investment> {
        self.store.save_progress(progress)
    }

    pub fn commit(&self, effect: &Effect, now: DateTime<Utc>) -> Result<CommitOutcome> {
        match effect {
            Effect::CloseCycle {
                investment_id,
                boundary,
                amount,
            } => self.commit_cycle(*investment_id, *boundary, *amount, now),
            Effect::CloseTerm {
                investment_id,
                term_end,
                open_cycle_amount,
                ..
            } => self.commit_term(*investment_id, *term_end, *open_cycle_amount, now),
        }
    }

    fn commit_cycle(
        &self,
        investment_id: InvestmentId,
        boundary: DateTime<Utc>,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Result<CommitOutcome> {
        let key = LedgerKey {
            investment_id,
            boundary,
            kind: LedgerEntryKind::CycleRoi,
        };

        let receipt = self.store.transaction(|tx| {
            let mut investment = tx.investment(investment_id)?;

            let entry = LedgerEntry::new(&investment, boundary, amount, LedgerEntryKind::CycleRoi, now);
            if tx.insert_ledger_entry(entry.clone())? == LedgerInsert::Conflict {
                return Ok(None);
            }

            ensure_active(&investment)?;
            if investment.next_cycle_boundary != boundary {
                return Err(EngineError::BoundaryMismatch {
                    id: investment_id,
                    expected: boundary,
                    found: investment.next_cycle_boundary,
                });
            }

            investment.close_cycle(amount, boundary, self.policy.day_length());
            tx.put_investment(investment.clone())?;
            self.credit_wallet(&investment, amount)?;

            Ok(Some(CommitReceipt {
                entries: vec![entry],
                wallet_credit: amount,
                investment,
            }))
        })?;

        let Some(receipt) = receipt else {
            debug!(investment_id = %investment_id, boundary = %boundary, "cycle already settled");
            return Ok(CommitOutcome::AlreadyCommitted { key });
        };

        info!(
            investment_id = %investment_id,
            boundary = %boundary,
            amount = %amount,
            lifetime = %receipt.investment.lifetime_accumulated,
            "cycle settled"
        );
        self.dispatch(
            receipt.investment.owner_id,
            &Event::CycleSettled {
                investment_id,
                boundary,
                amount,
                lifetime_accumulated: receipt.investment.lifetime_accumulated,
                currency: receipt.investment.currency,
                timestamp: now,
            },
        );

        Ok(CommitOutcome::Committed(receipt))
    }

    fn commit_term(
        &self,
        investment_id: InvestmentId,
        term_end: DateTime<Utc>,
        open_cycle_amount: Money,
        now: DateTime<Utc>,
    ) -> Result<CommitOutcome> {
        let key = LedgerKey {
            investment_id,
            boundary: term_end,
            kind: LedgerEntryKind::TermCompletion,
        };

        let receipt = self.store.transaction(|tx| {
            let mut investment = tx.investment(investment_id)?;

            let mut settled = investment.clone();
            settled.close_term(open_cycle_amount, now);
            let payout = settled.term_payout(self.term_payout);

            let term_entry = LedgerEntry::new(&investment, term_end, payout, LedgerEntryKind::TermCompletion, now);
            if tx.insert_ledger_entry(term_entry.clone())? == LedgerInsert::Conflict {
                return Ok(None);
            }

            ensure_active(&investment)?;
            if investment.term_end_time != term_end || investment.next_cycle_boundary < term_end {
                return Err(EngineError::BoundaryMismatch {
                    id: investment_id,
                    expected: term_end,
                    found: investment.next_cycle_boundary,
                });
            }

            let mut entries = Vec::with_capacity(2);
            if open_cycle_amount.is_positive() {
                let cycle_entry = LedgerEntry::new(
                    &investment,
                    term_end,
                    open_cycle_amount,
                    LedgerEntryKind::CycleRoi,
                    now,
                );
                if tx.insert_ledger_entry(cycle_entry.clone())? == LedgerInsert::Conflict {
                    return Err(EngineError::LedgerConflict {
                        investment_id,
                        boundary: term_end,
                        kind: LedgerEntryKind::CycleRoi,
                    });
                }
                entries.push(cycle_entry);
            }
            entries.push(term_entry);

            // the accumulated payout already carries the final cycle
            let wallet_credit = match self.term_payout {
                TermPayout::PrincipalAndAccumulated => payout,
                TermPayout::PrincipalOnly => payout + open_cycle_amount,
            };

            investment.close_term(open_cycle_amount, now);
            tx.put_investment(investment.clone())?;
            self.credit_wallet(&investment, wallet_credit)?;

            Ok(Some(CommitReceipt {
                entries,
                wallet_credit,
                investment,
            }))
        })?;

        let Some(receipt) = receipt else {
            debug!(investment_id = %investment_id, term_end = %term_end, "term already settled");
            return Ok(CommitOutcome::AlreadyCommitted { key });
        };

        let investment = &receipt.investment;
        info!(
            investment_id = %investment_id,
            final_cycle = %open_cycle_amount,
            payout = %receipt.wallet_credit,
            lifetime = %investment.lifetime_accumulated,
            "term completed"
        );
        if open_cycle_amount.is_positive() {
            self.dispatch(
                investment.owner_id,
                &Event::CycleSettled {
                    investment_id,
                    boundary: term_end,
                    amount: open_cycle_amount,
                    lifetime_accumulated: investment.lifetime_accumulated,
                    currency: investment.currency,
                    timestamp: now,
                },
            );
        }
        self.dispatch(
            investment.owner_id,
            &Event::TermCompleted {
                investment_id,
                principal: investment.principal,
                lifetime_accumulated: investment.lifetime_accumulated,
                payout: receipt.wallet_credit,
                currency: investment.currency,
                timestamp: now,
            },
        );

        Ok(CommitOutcome::Committed(receipt))
    }

    /// stop an active investment; no payout is made
    pub fn cancel(&self, investment_id: InvestmentId, reason: &str, now: DateTime<Utc>) -> Result<Investment> {
        let investment = self.store.transaction(|tx| {
            let mut investment = tx.investment(investment_id)?;
            ensure_active(&investment)?;
            investment.cancel(now);
            tx.put_investment(investment.clone())?;
            Ok(investment)
        })?;

        info!(investment_id = %investment_id, reason, "investment cancelled");
        self.dispatch(
            investment.owner_id,
            &Event::InvestmentCancelled {
                investment_id,
                reason: reason.to_string(),
                timestamp: now,
            },
        );
        Ok(investment)
    }

    /// compare the lifetime total with the committed cycle entries
    pub fn audit(&self, investment_id: InvestmentId) -> Result<LedgerAudit> {
        let investment = self.store.get_investment(investment_id)?;
        let entries = self.store.ledger_entries(investment_id)?;

        let cycle_amounts: Vec<Money> = entries
            .iter()
            .filter(|e| e.kind == LedgerEntryKind::CycleRoi)
            .map(|e| e.amount)
            .collect();
        let ledger_cycle_total: Money = cycle_amounts.iter().sum();
        let term_settled = entries.iter().any(|e| e.kind == LedgerEntryKind::TermCompletion);

        let consistent = ledger_cycle_total == investment.lifetime_accumulated
            && cycle_amounts.len() == investment.cycles_settled as usize;
        if !consistent {
            warn!(
                investment_id = %investment_id,
                lifetime = %investment.lifetime_accumulated,
                ledger = %ledger_cycle_total,
                "lifetime total disagrees with ledger"
            );
        }

        Ok(LedgerAudit {
            investment_id,
            lifetime_accumulated: investment.lifetime_accumulated,
            ledger_cycle_total,
            cycles_settled: investment.cycles_settled,
            cycle_entries: cycle_amounts.len(),
            term_settled,
            consistent,
        })
    }

    fn credit_wallet(&self, investment: &Investment, amount: Money) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        self.wallet
            .credit(investment.owner_id, investment.currency, amount)
            .map_err(|e| EngineError::WalletCreditFailed {
                investment_id: investment.id,
                amount,
                reason: e.to_string(),
            })
    }

    fn dispatch(&self, user_id: UserId, event: &Event) {
        if let Err(e) = self.notifier.notify(user_id, event.kind(), event) {
            warn!(
                investment_id = %event.investment_id(),
                kind = ?event.kind(),
                error = %e,
                "notification dropped"
            );
        }
    }
}

fn ensure_active(investment: &Investment) -> Result<()> {
    if !investment.is_active() {
        return Err(EngineError::InvestmentNotActive {
            id: investment.id,
            status: investment.status,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::{CycleStateMachine, TickPlan};
    use crate::decimal::DailyRate;
    use crate::events::EventKind;
    use crate::ledger::InMemoryStore;
    use crate::services::{InMemoryWallet, RecordingNotifier};
    use crate::types::{Currency, InvestmentStatus};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct Harness {
        store: Arc<InMemoryStore>,
        wallet: Arc<InMemoryWallet>,
        notifier: Arc<RecordingNotifier>,
        reconciler: Reconciler<InMemoryStore>,
        machine: CycleStateMachine,
    }

    fn harness(term_payout: TermPayout) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let wallet = Arc::new(InMemoryWallet::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let policy = CycleDurationPolicy::standard();
        let reconciler = Reconciler::new(
            store.clone(),
            wallet.clone(),
            notifier.clone(),
            policy,
            term_payout,
        );
        Harness {
            store,
            wallet,
            notifier,
            reconciler,
            machine: CycleStateMachine::new(policy),
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn register(h: &Harness, term: Duration) -> Investment {
        let inv = Investment::from_terms(
            Uuid::new_v4(),
            Money::from_major(100_000),
            DailyRate::from_percent(dec!(6.7)),
            Currency::Usdt,
            start(),
            term,
            Duration::days(1),
        )
        .unwrap();
        h.reconciler.register(inv.clone(), start()).unwrap();
        inv
    }

    fn effect_at(h: &Harness, inv: &Investment, now: DateTime<Utc>) -> Effect {
        match h.machine.plan(inv, now).unwrap() {
            TickPlan::Settle { effect, .. } => effect,
            other => panic!("expected settlement, got {:?}", other),
        }
    }

    #[test]
    fn test_commit_cycle_applies_everything() {
        let h = harness(TermPayout::default());
        let inv = register(&h, Duration::days(30));
        let boundary = inv.next_cycle_boundary;

        let effect = effect_at(&h, &inv, boundary);
        let outcome = h.reconciler.commit(&effect, boundary).unwrap();
        assert!(outcome.is_committed());

        let stored = h.store.get_investment(inv.id).unwrap();
        assert!(stored.current_cycle_earned.is_zero());
        assert_eq!(stored.lifetime_accumulated, Money::from_major(6_700));
        assert_eq!(stored.next_cycle_boundary, boundary + Duration::days(1));
        assert_eq!(stored.last_accrual_time, boundary);

        let entries = h.store.ledger_entries(inv.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, Money::from_major(6_700));
        assert_eq!(entries[0].boundary, boundary);

        assert_eq!(h.wallet.balance(inv.owner_id, Currency::Usdt), Money::from_major(6_700));
        assert_eq!(h.notifier.count(inv.id, EventKind::CycleSettled), 1);
    }

    #[test]
    fn test_duplicate_commit_is_noop() {
        let h = harness(TermPayout::default());
        let inv = register(&h, Duration::days(30));
        let effect = effect_at(&h, &inv, inv.next_cycle_boundary);

        assert!(h.reconciler.commit(&effect, inv.next_cycle_boundary).unwrap().is_committed());
        let second = h.reconciler.commit(&effect, inv.next_cycle_boundary).unwrap();

        assert!(matches!(second, CommitOutcome::AlreadyCommitted { .. }));
        assert_eq!(h.wallet.credit_count(), 1);
        assert_eq!(h.store.ledger_entries(inv.id).unwrap().len(), 1);
        assert_eq!(
            h.store.get_investment(inv.id).unwrap().lifetime_accumulated,
            Money::from_major(6_700)
        );
    }

    #[test]
    fn test_wallet_failure_rolls_back() {
        let h = harness(TermPayout::default());
        let inv = register(&h, Duration::days(30));
        let effect = effect_at(&h, &inv, inv.next_cycle_boundary);

        h.wallet.set_failing(true);
        let result = h.reconciler.commit(&effect, inv.next_cycle_boundary);
        assert!(matches!(result, Err(EngineError::WalletCreditFailed { .. })));
        assert!(result.unwrap_err().is_retryable());

        // nothing advanced, nothing recorded
        assert_eq!(h.store.get_investment(inv.id).unwrap(), inv);
        assert!(h.store.ledger_entries(inv.id).unwrap().is_empty());
        assert_eq!(h.notifier.count(inv.id, EventKind::CycleSettled), 0);

        // identical retry succeeds once the wallet is back
        h.wallet.set_failing(false);
        assert!(h.reconciler.commit(&effect, inv.next_cycle_boundary).unwrap().is_committed());
        assert_eq!(h.wallet.credit_count(), 1);
    }

    #[test]
    fn test_notification_failure_keeps_commit() {
        let h = harness(TermPayout::default());
        let inv = register(&h, Duration::days(30));
        let effect = effect_at(&h, &inv, inv.next_cycle_boundary);

        h.notifier.set_failing(true);
        assert!(h.reconciler.commit(&effect, inv.next_cycle_boundary).unwrap().is_committed());
        assert_eq!(h.store.ledger_entries(inv.id).unwrap().len(), 1);
        assert_eq!(h.wallet.credit_count(), 1);
    }

    #[test]
    fn test_term_closes_partial_cycle_first() {
        let h = harness(TermPayout::PrincipalAndAccumulated);
        // term ends part way through the first cycle
        let inv = register(&h, Duration::seconds(15_474));
        let now = inv.term_end_time + Duration::minutes(2);

        let effect = effect_at(&h, &inv, now);
        let open = match &effect {
            Effect::CloseTerm { open_cycle_amount, .. } => *open_cycle_amount,
            other => panic!("expected term close, got {:?}", other),
        };

        let outcome = h.reconciler.commit(&effect, now).unwrap();
        let receipt = match outcome {
            CommitOutcome::Committed(receipt) => receipt,
            other => panic!("expected commit, got {:?}", other),
        };

        assert_eq!(receipt.entries.len(), 2);
        assert_eq!(receipt.investment.status, InvestmentStatus::Completed);
        assert_eq!(receipt.investment.lifetime_accumulated, open);
        assert_eq!(receipt.wallet_credit, Money::from_major(100_000) + open);

        let audit = h.reconciler.audit(inv.id).unwrap();
        assert!(audit.consistent);
        assert!(audit.term_settled);
        assert_eq!(audit.ledger_cycle_total, open);

        assert_eq!(h.notifier.count(inv.id, EventKind::TermCompleted), 1);
        assert_eq!(h.notifier.count(inv.id, EventKind::CycleSettled), 1);

        // replaying the term effect pays nothing further
        assert!(matches!(
            h.reconciler.commit(&effect, now).unwrap(),
            CommitOutcome::AlreadyCommitted { .. }
        ));
        assert_eq!(h.wallet.credit_count(), 1);
    }

    #[test]
    fn test_wallet_failure_rolls_back_term() {
        let h = harness(TermPayout::default());
        let inv = register(&h, Duration::days(1) + Duration::hours(6));
        let boundary = inv.next_cycle_boundary;
        let first = effect_at(&h, &inv, boundary);
        h.reconciler.commit(&first, boundary).unwrap();

        let now = inv.term_end_time + Duration::minutes(1);
        let stored = h.store.get_investment(inv.id).unwrap();
        let effect = effect_at(&h, &stored, now);
        assert_eq!(effect.kind(), LedgerEntryKind::TermCompletion);

        h.wallet.set_failing(true);
        let result = h.reconciler.commit(&effect, now);
        assert!(matches!(result, Err(EngineError::WalletCreditFailed { .. })));

        // neither the partial cycle nor the term entry survived
        assert_eq!(h.store.get_investment(inv.id).unwrap(), stored);
        assert_eq!(h.store.get_investment(inv.id).unwrap().status, InvestmentStatus::Active);
        assert_eq!(h.store.ledger_entries(inv.id).unwrap().len(), 1);
        assert_eq!(h.wallet.credit_count(), 1);
        assert_eq!(h.notifier.count(inv.id, EventKind::TermCompleted), 0);

        h.wallet.set_failing(false);
        assert!(h.reconciler.commit(&effect, now).unwrap().is_committed());
        assert!(matches!(
            h.reconciler.commit(&effect, now).unwrap(),
            CommitOutcome::AlreadyCommitted { .. }
        ));

        let completed = h.store.get_investment(inv.id).unwrap();
        assert_eq!(completed.status, InvestmentStatus::Completed);
        assert_eq!(h.store.ledger_entries(inv.id).unwrap().len(), 3);
        assert_eq!(h.wallet.credit_count(), 2);
        assert_eq!(h.notifier.count(inv.id, EventKind::TermCompleted), 1);
        assert!(h.reconciler.audit(inv.id).unwrap().consistent);
    }

    #[test]
    fn test_principal_only_payout() {
        let h = harness(TermPayout::PrincipalOnly);
        let inv = register(&h, Duration::days(1));
        let now = inv.term_end_time;

        let effect = effect_at(&h, &inv, now);
        let outcome = h.reconciler.commit(&effect, now).unwrap();

        match outcome {
            CommitOutcome::Committed(receipt) => {
                assert_eq!(receipt.wallet_credit, Money::from_major(106_700));
                assert_eq!(receipt.investment.lifetime_accumulated, Money::from_major(6_700));
                assert_eq!(receipt.entries[1].amount, Money::from_major(100_000));
            }
            other => panic!("expected commit, got {:?}", other),
        }

        let credited: Vec<Money> = h.wallet.credits().iter().map(|c| c.amount).collect();
        // principal plus the final cycle, earlier cycles having been paid as they closed
        assert_eq!(credited, vec![Money::from_major(106_700)]);
    }

    #[test]
    fn test_cancel_blocks_pending_effect() {
        let h = harness(TermPayout::default());
        let inv = register(&h, Duration::days(30));
        let effect = effect_at(&h, &inv, inv.next_cycle_boundary);

        let cancelled = h.reconciler.cancel(inv.id, "requested by user", start()).unwrap();
        assert_eq!(cancelled.status, InvestmentStatus::Cancelled);
        assert_eq!(h.notifier.count(inv.id, EventKind::InvestmentCancelled), 1);

        assert!(matches!(
            h.reconciler.commit(&effect, inv.next_cycle_boundary),
            Err(EngineError::InvestmentNotActive { .. })
        ));
        assert!(h.store.ledger_entries(inv.id).unwrap().is_empty());
        assert_eq!(h.wallet.credit_count(), 0);

        // cancelling twice is rejected
        assert!(h.reconciler.cancel(inv.id, "again", start()).is_err());
    }

    #[test]
    fn test_audit_detects_drift() {
        let h = harness(TermPayout::default());
        let inv = register(&h, Duration::days(30));
        let effect = effect_at(&h, &inv, inv.next_cycle_boundary);
        h.reconciler.commit(&effect, inv.next_cycle_boundary).unwrap();

        assert!(h.reconciler.audit(inv.id).unwrap().consistent);

        // corrupt the lifetime total behind the reconciler's back
        h.store
            .transaction(|tx| {
                let mut stored = tx.investment(inv.id)?;
                stored.lifetime_accumulated = stored.lifetime_accumulated + Money::from_major(1);
                tx.put_investment(stored)
            })
            .unwrap();

        let audit = h.reconciler.audit(inv.id).unwrap();
        assert!(!audit.consistent);
        assert_eq!(audit.ledger_cycle_total, Money::from_major(6_700));
    }
}
