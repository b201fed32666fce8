use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, SchedulerConfig};
use crate::cycle::{CycleStateMachine, Effect, TickPlan};
use crate::errors::{EngineError, Result};
use crate::investment::Investment;
use crate::ledger::{CommitOutcome, InvestmentStore, Reconciler};
use crate::services::{NotificationService, WalletService};
use crate::types::InvestmentId;

/// failure isolated to one investment during a pass
#[derive(Debug)]
pub struct InvestmentFailure {
    pub investment_id: InvestmentId,
    pub error: EngineError,
}

/// what one investment went through within a pass
#[derive(Debug, Default)]
pub struct InvestmentOutcome {
    pub accrual_ticks: u32,
    pub cycles_closed: u32,
    pub terms_closed: u32,
    pub duplicates: u32,
    pub stale_writes: u32,
    pub failure: Option<EngineError>,
}

/// summary of one scheduler pass
#[derive(Debug)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub examined: usize,
    pub accrual_ticks: u32,
    pub cycles_closed: u32,
    pub terms_closed: u32,
    pub duplicates: u32,
    pub stale_writes: u32,
    pub failures: Vec<InvestmentFailure>,
}

impl PassReport {
    fn new(started_at: DateTime<Utc>, examined: usize) -> Self {
        Self {
            started_at,
            examined,
            accrual_ticks: 0,
            cycles_closed: 0,
            terms_closed: 0,
            duplicates: 0,
            stale_writes: 0,
            failures: Vec::new(),
        }
    }

    fn absorb(&mut self, investment_id: InvestmentId, outcome: InvestmentOutcome) {
        self.accrual_ticks += outcome.accrual_ticks;
        self.cycles_closed += outcome.cycles_closed;
        self.terms_closed += outcome.terms_closed;
        self.duplicates += outcome.duplicates;
        self.stale_writes += outcome.stale_writes;
        if let Some(error) = outcome.failure {
            self.failures.push(InvestmentFailure { investment_id, error });
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn settlements(&self) -> u32 {
        self.cycles_closed + self.terms_closed
    }
}

/// Periodic driver: finds due investments and runs accrual, transition and
/// commit for each on a worker pool.
///
/// Investments are independent of each other. A failure is recorded against the
/// one investment and retried on the next pass with the same inputs.
pub struct SchedulerDriver<S: InvestmentStore> {
    store: Arc<S>,
    machine: CycleStateMachine,
    reconciler: Reconciler<S>,
    config: SchedulerConfig,
    pool: ThreadPool,
}

impl<S: InvestmentStore> SchedulerDriver<S> {
    pub fn new(
        store: Arc<S>,
        wallet: Arc<dyn WalletService>,
        notifier: Arc<dyn NotificationService>,
        config: &EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.scheduler.worker_threads)
            .thread_name(|i| format!("roi-worker-{}", i))
            .build()
            .map_err(|e| EngineError::WorkerPool {
                message: e.to_string(),
            })?;

        if config.cycle_policy.is_accelerated() {
            warn!(
                day_length_secs = config.cycle_policy.day_length_secs,
                "accelerated cycle policy in effect"
            );
        }

        Ok(Self {
            store: store.clone(),
            machine: CycleStateMachine::new(config.cycle_policy),
            reconciler: Reconciler::new(
                store,
                wallet,
                notifier,
                config.cycle_policy,
                config.term_payout,
            ),
            config: config.scheduler.clone(),
            pool,
        })
    }

    pub fn reconciler(&self) -> &Reconciler<S> {
        &self.reconciler
    }

    pub fn machine(&self) -> &CycleStateMachine {
        &self.machine
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// one pass at the provider's current time
    pub fn tick(&self, time: &SafeTimeProvider) -> Result<PassReport> {
        self.run_pass(time.now())
    }

    /// Processes every due investment once.
    ///
    /// Only a failure to query the store fails the pass itself.
    pub fn run_pass(&self, now: DateTime<Utc>) -> Result<PassReport> {
        let due = self
            .store
            .find_due(now, self.config.minimum_accrual_granularity())?;

        let outcomes: Vec<(InvestmentId, InvestmentOutcome)> = self.pool.install(|| {
            due.par_iter()
                .map(|investment| (investment.id, self.process_investment(investment, now)))
                .collect()
        });

        let mut report = PassReport::new(now, due.len());
        for (investment_id, outcome) in outcomes {
            report.absorb(investment_id, outcome);
        }

        if report.settlements() > 0 || !report.is_clean() {
            info!(
                examined = report.examined,
                cycles_closed = report.cycles_closed,
                terms_closed = report.terms_closed,
                duplicates = report.duplicates,
                failures = report.failures.len(),
                "scheduler pass complete"
            );
        } else {
            debug!(
                examined = report.examined,
                accrual_ticks = report.accrual_ticks,
                "scheduler pass complete"
            );
        }

        Ok(report)
    }

    /// Runs full ticks for one investment starting from `snapshot`.
    ///
    /// Each tick closes at most one boundary. After a settlement the investment is
    /// reloaded and ticked again while `max_boundaries_per_pass` allows.
    pub fn process_investment(&self, snapshot: &Investment, now: DateTime<Utc>) -> InvestmentOutcome {
        let mut outcome = InvestmentOutcome::default();
        let mut current = snapshot.clone();

        loop {
            match self.run_tick(&current, now, &mut outcome) {
                Ok(true) if outcome.cycles_closed + outcome.terms_closed < self.config.max_boundaries_per_pass => {
                    match self.store.get_investment(current.id) {
                        Ok(reloaded) => current = reloaded,
                        Err(e) => {
                            error!(investment_id = %current.id, error = %e, "reload after settlement failed");
                            outcome.failure = Some(e);
                            break;
                        }
                    }
                }
                Ok(_) => break,
                Err(e) => {
                    error!(investment_id = %current.id, error = %e, retryable = e.is_retryable(), "tick failed");
                    outcome.failure = Some(e);
                    break;
                }
            }
        }

        outcome
    }

    /// returns true when a boundary was settled
    fn run_tick(&self, investment: &Investment, now: DateTime<Utc>, outcome: &mut InvestmentOutcome) -> Result<bool> {
        match self.machine.plan(investment, now)? {
            TickPlan::Idle { .. } => Ok(false),
            TickPlan::Accrue { progress, .. } => {
                match self.reconciler.record_progress(&progress) {
                    Ok(_) => outcome.accrual_ticks += 1,
                    Err(EngineError::StaleInvestment { id, expected, found }) => {
                        warn!(investment_id = %id, expected, found, "stale accrual write dropped");
                        outcome.stale_writes += 1;
                    }
                    Err(EngineError::InvestmentNotActive { .. }) => {}
                    Err(e) => return Err(e),
                }
                Ok(false)
            }
            TickPlan::Settle { effect, .. } => match self.reconciler.commit(&effect, now) {
                Ok(CommitOutcome::Committed(_)) => {
                    match effect {
                        Effect::CloseCycle { .. } => outcome.cycles_closed += 1,
                        Effect::CloseTerm { .. } => outcome.terms_closed += 1,
                    }
                    Ok(true)
                }
                Ok(CommitOutcome::AlreadyCommitted { .. }) => {
                    outcome.duplicates += 1;
                    Ok(false)
                }
                Err(EngineError::InvestmentNotActive { .. }) => Ok(false),
                Err(EngineError::BoundaryMismatch { id, expected, found }) => {
                    warn!(investment_id = %id, %expected, %found, "settlement from stale snapshot dropped");
                    outcome.stale_writes += 1;
                    Ok(false)
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Ticks on the configured interval until `shutdown` is set.
    ///
    /// At least one pass always runs. Returns the number of passes.
    pub fn run_blocking(&self, time: &SafeTimeProvider, shutdown: &AtomicBool) -> Result<u64> {
        let interval = self.config.tick_interval();
        let slice = std::time::Duration::from_millis(100).min(interval);
        let mut passes = 0u64;

        info!(
            interval_secs = self.config.tick_interval_secs,
            workers = self.config.worker_threads,
            "scheduler started"
        );

        loop {
            match self.tick(time) {
                Ok(report) => {
                    for failure in &report.failures {
                        debug!(investment_id = %failure.investment_id, error = %failure.error, "queued for retry");
                    }
                }
                // store outages are retried next interval
                Err(e) => error!(error = %e, "scheduler pass aborted"),
            }
            passes += 1;

            let mut waited = std::time::Duration::ZERO;
            while waited < interval && !shutdown.load(Ordering::SeqCst) {
                std::thread::sleep(slice);
                waited += slice;
            }
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
        }

        info!(passes, "scheduler stopped");
        Ok(passes)
    }
}
