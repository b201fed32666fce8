/// accelerated policy - a whole term in minutes for manual qa
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use roi_accrual_rs::{
    Currency, EngineConfig, InMemoryStore, InMemoryWallet,
    Investment, InvestmentStore, Money, PlanConfig, RecordingNotifier, SafeTimeProvider,
    SchedulerDriver, TermPayout, TimeSource, Uuid,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("=== accelerated policy example ===\n");

    let config = EngineConfig::from_json(
        r#"{
            "cycle_policy": { "day_length_secs": 60 },
            "scheduler": { "tick_interval_secs": 10, "minimum_accrual_granularity_secs": 10 },
            "term_payout": "PrincipalOnly",
            "plans": [
                { "name": "sprint", "daily_rate": "2.5", "term_days": 5, "currency": "USDT" }
            ]
        }"#,
    )?;
    assert_eq!(config.term_payout, TermPayout::PrincipalOnly);
    let plan: PlanConfig = config.plan("sprint").cloned().ok_or("missing plan")?;

    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    ));
    let controller = time.test_control().unwrap();

    let store = Arc::new(InMemoryStore::new());
    let wallet = Arc::new(InMemoryWallet::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let driver = SchedulerDriver::new(store.clone(), wallet.clone(), notifier.clone(), &config)?;

    let owner = Uuid::new_v4();
    let investment = Investment::activate(
        &plan,
        owner,
        Money::from_major(10_000),
        &config.cycle_policy,
        time.now(),
    )?;
    driver.reconciler().register(investment.clone(), time.now())?;

    println!("day length: {}s", config.cycle_policy.day_length_secs);
    println!("term ends: {}", investment.term_end_time.format("%H:%M:%S"));

    // ten-second ticks until the term settles
    let mut ticks = 0;
    while store.get_investment(investment.id)?.is_active() {
        controller.advance(Duration::seconds(10));
        let report = driver.tick(&time)?;
        ticks += 1;
        if report.settlements() > 0 {
            println!(
                "  {} cycles closed {} terms closed {}",
                time.now().format("%H:%M:%S"),
                report.cycles_closed,
                report.terms_closed
            );
        }
    }

    let done = store.get_investment(investment.id)?;
    println!("\nticks: {}", ticks);
    println!("lifetime accumulated: {}", done.lifetime_accumulated);
    println!("wallet balance: {}", wallet.balance(owner, Currency::Usdt));
    println!("notifications: {}", notifier.events().len());

    Ok(())
}
