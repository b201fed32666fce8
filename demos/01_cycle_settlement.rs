/// cycle settlement - hourly ticks, daily cycles and the end of term
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use roi_accrual_rs::{
    Currency, DailyRate, EngineConfig, InMemoryStore, InMemoryWallet, Investment, InvestmentStore,
    Money, RecordingNotifier, SafeTimeProvider, SchedulerDriver, TimeSource, Uuid,
};
use rust_decimal_macros::dec;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== cycle settlement example ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    ));
    let controller = time.test_control().unwrap();

    let store = Arc::new(InMemoryStore::new());
    let wallet = Arc::new(InMemoryWallet::new());
    let config = EngineConfig::default();
    let driver = SchedulerDriver::new(
        store.clone(),
        wallet.clone(),
        Arc::new(RecordingNotifier::new()),
        &config,
    )?;

    // 2,000 USDT at 5% a day for two and a half days
    let owner = Uuid::new_v4();
    let investment = Investment::from_terms(
        owner,
        Money::from_major(2_000),
        DailyRate::from_percent(dec!(5)),
        Currency::Usdt,
        time.now(),
        Duration::days(2) + Duration::hours(12),
        config.cycle_policy.day_length(),
    )?;
    driver.reconciler().register(investment.clone(), time.now())?;
    println!("activated: term ends {}", investment.term_end_time.format("%Y-%m-%d %H:%M"));

    // 1. hourly accrual
    println!("\n1. accrual");
    println!("----------");
    for _ in 0..6 {
        controller.advance(Duration::hours(1));
        driver.tick(&time)?;
    }
    let current = store.get_investment(investment.id)?;
    println!("  {}: current cycle {}", time.now().format("%H:%M"), current.current_cycle_earned.round_dp(2));

    // 2. daily cycles
    println!("\n2. cycle boundaries");
    println!("-------------------");
    for _ in 0..42 {
        controller.advance(Duration::hours(1));
        let report = driver.tick(&time)?;
        if report.cycles_closed > 0 {
            let current = store.get_investment(investment.id)?;
            println!(
                "  {}: cycle closed, lifetime {}",
                time.now().format("%Y-%m-%d %H:%M"),
                current.lifetime_accumulated
            );
        }
    }

    // 3. end of term
    println!("\n3. end of term");
    println!("--------------");
    controller.advance(Duration::days(1));
    let report = driver.tick(&time)?;
    let current = store.get_investment(investment.id)?;
    println!("  terms closed: {}", report.terms_closed);
    println!("  status: {:?}", current.status);
    println!("  lifetime accumulated: {}", current.lifetime_accumulated);
    println!("  wallet balance: {}", wallet.balance(owner, Currency::Usdt));

    // replaying the same pass changes nothing
    let replay = driver.run_pass(time.now())?;
    println!("\n  replay examined {} investments", replay.examined);

    let audit = driver.reconciler().audit(investment.id)?;
    println!("  ledger consistent: {}", audit.consistent);

    Ok(())
}
