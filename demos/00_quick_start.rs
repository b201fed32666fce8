/// quick start - minimal example to get started
use std::sync::Arc;

use roi_accrual_rs::{
    Currency, DailyRate, EngineConfig, InMemoryStore, InMemoryWallet, Investment, InvestmentStore,
    InvestmentView, Money, PlanConfig, RecordingNotifier, SchedulerDriver, Uuid,
};
use rust_decimal_macros::dec;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let plan = PlanConfig::new("gold", DailyRate::from_percent(dec!(6.7)), 30, Currency::Usdt);
    let config = EngineConfig {
        plans: vec![plan.clone()],
        ..EngineConfig::default()
    };

    let store = Arc::new(InMemoryStore::new());
    let driver = SchedulerDriver::new(
        store.clone(),
        Arc::new(InMemoryWallet::new()),
        Arc::new(RecordingNotifier::new()),
        &config,
    )?;

    // invest 100,000 USDT at 6.7% a day
    let start = chrono::Utc::now();
    let investment = Investment::activate(
        &plan,
        Uuid::new_v4(),
        Money::from_major(100_000),
        &config.cycle_policy,
        start,
    )?;
    driver.reconciler().register(investment.clone(), start)?;

    // one scheduler pass an hour later
    driver.run_pass(start + chrono::Duration::hours(1))?;

    // print current state
    let current = store.get_investment(investment.id)?;
    println!("{}", InvestmentView::from_investment(&current, driver.machine().clock())?.to_json_pretty()?);

    Ok(())
}
