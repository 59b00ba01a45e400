//! `scout budgets` – show connector buckets and the split they feed.

use anyhow::Result;
use scout_core::budget::{BudgetGuard, Split};
use scout_core::config::ScoutConfig;
use scout_core::metrics::NoopMetrics;
use std::sync::Arc;

pub fn run_budgets(cfg: &ScoutConfig) -> Result<()> {
    let guard = BudgetGuard::from_config(cfg, Arc::new(NoopMetrics))?;
    println!(
        "{:<20} {:>10} {:>10} {:>12}",
        "CONNECTOR", "CAPACITY", "REFILL", "PERIOD"
    );
    for (id, b) in &cfg.budgets {
        println!(
            "{:<20} {:>10} {:>10} {:>11}s",
            id, b.capacity, b.refill, b.period_secs
        );
    }
    let primary = guard.quota(Split::Primary);
    let secondary = guard.quota(Split::Secondary);
    println!();
    println!(
        "split {:.0}/{:.0}: primary {} tokens, secondary {} tokens",
        cfg.split_ratio * 100.0,
        (1.0 - cfg.split_ratio) * 100.0,
        primary.quota,
        secondary.quota
    );
    Ok(())
}
