//! Environment overrides layered on top of the config file.
//!
//! Global keys: `BUDGET_SPLIT_RATIO`, `BUDGET_MAX_API_CALLS`,
//! `BUDGET_MAX_WALL_CLOCK_HOURS`, `EARLY_STOP_MIN_NEW_UNIQUE_RATE`.
//! Per connector: `BUDGET_<ID>_CAPACITY`, `BUDGET_<ID>_REFILL`,
//! `BUDGET_<ID>_PERIOD_SECS` where `<ID>` is [`env_key`] of the connector id.
//! Overrides only touch connectors that already exist in the file.

use std::str::FromStr;

use super::{ConfigError, ScoutConfig};

/// Upper-case a connector id and replace `.`/`-` with `_` ("google.text" -> "GOOGLE_TEXT").
pub fn env_key(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            '.' | '-' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(format!("{key}={raw:?} does not parse")))
}

fn set<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(key) {
        *slot = parse(key, &raw)?;
        tracing::debug!(key, "config override from environment");
    }
    Ok(())
}

/// Apply overrides read through `lookup` (normally `std::env::var`).
pub fn apply_env_overrides(
    cfg: &mut ScoutConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    set(&lookup, "BUDGET_SPLIT_RATIO", &mut cfg.split_ratio)?;
    set(&lookup, "BUDGET_MAX_API_CALLS", &mut cfg.stopping.max_api_calls)?;
    set(
        &lookup,
        "BUDGET_MAX_WALL_CLOCK_HOURS",
        &mut cfg.stopping.max_wall_clock_hours,
    )?;
    set(
        &lookup,
        "EARLY_STOP_MIN_NEW_UNIQUE_RATE",
        &mut cfg.stopping.min_new_unique_rate,
    )?;

    for (id, bucket) in cfg.budgets.iter_mut() {
        let base = format!("BUDGET_{}", env_key(id));
        set(&lookup, &format!("{base}_CAPACITY"), &mut bucket.capacity)?;
        set(&lookup, &format!("{base}_REFILL"), &mut bucket.refill)?;
        set(&lookup, &format!("{base}_PERIOD_SECS"), &mut bucket.period_secs)?;
    }
    Ok(())
}

/// Apply overrides from the process environment.
pub fn apply_process_env(cfg: &mut ScoutConfig) -> Result<(), ConfigError> {
    apply_env_overrides(cfg, |key| std::env::var(key).ok())
}
