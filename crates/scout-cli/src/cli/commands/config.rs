//! `scout config` – print the resolved configuration as TOML.

use anyhow::Result;
use scout_core::config::ScoutConfig;

pub fn run_config(cfg: &ScoutConfig) -> Result<()> {
    print!("{}", toml::to_string_pretty(cfg)?);
    Ok(())
}
