//! CLI command handlers, one per file.

mod budgets;
mod config;
mod run;

pub use budgets::run_budgets;
pub use config::run_config;
pub use run::run_job;
