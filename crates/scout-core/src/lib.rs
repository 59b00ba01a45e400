//! Core engine for scout: per-city collection jobs run as an ordered list of
//! stages under a connector budget and a stopping policy.

pub mod budget;
pub mod config;
pub mod control;
pub mod fetch;
pub mod logging;
pub mod metrics;
pub mod output;
pub mod pipeline;
pub mod retry;
pub mod stages;
pub mod stopping;
