//! Stopping policy: decides whether further spend is still justified.
//!
//! Evaluated by the runner before every stage. Three independent guards, each
//! disabled by a zero threshold, checked in a fixed order with the first hit
//! winning: API call cap, wall clock cap, new-unique rate floor.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::StoppingConfig;
use crate::pipeline::Stats;

/// Which guard halted the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    ApiCalls,
    WallClock,
    NewUniqueRate,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::ApiCalls => "api_calls",
            StopReason::WallClock => "wall_clock",
            StopReason::NewUniqueRate => "new_unique_rate",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::ApiCalls => "API call budget reached",
            StopReason::WallClock => "wall clock budget reached",
            StopReason::NewUniqueRate => "new-unique rate below threshold",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StoppingPolicy {
    /// 0 = no cap.
    pub max_api_calls: u64,
    /// Zero = no cap.
    pub max_wall_clock: Duration,
    /// 0.0 = disabled.
    pub min_new_unique_rate: f64,
    pub start_time: Instant,
}

impl StoppingPolicy {
    pub fn new(cfg: &StoppingConfig, start_time: Instant) -> Self {
        Self {
            max_api_calls: cfg.max_api_calls,
            max_wall_clock: cfg.max_wall_clock(),
            min_new_unique_rate: cfg.min_new_unique_rate,
            start_time,
        }
    }

    /// A policy with every guard off; never stops.
    pub fn unlimited(start_time: Instant) -> Self {
        Self {
            max_api_calls: 0,
            max_wall_clock: Duration::ZERO,
            min_new_unique_rate: 0.0,
            start_time,
        }
    }

    /// First guard that fires at `now`, if any.
    pub fn check_at(&self, stats: &Stats, now: Instant) -> Option<StopReason> {
        if self.max_api_calls > 0 && stats.api_calls >= self.max_api_calls {
            return Some(StopReason::ApiCalls);
        }
        if !self.max_wall_clock.is_zero()
            && now.saturating_duration_since(self.start_time) >= self.max_wall_clock
        {
            return Some(StopReason::WallClock);
        }
        if self.min_new_unique_rate > 0.0 {
            if let Some(rate) = stats.new_unique_rate() {
                if rate < self.min_new_unique_rate {
                    return Some(StopReason::NewUniqueRate);
                }
            }
        }
        None
    }

    pub fn check(&self, stats: &Stats) -> Option<StopReason> {
        self.check_at(stats, Instant::now())
    }

    pub fn should_stop(&self, stats: &Stats) -> bool {
        self.check(stats).is_some()
    }
}
