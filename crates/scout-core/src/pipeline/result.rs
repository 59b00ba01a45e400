use serde::Serialize;
use std::collections::BTreeMap;

use super::stats::Stats;
use super::types::{Location, StageMetrics, WebSource};
use crate::stopping::StopReason;

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every stage ran.
    Completed,
    /// The stopping policy fired before `next_stage` ran.
    Halted {
        reason: StopReason,
        next_stage: String,
    },
}

impl RunOutcome {
    pub fn is_halted(&self) -> bool {
        matches!(self, RunOutcome::Halted { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub total_locations: usize,
    pub primary_count: usize,
    pub secondary_count: usize,
    pub total_urls: usize,
    /// Distinct `source` values seen across all stage outputs, sorted.
    pub sources_used: Vec<String>,
    pub processing_time_ms: u64,
    pub api_calls: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub job_id: String,
    pub city: String,
    pub correlation_id: String,
    pub completed_at_ms: u64,
    pub outcome: RunOutcome,
    pub summary: Summary,
    pub stats: Stats,
    pub stage_metrics: BTreeMap<String, StageMetrics>,
    pub locations: Vec<Location>,
    pub urls: Vec<WebSource>,
}
