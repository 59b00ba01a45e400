//! Built-in stages and the default pipeline.

mod dedupe;
mod fetch;
mod geo;
mod geocode;
mod rank;
mod seed;

use std::sync::Arc;
use std::time::Instant;

pub use dedupe::{name_similarity, DedupeCanonicalize, MERGE_RADIUS_M, NAME_SIMILARITY_THRESHOLD};
pub use fetch::WebFetch;
pub use geo::haversine_m;
pub use geocode::{GeocodeValidate, GEOCODED_CONFIDENCE};
pub use rank::{Rank, RankWeights};
pub use seed::SeedPrimaries;

use crate::budget::BudgetGuard;
use crate::config::ScoutConfig;
use crate::metrics::MetricsSink;
use crate::pipeline::PipelineRunner;
use crate::stopping::StoppingPolicy;

/// SeedPrimaries, WebFetch, GeocodeValidate, DedupeCanonicalize, Rank;
/// stopping policy from `cfg`.
pub fn default_pipeline(
    cfg: &ScoutConfig,
    guard: Arc<BudgetGuard>,
    metrics: Arc<dyn MetricsSink>,
    started: Instant,
) -> PipelineRunner {
    PipelineRunner::new(StoppingPolicy::new(&cfg.stopping, started))
        .with_metrics(Arc::clone(&metrics))
        .with_stage(SeedPrimaries)
        .with_stage(WebFetch::new(Arc::clone(&guard), cfg).with_metrics(Arc::clone(&metrics)))
        .with_stage(GeocodeValidate::new(guard, cfg).with_metrics(metrics))
        .with_stage(DedupeCanonicalize)
        .with_stage(Rank::default())
}
