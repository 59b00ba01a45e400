//! Collapse duplicate locations and normalise the survivors.
//!
//! Two locations are the same place when they share a source identity, or
//! when they sit within [`MERGE_RADIUS_M`] of each other and their names are
//! more similar than [`NAME_SIMILARITY_THRESHOLD`]. The first occurrence wins.

use std::collections::HashSet;

use async_trait::async_trait;

use super::geo::haversine_m;
use crate::pipeline::{Location, Stage, StageInput, StageMetrics, StageOutput};

pub const MERGE_RADIUS_M: f64 = 60.0;
pub const NAME_SIMILARITY_THRESHOLD: f64 = 0.8;
/// Canonical locations never report less confidence than this.
pub const MIN_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Default)]
pub struct DedupeCanonicalize;

#[async_trait]
impl Stage for DedupeCanonicalize {
    fn name(&self) -> &str {
        "DedupeCanonicalize"
    }

    async fn execute(&self, input: StageInput<'_>) -> anyhow::Result<StageOutput> {
        let locations = dedupe(input.locations);
        tracing::info!(
            correlation_id = input.correlation_id,
            "dedupe kept {} of {} locations",
            locations.len(),
            input.locations.len()
        );
        let items_found = locations.len() as u64;
        Ok(StageOutput {
            locations,
            urls: Vec::new(),
            metrics: StageMetrics {
                items_found,
                ..StageMetrics::default()
            },
        })
    }
}

pub fn dedupe(locations: &[Location]) -> Vec<Location> {
    let mut identities = HashSet::new();
    let mut kept: Vec<Location> = Vec::with_capacity(locations.len());
    for loc in locations {
        if !identities.insert(loc.identity()) {
            continue;
        }
        let near_duplicate = kept.iter().any(|k| {
            haversine_m(k.coordinates, loc.coordinates) <= MERGE_RADIUS_M
                && name_similarity(&k.name, &loc.name) > NAME_SIMILARITY_THRESHOLD
        });
        if near_duplicate {
            continue;
        }
        kept.push(canonicalize(loc));
    }
    kept
}

fn canonicalize(loc: &Location) -> Location {
    let mut out = loc.clone();
    out.name = loc.name.split_whitespace().collect::<Vec<_>>().join(" ");
    out.category = loc.category.trim().to_lowercase();
    out.confidence = loc.confidence.max(MIN_CONFIDENCE).min(1.0);
    out
}

/// 1.0 for equal names, 0.85 when one contains the other, else the Jaccard
/// overlap of their word sets. Case-insensitive.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a.contains(&b) || b.contains(&a) {
        return 0.85;
    }
    let wa: HashSet<&str> = a.split_whitespace().collect();
    let wb: HashSet<&str> = b.split_whitespace().collect();
    let union = wa.union(&wb).count();
    if union == 0 {
        return 0.0;
    }
    wa.intersection(&wb).count() as f64 / union as f64
}
