//! Score and order locations.
//!
//! The score is a weighted blend of popularity (rating), source authority,
//! proximity to the job centre and novelty (secondary finds get a boost).

use async_trait::async_trait;

use super::geo::haversine_m;
use crate::pipeline::{
    Coordinates, Location, LocationKind, Stage, StageInput, StageMetrics, StageOutput,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankWeights {
    pub popularity: f64,
    pub authority: f64,
    pub geo: f64,
    pub novelty: f64,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            popularity: 0.30,
            authority: 0.25,
            geo: 0.20,
            novelty: 0.25,
        }
    }
}

#[derive(Debug, Default)]
pub struct Rank {
    weights: RankWeights,
}

impl Rank {
    pub fn new(weights: RankWeights) -> Self {
        Self { weights }
    }
}

#[async_trait]
impl Stage for Rank {
    fn name(&self) -> &str {
        "Rank"
    }

    async fn execute(&self, input: StageInput<'_>) -> anyhow::Result<StageOutput> {
        let seed = &input.job.seed;
        let locations = rank(input.locations, &self.weights, seed.center, seed.radius_km);
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

/// Scores every location into `content_rank` and sorts best first. Ties keep
/// their input order.
pub fn rank(
    locations: &[Location],
    weights: &RankWeights,
    center: Coordinates,
    radius_km: f64,
) -> Vec<Location> {
    let mut out: Vec<Location> = locations
        .iter()
        .map(|loc| {
            let score = weights.popularity * popularity(loc)
                + weights.authority * authority(&loc.source)
                + weights.geo * proximity(loc.coordinates, center, radius_km)
                + weights.novelty * novelty(loc);
            let mut loc = loc.clone();
            loc.content_rank = Some(score);
            loc
        })
        .collect();
    out.sort_by(|a, b| {
        let (sa, sb) = (a.content_rank.unwrap_or(0.0), b.content_rank.unwrap_or(0.0));
        sb.total_cmp(&sa)
    });
    out
}

/// Rating on a 1..5 scale mapped to 0..1; unrated places sit in the middle.
fn popularity(loc: &Location) -> f64 {
    match loc.rating {
        Some(r) => ((r - 1.0) / 4.0).clamp(0.0, 1.0),
        None => 0.5,
    }
}

fn authority(source: &str) -> f64 {
    let s = source.to_ascii_lowercase();
    let boost: f64 = if s.contains("gov") {
        0.35
    } else if s.starts_with("google") {
        0.3
    } else if s.contains("wiki") {
        0.25
    } else if s.contains("osm") || s.contains("overpass") || s.contains("nominatim") {
        0.15
    } else if s == "seed" {
        0.2
    } else {
        0.05
    };
    (0.5 + boost).min(1.0)
}

fn proximity(at: Coordinates, center: Coordinates, radius_km: f64) -> f64 {
    if radius_km <= 0.0 {
        return 0.5;
    }
    let km = haversine_m(at, center) / 1000.0;
    (1.0 - km / radius_km).clamp(0.0, 1.0)
}

fn novelty(loc: &Location) -> f64 {
    match loc.kind {
        LocationKind::Primary => 0.5,
        LocationKind::Secondary => 0.7,
    }
}
