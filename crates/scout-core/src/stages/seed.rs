//! Turn the job's seed into primary locations and starting URLs.

use async_trait::async_trait;

use super::geo::haversine_m;
use crate::pipeline::{
    Location, LocationKind, SeedPlace, Stage, StageInput, StageMetrics, StageOutput, WebSource,
};

/// Confidence given to places the caller supplied without one.
const SEED_CONFIDENCE: f64 = 0.95;

#[derive(Debug, Default)]
pub struct SeedPrimaries;

#[async_trait]
impl Stage for SeedPrimaries {
    fn name(&self) -> &str {
        "SeedPrimaries"
    }

    async fn execute(&self, input: StageInput<'_>) -> anyhow::Result<StageOutput> {
        let seed = &input.job.seed;
        let radius_m = seed.radius_km * 1000.0;

        let mut locations = Vec::new();
        for place in &seed.places {
            let coords = crate::pipeline::Coordinates::new(place.lat, place.lng);
            if radius_m > 0.0 && haversine_m(seed.center, coords) > radius_m {
                tracing::debug!("seed place {:?} outside {} km radius", place.name, seed.radius_km);
                continue;
            }
            locations.push(to_location(locations.len() + 1, place));
        }

        let mut urls: Vec<WebSource> = Vec::new();
        for raw in &seed.sources {
            match web_source(raw) {
                Some(src) if !urls.iter().any(|u| u.url == src.url) => urls.push(src),
                Some(_) => {}
                None => tracing::warn!("skipping invalid seed url {:?}", raw),
            }
        }

        tracing::info!(
            correlation_id = input.correlation_id,
            "seeded {} primary locations and {} urls",
            locations.len(),
            urls.len()
        );
        let items_found = (locations.len() + urls.len()) as u64;
        Ok(StageOutput {
            locations,
            urls,
            metrics: StageMetrics {
                items_found,
                ..StageMetrics::default()
            },
        })
    }
}

/// Places without a source id are keyed by name and exact coordinates, so
/// two same-named places in different spots stay distinct.
fn to_location(n: usize, place: &SeedPlace) -> Location {
    let source_id = place
        .source_id
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("{}@{:.6},{:.6}", slug(&place.name), place.lat, place.lng));
    Location {
        id: format!("primary_{}", n),
        name: place.name.trim().to_string(),
        kind: LocationKind::Primary,
        coordinates: crate::pipeline::Coordinates::new(place.lat, place.lng),
        category: place.category.clone(),
        rating: place.rating,
        source: place.source.clone(),
        source_id,
        confidence: place
            .confidence
            .filter(|c| c.is_finite())
            .map_or(SEED_CONFIDENCE, |c| c.clamp(0.0, 1.0)),
        content_rank: None,
    }
}

/// Parse a seed URL; only http(s) with a host is accepted.
pub(crate) fn web_source(raw: &str) -> Option<WebSource> {
    let url = url::Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?;
    let domain = host.strip_prefix("www.").unwrap_or(host).to_string();
    Some(WebSource {
        url: url.to_string(),
        title: None,
        domain,
        trust_score: None,
        source: "seed".to_string(),
        http_status: None,
        content_type: None,
        truncated: false,
    })
}

fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}
