//! Job description: one city, one seed.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::types::Coordinates;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_id: String,
    pub city: String,
    /// Carried into every log line and the result; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub seed: SeedSpec,
    /// Free-form per-job settings handed to stages untouched.
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedSpec {
    pub center: Coordinates,
    /// Search radius around `center`; 0 disables the radius filter.
    #[serde(default)]
    pub radius_km: f64,
    #[serde(default)]
    pub places: Vec<SeedPlace>,
    /// Starting URLs for web discovery.
    #[serde(default)]
    pub sources: Vec<String>,
}

/// A known place supplied with the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedPlace {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default = "default_seed_source")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// How much the coordinates are trusted (0..1). Low values get geocoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

fn default_seed_source() -> String {
    "seed".to_string()
}

impl JobSpec {
    pub fn from_json(data: &str) -> Result<Self> {
        let job: JobSpec = serde_json::from_str(data).context("parse job file")?;
        anyhow::ensure!(!job.job_id.trim().is_empty(), "job_id must not be empty");
        anyhow::ensure!(!job.city.trim().is_empty(), "city must not be empty");
        Ok(job)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read job file {}", path.display()))?;
        Self::from_json(&data).with_context(|| format!("job file {}", path.display()))
    }

    /// Explicit correlation id, if one was supplied and is non-empty.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_job() {
        let job = JobSpec::from_json(
            r#"{"job_id":"j1","city":"stockholm","seed":{"center":{"lat":59.33,"lng":18.07}}}"#,
        )
        .unwrap();
        assert_eq!(job.city, "stockholm");
        assert!(job.seed.places.is_empty());
        assert_eq!(job.seed.radius_km, 0.0);
        assert_eq!(job.correlation_id(), None);
    }

    #[test]
    fn parses_places_and_sources() {
        let job = JobSpec::from_json(
            r#"{
                "job_id": "j2",
                "city": "oslo",
                "correlation_id": "corr-1",
                "seed": {
                    "center": {"lat": 59.91, "lng": 10.75},
                    "radius_km": 5,
                    "places": [{"name": "Opera", "lat": 59.907, "lng": 10.753, "rating": 4.6}],
                    "sources": ["https://visitoslo.com/"]
                },
                "settings": {"language": "no"}
            }"#,
        )
        .unwrap();
        assert_eq!(job.correlation_id(), Some("corr-1"));
        assert_eq!(job.seed.places[0].source, "seed");
        assert_eq!(job.seed.places[0].rating, Some(4.6));
        assert_eq!(job.seed.sources.len(), 1);
        assert_eq!(job.settings["language"], "no");
    }

    #[test]
    fn rejects_empty_city() {
        let err = JobSpec::from_json(
            r#"{"job_id":"j1","city":" ","seed":{"center":{"lat":0,"lng":0}}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("city"));
    }
}
