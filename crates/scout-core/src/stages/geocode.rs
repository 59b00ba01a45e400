//! Re-geocode low-confidence locations against a Nominatim endpoint.
//!
//! Each lookup takes one primary token from the `nominatim` bucket. When a
//! lookup never reaches the host (connect or DNS failure) the token goes back
//! to the guard. Once the budget runs dry the remaining candidates are kept
//! as they are.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::budget::{AcquireRequest, BudgetError, BudgetGuard, Connector, Split, NOMINATIM};
use crate::config::ScoutConfig;
use crate::fetch::{self, FetchOptions};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::pipeline::{Coordinates, Location, Stage, StageInput, StageMetrics, StageOutput};
use crate::retry::{request_not_sent, FetchError};

/// Confidence assigned to coordinates confirmed by the geocoder.
pub const GEOCODED_CONFIDENCE: f64 = 0.9;

pub struct GeocodeValidate {
    guard: Arc<BudgetGuard>,
    connector: Connector,
    split: Split,
    base_url: String,
    min_confidence: f64,
    acquire_deadline: Duration,
    options: FetchOptions,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for GeocodeValidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeocodeValidate")
            .field("connector", &self.connector)
            .field("split", &self.split)
            .field("base_url", &self.base_url)
            .field("min_confidence", &self.min_confidence)
            .finish_non_exhaustive()
    }
}

impl GeocodeValidate {
    pub fn new(guard: Arc<BudgetGuard>, cfg: &ScoutConfig) -> Self {
        Self {
            guard,
            connector: Connector::new(NOMINATIM),
            split: Split::Primary,
            base_url: cfg.geocode.base_url.clone(),
            min_confidence: cfg.geocode.min_confidence,
            acquire_deadline: crate::budget::DEFAULT_ACQUIRE_DEADLINE,
            options: FetchOptions::from_config(&cfg.fetch),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_acquire_deadline(mut self, deadline: Duration) -> Self {
        self.acquire_deadline = deadline;
        self
    }

    fn search_url(&self, name: &str, city: &str) -> anyhow::Result<Url> {
        let endpoint = format!("{}/search", self.base_url.trim_end_matches('/'));
        let query = format!("{name}, {city}");
        Url::parse_with_params(
            &endpoint,
            &[("q", query.as_str()), ("format", "jsonv2"), ("limit", "1")],
        )
        .with_context(|| format!("geocode url from {:?}", self.base_url))
    }
}

/// One Nominatim search hit. Coordinates arrive as strings.
#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
}

impl SearchHit {
    fn coordinates(&self) -> Option<Coordinates> {
        let lat: f64 = self.lat.trim().parse().ok()?;
        let lng: f64 = self.lon.trim().parse().ok()?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return None;
        }
        Some(Coordinates::new(lat, lng))
    }
}

#[derive(Debug, Default)]
struct Tally {
    calls: u64,
    matched: u64,
    unmatched: u64,
    failed: u64,
    backoffs: u64,
}

#[async_trait]
impl Stage for GeocodeValidate {
    fn name(&self) -> &str {
        "GeocodeValidate"
    }

    async fn execute(&self, input: StageInput<'_>) -> anyhow::Result<StageOutput> {
        let mut tally = Tally::default();
        let mut exhausted = false;
        let mut locations = Vec::with_capacity(input.locations.len());

        for loc in input.locations {
            let mut loc: Location = loc.clone();
            if loc.confidence >= self.min_confidence || loc.name.trim().is_empty() {
                locations.push(loc);
                continue;
            }
            if exhausted {
                tally.backoffs += 1;
                locations.push(loc);
                continue;
            }
            let url = self.search_url(&loc.name, &input.job.city)?;

            let req = AcquireRequest::new(self.connector.clone(), self.split).deadline(self.acquire_deadline);
            match self.guard.acquire(req, input.cancel).await {
                Ok(()) => {}
                Err(BudgetError::Exceeded { .. }) => {
                    exhausted = true;
                    tally.backoffs += 1;
                    tracing::info!(correlation_id = input.correlation_id, "geocode budget exhausted at {:?}", loc.name);
                    locations.push(loc);
                    continue;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("acquire geocode budget for {:?}", loc.name));
                }
            }

            let options = self.options;
            let result = tokio::task::spawn_blocking(move || {
                fetch::get_json::<Vec<SearchHit>>(url.as_str(), &options)
            })
            .await
            .map_err(|e| FetchError::Task(e.to_string()))
            .and_then(|r| r);

            match result {
                Ok(hits) => {
                    tally.calls += 1;
                    match hits.first().and_then(SearchHit::coordinates) {
                        Some(at) => {
                            tally.matched += 1;
                            loc.coordinates = at;
                            loc.confidence = GEOCODED_CONFIDENCE;
                        }
                        None => tally.unmatched += 1,
                    }
                }
                Err(e) if request_not_sent(&e) => {
                    self.guard.release(&self.connector, 1, self.split);
                    tally.failed += 1;
                    tracing::warn!(correlation_id = input.correlation_id, "geocode {:?} not sent: {}", loc.name, e);
                }
                Err(e) => {
                    tally.calls += 1;
                    tally.failed += 1;
                    tracing::warn!(correlation_id = input.correlation_id, "geocode {:?} failed: {}", loc.name, e);
                }
            }
            locations.push(loc);
        }

        if input.cancel.is_cancelled() {
            return Err(BudgetError::Cancelled).context("geocode cancelled");
        }

        for (outcome, n) in [
            ("matched", tally.matched),
            ("unmatched", tally.unmatched),
            ("error", tally.failed),
            ("backoff", tally.backoffs),
        ] {
            self.metrics.incr_counter("geocode.lookups", &[("outcome", outcome)], n);
        }
        tracing::info!(
            correlation_id = input.correlation_id,
            "geocoded {} locations with {} calls ({} unmatched, {} failed, {} skipped for budget)",
            tally.matched,
            tally.calls,
            tally.unmatched,
            tally.failed,
            tally.backoffs
        );

        let items_found = locations.len() as u64;
        Ok(StageOutput {
            locations,
            urls: Vec::new(),
            metrics: StageMetrics {
                api_calls: tally.calls,
                tokens_used: tally.calls,
                items_found,
                ..StageMetrics::default()
            },
        })
    }
}
