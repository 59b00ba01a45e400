//! Run one job: execute stages in order, consulting the stopping policy
//! before each, and fold every stage's output into the accumulated state.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use super::error::PipelineError;
use super::job::JobSpec;
use super::result::{RunOutcome, RunResult, Summary};
use super::stage::{Stage, StageInput, StageOutput};
use super::stats::Stats;
use super::types::{Location, LocationKind, StageMetrics, WebSource};
use crate::control::CancelToken;
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::stopping::StoppingPolicy;

/// Ordered list of stages plus the policy that may cut the run short.
pub struct PipelineRunner {
    stages: Vec<Box<dyn Stage>>,
    policy: StoppingPolicy,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("stages", &self.stage_names())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl PipelineRunner {
    pub fn new(policy: StoppingPolicy) -> Self {
        Self {
            stages: Vec::new(),
            policy,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn push_stage(&mut self, stage: Box<dyn Stage>) {
        self.stages.push(stage);
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn policy(&self) -> &StoppingPolicy {
        &self.policy
    }

    /// Runs every stage in order.
    ///
    /// A stage error fails the whole run and names the stage. The stopping
    /// policy firing is not an error: the result is returned with whatever
    /// was accumulated and `RunOutcome::Halted`.
    pub async fn run(&self, job: &JobSpec, cancel: &CancelToken) -> Result<RunResult, PipelineError> {
        let started = Instant::now();
        let correlation_id = job
            .correlation_id()
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let total = self.stages.len();
        tracing::info!(
            job_id = %job.job_id,
            city = %job.city,
            correlation_id = %correlation_id,
            "starting run with {} stages",
            total
        );

        let mut acc = Accumulator::default();
        let mut outcome = RunOutcome::Completed;

        for (index, stage) in self.stages.iter().enumerate() {
            let name = stage.name();
            if cancel.is_cancelled() {
                tracing::warn!(correlation_id = %correlation_id, "cancelled before stage {}", name);
                return Err(PipelineError::Cancelled {
                    stage: name.to_string(),
                });
            }
            if let Some(reason) = self.policy.check(&acc.stats) {
                tracing::info!(
                    correlation_id = %correlation_id,
                    api_calls = acc.stats.api_calls,
                    new_unique = acc.stats.new_unique_items,
                    total_seen = acc.stats.total_items_seen,
                    "halting before stage {}: {}",
                    name,
                    reason
                );
                self.metrics
                    .incr_counter("run.halted", &[("reason", reason.as_str())], 1);
                outcome = RunOutcome::Halted {
                    reason,
                    next_stage: name.to_string(),
                };
                break;
            }

            tracing::info!(
                correlation_id = %correlation_id,
                "stage {}/{}: {}",
                index + 1,
                total,
                name
            );
            let stage_started = Instant::now();
            let input = StageInput {
                job,
                correlation_id: &correlation_id,
                locations: &acc.locations,
                urls: &acc.urls,
                cancel,
            };
            let result = stage.execute(input).await;
            let elapsed = stage_started.elapsed();
            self.metrics
                .observe_duration("stage.duration", &[("stage", name)], elapsed);

            let output = match result {
                Ok(output) => {
                    self.metrics
                        .incr_counter("stage.calls", &[("stage", name), ("outcome", "ok")], 1);
                    output
                }
                Err(e) => {
                    self.metrics
                        .incr_counter("stage.calls", &[("stage", name), ("outcome", "error")], 1);
                    if cancel.is_cancelled() {
                        tracing::warn!(correlation_id = %correlation_id, "stage {} cancelled: {:#}", name, e);
                        return Err(PipelineError::Cancelled {
                            stage: name.to_string(),
                        });
                    }
                    tracing::error!(correlation_id = %correlation_id, "stage {} failed: {:#}", name, e);
                    return Err(PipelineError::StageFailed {
                        stage: name.to_string(),
                        source: e.into(),
                    });
                }
            };

            let new_unique = acc.absorb(name, output, elapsed);
            tracing::debug!(
                correlation_id = %correlation_id,
                stage = name,
                new_unique,
                locations = acc.locations.len(),
                urls = acc.urls.len(),
                "stage complete"
            );
        }

        let processing_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let summary = acc.summary(processing_time_ms);
        tracing::info!(
            correlation_id = %correlation_id,
            "run finished: {} locations ({} primary, {} secondary), {} urls, {} api calls in {}ms",
            summary.total_locations,
            summary.primary_count,
            summary.secondary_count,
            summary.total_urls,
            summary.api_calls,
            processing_time_ms
        );

        Ok(RunResult {
            job_id: job.job_id.clone(),
            city: job.city.clone(),
            correlation_id,
            completed_at_ms: unix_millis(),
            outcome,
            summary,
            stats: acc.stats,
            stage_metrics: acc.stage_metrics,
            locations: acc.locations,
            urls: acc.urls,
        })
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Mutable run state owned by the runner.
#[derive(Default)]
struct Accumulator {
    locations: Vec<Location>,
    urls: Vec<WebSource>,
    stats: Stats,
    stage_metrics: BTreeMap<String, StageMetrics>,
    seen: HashSet<String>,
    sources: BTreeSet<String>,
}

impl Accumulator {
    /// Merge one stage's output; returns how many items were never seen before.
    fn absorb(&mut self, stage: &str, output: StageOutput, elapsed: std::time::Duration) -> u64 {
        let StageOutput {
            locations,
            urls,
            mut metrics,
        } = output;
        if metrics.duration.is_zero() {
            metrics.duration = elapsed;
        }

        let mut new_unique = 0u64;
        for loc in &locations {
            if self.seen.insert(format!("loc:{}", loc.identity())) {
                new_unique += 1;
            }
            self.sources.insert(loc.source.clone());
        }
        for url in &urls {
            if self.seen.insert(format!("url:{}", url.url)) {
                new_unique += 1;
            }
            self.sources.insert(url.source.clone());
        }

        self.stats.record(&metrics, new_unique);
        if !locations.is_empty() {
            self.locations = locations;
        }
        if !urls.is_empty() {
            self.urls = urls;
        }
        self.stage_metrics.insert(stage.to_string(), metrics);
        new_unique
    }

    fn summary(&self, processing_time_ms: u64) -> Summary {
        let primary_count = self
            .locations
            .iter()
            .filter(|l| l.kind == LocationKind::Primary)
            .count();
        Summary {
            total_locations: self.locations.len(),
            primary_count,
            secondary_count: self.locations.len() - primary_count,
            total_urls: self.urls.len(),
            sources_used: self.sources.iter().cloned().collect(),
            processing_time_ms,
            api_calls: self.stats.api_calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testing::RecordingMetrics;
    use crate::pipeline::types::Coordinates;
    use crate::pipeline::SeedSpec;
    use crate::stopping::StopReason;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn job() -> JobSpec {
        JobSpec {
            job_id: "job-1".into(),
            city: "testville".into(),
            correlation_id: Some("corr-1".into()),
            seed: SeedSpec {
                center: Coordinates::new(0.0, 0.0),
                radius_km: 0.0,
                places: Vec::new(),
                sources: Vec::new(),
            },
            settings: Default::default(),
        }
    }

    fn loc(id: &str, kind: LocationKind) -> Location {
        Location {
            id: id.into(),
            name: id.into(),
            kind,
            coordinates: Coordinates::new(0.0, 0.0),
            category: String::new(),
            rating: None,
            source: "test".into(),
            source_id: id.into(),
            confidence: 1.0,
            content_rank: None,
        }
    }

    /// Emits fixed output and counts executions.
    struct Fixed {
        name: &'static str,
        locations: Vec<Location>,
        api_calls: u64,
        runs: Arc<AtomicUsize>,
    }

    impl Fixed {
        fn new(name: &'static str, locations: Vec<Location>, api_calls: u64) -> Self {
            Self {
                name,
                locations,
                api_calls,
                runs: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Stage for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, _input: StageInput<'_>) -> anyhow::Result<StageOutput> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(StageOutput {
                metrics: StageMetrics {
                    api_calls: self.api_calls,
                    items_found: self.locations.len() as u64,
                    ..StageMetrics::default()
                },
                locations: self.locations.clone(),
                urls: Vec::new(),
            })
        }
    }

    struct Failing;

    #[async_trait]
    impl Stage for Failing {
        fn name(&self) -> &str {
            "stage-two"
        }

        async fn execute(&self, _input: StageInput<'_>) -> anyhow::Result<StageOutput> {
            anyhow::bail!("upstream returned 500")
        }
    }

    /// Records how many locations it was handed.
    struct Observe {
        seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Stage for Observe {
        fn name(&self) -> &str {
            "observe"
        }

        async fn execute(&self, input: StageInput<'_>) -> anyhow::Result<StageOutput> {
            assert_eq!(input.correlation_id, "corr-1");
            self.seen.store(input.locations.len(), Ordering::SeqCst);
            Ok(StageOutput::default())
        }
    }

    fn unlimited() -> StoppingPolicy {
        StoppingPolicy::unlimited(Instant::now())
    }

    #[tokio::test]
    async fn completes_all_stages_and_summarizes() {
        let seen = Arc::new(AtomicUsize::new(0));
        let runner = PipelineRunner::new(unlimited())
            .with_stage(Fixed::new(
                "seed",
                vec![loc("a", LocationKind::Primary), loc("b", LocationKind::Secondary)],
                3,
            ))
            .with_stage(Observe { seen: seen.clone() });
        let result = runner.run(&job(), &CancelToken::new()).await.unwrap();

        assert_eq!(result.outcome, RunOutcome::Completed);
        assert_eq!(result.correlation_id, "corr-1");
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        // Empty output from the second stage keeps the accumulated list.
        assert_eq!(result.locations.len(), 2);
        assert_eq!(result.summary.primary_count, 1);
        assert_eq!(result.summary.secondary_count, 1);
        assert_eq!(result.summary.api_calls, 3);
        assert_eq!(result.summary.sources_used, vec!["test".to_string()]);
        assert_eq!(result.stats.new_unique_items, 2);
        assert!(result.stage_metrics.contains_key("seed"));
        assert!(result.stage_metrics.contains_key("observe"));
    }

    #[tokio::test]
    async fn stage_error_names_stage_and_stops() {
        let third = Fixed::new("stage-three", vec![loc("c", LocationKind::Primary)], 0);
        let third_runs = third.runs.clone();
        let runner = PipelineRunner::new(unlimited())
            .with_stage(Fixed::new("stage-one", vec![loc("a", LocationKind::Primary)], 1))
            .with_stage(Failing)
            .with_stage(third);
        let err = runner.run(&job(), &CancelToken::new()).await.unwrap_err();

        assert_eq!(err.stage(), "stage-two");
        assert!(matches!(err, PipelineError::StageFailed { .. }));
        assert!(err.to_string().contains("stage-two"));
        let cause = std::error::Error::source(&err).unwrap().to_string();
        assert!(cause.contains("500"));
        assert_eq!(third_runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn halt_returns_partial_result() {
        let policy = StoppingPolicy {
            max_api_calls: 5,
            ..unlimited()
        };
        let second = Fixed::new("stage-two", vec![loc("z", LocationKind::Secondary)], 1);
        let second_runs = second.runs.clone();
        let metrics = Arc::new(RecordingMetrics::default());
        let runner = PipelineRunner::new(policy)
            .with_metrics(metrics.clone())
            .with_stage(Fixed::new("stage-one", vec![loc("a", LocationKind::Primary)], 5))
            .with_stage(second);
        let result = runner.run(&job(), &CancelToken::new()).await.unwrap();

        assert_eq!(
            result.outcome,
            RunOutcome::Halted {
                reason: StopReason::ApiCalls,
                next_stage: "stage-two".into()
            }
        );
        assert_eq!(second_runs.load(Ordering::SeqCst), 0);
        assert_eq!(result.locations.len(), 1);
        assert_eq!(result.locations[0].id, "a");
        assert!(!result.stage_metrics.contains_key("stage-two"));
        assert_eq!(metrics.count("run.halted", ("reason", "api_calls")), 1);
    }

    #[tokio::test]
    async fn repeated_items_are_not_new() {
        let runner = PipelineRunner::new(unlimited())
            .with_stage(Fixed::new("one", vec![loc("a", LocationKind::Primary)], 0))
            .with_stage(Fixed::new(
                "two",
                vec![loc("a", LocationKind::Primary), loc("b", LocationKind::Primary)],
                0,
            ));
        let result = runner.run(&job(), &CancelToken::new()).await.unwrap();
        assert_eq!(result.stats.total_items_seen, 3);
        assert_eq!(result.stats.new_unique_items, 2);
        assert_eq!(result.locations.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_stage() {
        let first = Fixed::new("one", vec![loc("a", LocationKind::Primary)], 0);
        let runs = first.runs.clone();
        let runner = PipelineRunner::new(unlimited()).with_stage(first);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = runner.run(&job(), &cancel).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { ref stage } if stage == "one"));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn generates_correlation_id_when_missing() {
        let mut job_spec = job();
        job_spec.correlation_id = None;
        let runner = PipelineRunner::new(unlimited());
        let result = runner.run(&job_spec, &CancelToken::new()).await.unwrap();
        assert_eq!(result.correlation_id.len(), 36);
        assert_eq!(result.outcome, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn stage_duration_filled_in_when_unset() {
        let runner = PipelineRunner::new(unlimited())
            .with_stage(Fixed::new("one", vec![loc("a", LocationKind::Primary)], 0));
        let result = runner.run(&job(), &CancelToken::new()).await.unwrap();
        assert!(result.stage_metrics["one"].duration <= Duration::from_secs(5));
    }
}
