//! `scout run` – run one job through the default pipeline.

use anyhow::Result;
use scout_core::budget::BudgetGuard;
use scout_core::config::ScoutConfig;
use scout_core::control::CancelToken;
use scout_core::metrics::{MetricsSink, TracingMetrics};
use scout_core::output;
use scout_core::pipeline::{JobSpec, RunOutcome, RunResult};
use scout_core::stages;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

pub async fn run_job(cfg: &ScoutConfig, job_path: &Path, out: Option<&Path>) -> Result<()> {
    let started = Instant::now();
    let job = JobSpec::load(job_path)?;
    let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetrics);
    let guard = Arc::new(BudgetGuard::from_config(cfg, Arc::clone(&metrics))?);
    let runner = stages::default_pipeline(cfg, guard, metrics, started);

    let cancel = CancelToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling run");
                eprintln!("Interrupted, cancelling...");
                cancel.cancel();
            }
        }
    });
    let result = runner.run(&job, &cancel).await;
    interrupt.abort();
    let result = result?;

    let path = match out {
        Some(p) => p.to_path_buf(),
        None => output::default_output_path(Path::new("output"), &job.city),
    };
    output::write_jsonl(&result, &path)?;
    print_summary(&result, &path);
    Ok(())
}

fn print_summary(result: &RunResult, path: &Path) {
    let s = &result.summary;
    match &result.outcome {
        RunOutcome::Completed => println!("Job {} ({}) completed.", result.job_id, result.city),
        RunOutcome::Halted { reason, next_stage } => println!(
            "Job {} ({}) halted before {}: {}.",
            result.job_id, result.city, next_stage, reason
        ),
    }
    println!(
        "  locations: {} ({} primary, {} secondary)",
        s.total_locations, s.primary_count, s.secondary_count
    );
    println!("  urls:      {}", s.total_urls);
    println!("  api calls: {}", s.api_calls);
    println!("  sources:   {}", s.sources_used.join(", "));
    println!("  time:      {} ms", s.processing_time_ms);
    println!("  output:    {}", path.display());
}
