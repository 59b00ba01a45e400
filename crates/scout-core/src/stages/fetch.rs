//! Fetch every accumulated URL under the `web.fetch` budget.
//!
//! Each attempt (retries included) acquires one secondary token first. A URL
//! whose budget cannot be acquired within the deadline is skipped and counted
//! as a backoff; cancellation fails the stage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::budget::{AcquireRequest, BudgetError, BudgetGuard, Connector, Split, WEB_FETCH};
use crate::config::ScoutConfig;
use crate::control::CancelToken;
use crate::fetch::{self, FetchOptions, Page};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::pipeline::{Stage, StageInput, StageMetrics, StageOutput, WebSource};
use crate::retry::{run_with_retry, FetchError, RetryPolicy};

pub struct WebFetch {
    guard: Arc<BudgetGuard>,
    connector: Connector,
    split: Split,
    concurrency: usize,
    acquire_deadline: Duration,
    options: FetchOptions,
    retry: RetryPolicy,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for WebFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebFetch")
            .field("connector", &self.connector)
            .field("split", &self.split)
            .field("concurrency", &self.concurrency)
            .field("options", &self.options)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl WebFetch {
    pub fn new(guard: Arc<BudgetGuard>, cfg: &ScoutConfig) -> Self {
        Self {
            guard,
            connector: Connector::new(WEB_FETCH),
            split: Split::Secondary,
            concurrency: cfg.fetch.concurrency.max(1),
            acquire_deadline: crate::budget::DEFAULT_ACQUIRE_DEADLINE,
            options: FetchOptions::from_config(&cfg.fetch),
            retry: RetryPolicy::from_config(&cfg.retry_or_default()),
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

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// What happened to one URL.
enum UrlOutcome {
    Fetched(Page),
    Failed(FetchError),
    BudgetExhausted,
}

#[async_trait]
impl Stage for WebFetch {
    fn name(&self) -> &str {
        "WebFetch"
    }

    async fn execute(&self, input: StageInput<'_>) -> anyhow::Result<StageOutput> {
        let attempts = Arc::new(AtomicU64::new(0));
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (index, src) in input.urls.iter().enumerate() {
            if input.cancel.is_cancelled() {
                break;
            }
            let permit = Arc::clone(&permits)
                .acquire_owned()
                .await
                .context("fetch semaphore closed")?;
            let ctx = AttemptContext {
                guard: Arc::clone(&self.guard),
                connector: self.connector.clone(),
                split: self.split,
                deadline: self.acquire_deadline,
                options: self.options,
                cancel: input.cancel.clone(),
                attempts: Arc::clone(&attempts),
            };
            let retry = self.retry;
            let url = src.url.clone();
            tasks.spawn(async move {
                let _permit = permit;
                (index, fetch_url(ctx, &retry, url).await)
            });
        }

        let mut outcomes: Vec<Option<UrlOutcome>> = input.urls.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = joined.context("fetch task join")?;
            outcomes[index] = Some(outcome);
        }
        if input.cancel.is_cancelled() {
            return Err(BudgetError::Cancelled).context("web fetch cancelled");
        }

        let mut metrics = StageMetrics::default();
        let mut urls = Vec::with_capacity(input.urls.len());
        let (mut fetched, mut failed, mut backoffs) = (0u64, 0u64, 0u64);
        for (src, outcome) in input.urls.iter().zip(outcomes) {
            let mut src: WebSource = src.clone();
            match outcome {
                Some(UrlOutcome::Fetched(page)) => {
                    fetched += 1;
                    metrics.bytes_fetched += page.bytes;
                    src.http_status = Some(page.status);
                    src.content_type = page.content_type;
                    src.truncated = page.truncated;
                    if src.title.is_none() {
                        src.title = page.title;
                    }
                }
                Some(UrlOutcome::Failed(FetchError::Budget(e))) => {
                    return Err(e).with_context(|| format!("acquire budget for {}", src.url));
                }
                Some(UrlOutcome::Failed(e)) => {
                    failed += 1;
                    tracing::warn!(correlation_id = input.correlation_id, "fetch {} failed: {}", src.url, e);
                    if let FetchError::Http(code) = e {
                        src.http_status = Some(code);
                    }
                }
                Some(UrlOutcome::BudgetExhausted) => {
                    backoffs += 1;
                    tracing::info!(correlation_id = input.correlation_id, "no budget for {}, skipped", src.url);
                }
                None => {}
            }
            urls.push(src);
        }

        metrics.api_calls = attempts.load(Ordering::Relaxed);
        metrics.tokens_used = metrics.api_calls;
        metrics.items_found = fetched;
        self.metrics.incr_counter("fetch.pages", &[("outcome", "ok")], fetched);
        self.metrics.incr_counter("fetch.pages", &[("outcome", "error")], failed);
        self.metrics.incr_counter("fetch.pages", &[("outcome", "backoff")], backoffs);
        tracing::info!(
            correlation_id = input.correlation_id,
            "fetched {} of {} urls ({} failed, {} skipped for budget, {} bytes)",
            fetched,
            input.urls.len(),
            failed,
            backoffs,
            metrics.bytes_fetched
        );

        Ok(StageOutput {
            locations: Vec::new(),
            urls,
            metrics,
        })
    }
}

/// Everything one URL's attempts need, owned so it can move into a task.
#[derive(Clone)]
struct AttemptContext {
    guard: Arc<BudgetGuard>,
    connector: Connector,
    split: Split,
    deadline: Duration,
    options: FetchOptions,
    cancel: CancelToken,
    attempts: Arc<AtomicU64>,
}

async fn fetch_url(ctx: AttemptContext, retry: &RetryPolicy, url: String) -> UrlOutcome {
    let cancel = ctx.cancel.clone();
    let result = run_with_retry(retry, &cancel, |_| {
        let ctx = ctx.clone();
        let url = url.clone();
        async move {
            let req = AcquireRequest::new(ctx.connector.clone(), ctx.split).deadline(ctx.deadline);
            ctx.guard.acquire(req, &ctx.cancel).await?;
            ctx.attempts.fetch_add(1, Ordering::Relaxed);
            let options = ctx.options;
            tokio::task::spawn_blocking(move || fetch::get_page(&url, &options))
                .await
                .map_err(|e| FetchError::Task(e.to_string()))?
        }
    })
    .await;
    match result {
        Ok(page) => UrlOutcome::Fetched(page),
        Err(FetchError::Budget(BudgetError::Exceeded { .. })) => UrlOutcome::BudgetExhausted,
        Err(e) => UrlOutcome::Failed(e),
    }
}
