//! Budget guard: connector buckets plus the primary/secondary split.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use super::bucket::TokenBucket;
use super::error::BudgetError;
use super::quota::{SplitQuota, SplitQuotas};
use super::{Connector, Split};
use crate::config::validate::{validate_bucket, validate_split_ratio};
use crate::config::{BucketConfig, ConfigError, ScoutConfig};
use crate::control::CancelToken;
use crate::metrics::MetricsSink;

/// Fixed backoff between acquisition attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long `acquire` waits when the request does not say.
pub const DEFAULT_ACQUIRE_DEADLINE: Duration = Duration::from_secs(2);

/// One acquisition: `tokens` from `connector`, charged to `split`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireRequest {
    pub connector: Connector,
    pub split: Split,
    pub tokens: u64,
    pub deadline: Duration,
}

impl AcquireRequest {
    /// One token with the default deadline.
    pub fn new(connector: impl Into<Connector>, split: Split) -> Self {
        Self {
            connector: connector.into(),
            split,
            tokens: 1,
            deadline: DEFAULT_ACQUIRE_DEADLINE,
        }
    }

    pub fn tokens(mut self, tokens: u64) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Single-process budget authority for one job run.
///
/// Lock order is always split quotas first, then the bucket, so `acquire`,
/// `release` and `rebalance` serialize on the quota lock while different
/// connectors' token arithmetic stays independent.
pub struct BudgetGuard {
    buckets: HashMap<Connector, TokenBucket>,
    quotas: Mutex<SplitQuotas>,
    split_ratio: f64,
    poll_interval: Duration,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for BudgetGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetGuard")
            .field("buckets", &self.buckets)
            .field("quotas", &self.quotas)
            .field("split_ratio", &self.split_ratio)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl BudgetGuard {
    /// Build buckets from validated parameters and seed the split quotas.
    ///
    /// The initial rebalance happens here, so a fresh guard is ready to use.
    pub fn new(
        budgets: &BTreeMap<String, BucketConfig>,
        split_ratio: f64,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, ConfigError> {
        validate_split_ratio(split_ratio)?;
        let mut buckets = HashMap::with_capacity(budgets.len());
        for (id, cfg) in budgets {
            validate_bucket(id, cfg)?;
            buckets.insert(
                Connector::new(id.as_str()),
                TokenBucket::new(cfg.capacity, cfg.refill, cfg.period()),
            );
        }
        if buckets.is_empty() {
            tracing::warn!("budget guard has no connectors; every acquire will fail");
        }
        let guard = Self {
            buckets,
            quotas: Mutex::new(SplitQuotas::default()),
            split_ratio,
            poll_interval: DEFAULT_POLL_INTERVAL,
            metrics,
        };
        guard.rebalance();
        Ok(guard)
    }

    pub fn from_config(cfg: &ScoutConfig, metrics: Arc<dyn MetricsSink>) -> Result<Self, ConfigError> {
        Self::new(&cfg.budgets, cfg.split_ratio, metrics)
    }

    /// Override the backoff between attempts (mainly for tests).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    fn lock_quotas(&self) -> MutexGuard<'_, SplitQuotas> {
        self.quotas.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn split_ratio(&self) -> f64 {
        self.split_ratio
    }

    pub fn connectors(&self) -> impl Iterator<Item = &Connector> {
        self.buckets.keys()
    }

    /// Tokens left in a connector's bucket (`None` if unknown).
    pub fn available(&self, connector: &Connector) -> Option<u64> {
        self.buckets.get(connector).map(TokenBucket::tokens)
    }

    pub fn quota(&self, split: Split) -> SplitQuota {
        self.lock_quotas().get(split)
    }

    pub fn quotas(&self) -> SplitQuotas {
        *self.lock_quotas()
    }

    /// Reseed split quotas from the tokens currently held by all buckets.
    ///
    /// Usage counters on both splits restart at zero each time, so a mid-run
    /// call opens a fresh window and forgets earlier consumption.
    pub fn rebalance(&self) {
        let mut quotas = self.lock_quotas();
        let total = self
            .buckets
            .values()
            .fold(0u64, |acc, b| acc.saturating_add(b.tokens()));
        quotas.rebalance(total, self.split_ratio);
        tracing::debug!(
            total,
            primary = quotas.primary.quota,
            secondary = quotas.secondary.quota,
            "budget rebalanced"
        );
    }

    /// One all-or-nothing attempt. `Ok(false)` means retry later.
    pub fn try_acquire(
        &self,
        connector: &Connector,
        split: Split,
        tokens: u64,
    ) -> Result<bool, BudgetError> {
        let bucket = self
            .buckets
            .get(connector)
            .ok_or_else(|| BudgetError::UnknownConnector(connector.clone()))?;
        let utilization = {
            let mut quotas = self.lock_quotas();
            if !quotas.admits(split, tokens) || !bucket.take(tokens) {
                return Ok(false);
            }
            quotas.commit(split, tokens);
            quotas.get(split).utilization()
        };
        if let Some(ratio) = utilization {
            self.metrics.gauge(
                "budget.utilization",
                &[("split", split.as_str())],
                ratio,
            );
        }
        Ok(true)
    }

    /// Wait until both the bucket and the split quota can cover the request.
    ///
    /// Polls every `poll_interval` until success, the request deadline
    /// (`BudgetError::Exceeded`) or cancellation (`BudgetError::Cancelled`).
    /// A zero token count is treated as one; a zero deadline as the default.
    /// Waiters are not queued: whichever poll lands first wins.
    pub async fn acquire(&self, req: AcquireRequest, cancel: &CancelToken) -> Result<(), BudgetError> {
        let tokens = req.tokens.max(1);
        let wait = if req.deadline.is_zero() {
            DEFAULT_ACQUIRE_DEADLINE
        } else {
            req.deadline
        };
        let started = Instant::now();
        let deadline = started + wait;

        let outcome = loop {
            if cancel.is_cancelled() {
                break Err(BudgetError::Cancelled);
            }
            match self.try_acquire(&req.connector, req.split, tokens) {
                Ok(true) => break Ok(()),
                Ok(false) => {}
                Err(e) => break Err(e),
            }
            let now = Instant::now();
            if now >= deadline {
                break Err(BudgetError::Exceeded {
                    connector: req.connector.clone(),
                    split: req.split,
                    tokens,
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        };

        let result = match &outcome {
            Ok(()) => "ok",
            Err(BudgetError::Exceeded { .. }) => "exceeded",
            Err(BudgetError::Cancelled) => "cancelled",
            Err(BudgetError::UnknownConnector(_)) => "unknown_connector",
        };
        let labels = [
            ("connector", req.connector.as_str()),
            ("split", req.split.as_str()),
            ("outcome", result),
        ];
        self.metrics.incr_counter("budget.acquire", &labels, 1);
        self.metrics
            .observe_duration("budget.wait", &labels[..2], started.elapsed());
        if let Err(e) = &outcome {
            tracing::debug!(connector = %req.connector, split = %req.split, tokens, "acquire failed: {e}");
        }
        outcome
    }

    /// Credit `tokens` back to the connector and the split.
    ///
    /// The bucket is capped at capacity and split usage floors at zero, so
    /// releasing more than was acquired cannot corrupt the books.
    pub fn release(&self, connector: &Connector, tokens: u64, split: Split) {
        let mut quotas = self.lock_quotas();
        match self.buckets.get(connector) {
            Some(bucket) => bucket.put(tokens),
            None => tracing::warn!(%connector, "release for unknown connector"),
        }
        quotas.release(split, tokens);
        drop(quotas);
        self.metrics.incr_counter(
            "budget.release",
            &[("connector", connector.as_str()), ("split", split.as_str())],
            tokens,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testing::RecordingMetrics;
    use crate::metrics::NoopMetrics;

    fn budgets(entries: &[(&str, u64, u64, Duration)]) -> BTreeMap<String, BucketConfig> {
        entries
            .iter()
            .map(|(id, cap, refill, period)| (id.to_string(), BucketConfig::new(*cap, *refill, *period)))
            .collect()
    }

    fn guard(entries: &[(&str, u64, u64, Duration)], ratio: f64) -> BudgetGuard {
        BudgetGuard::new(&budgets(entries), ratio, Arc::new(NoopMetrics))
            .unwrap()
            .with_poll_interval(Duration::from_millis(10))
    }

    const HOUR: Duration = Duration::from_secs(3600);

    fn text() -> Connector {
        Connector::new("google.text")
    }

    #[test]
    fn construction_seeds_quotas_from_all_buckets() {
        let g = guard(&[("google.text", 10, 0, HOUR), ("overpass", 20, 0, HOUR)], 0.7);
        let q = g.quotas();
        assert_eq!(q.primary.quota, 21);
        assert_eq!(q.secondary.quota, 9);
        assert_eq!(q.primary.quota + q.secondary.quota, 30);
        assert_eq!(q.primary.used, 0);
    }

    #[test]
    fn invalid_budget_config_fails_fast() {
        let err = BudgetGuard::new(&budgets(&[("a", 1, 0, HOUR)]), 1.5, Arc::new(NoopMetrics))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = BudgetGuard::new(&budgets(&[("a", 0, 0, HOUR)]), 0.5, Arc::new(NoopMetrics))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn try_acquire_deducts_bucket_and_split() {
        let g = guard(&[("google.text", 10, 0, HOUR)], 0.7);
        assert!(g.try_acquire(&text(), Split::Primary, 4).unwrap());
        assert_eq!(g.available(&text()), Some(6));
        assert_eq!(g.quota(Split::Primary).used, 4);
        assert_eq!(g.quota(Split::Secondary).used, 0);
    }

    #[test]
    fn split_quota_blocks_without_touching_bucket() {
        let g = guard(&[("google.text", 10, 0, HOUR)], 0.7);
        assert!(g.try_acquire(&text(), Split::Primary, 7).unwrap());
        assert!(!g.try_acquire(&text(), Split::Primary, 1).unwrap());
        assert_eq!(g.available(&text()), Some(3));
        assert_eq!(g.quota(Split::Primary).used, 7);
        // The secondary split still has room.
        assert!(g.try_acquire(&text(), Split::Secondary, 3).unwrap());
    }

    #[test]
    fn empty_bucket_blocks_without_touching_split() {
        let g = guard(&[("google.text", 2, 0, HOUR), ("overpass", 100, 0, HOUR)], 0.5);
        assert!(!g.try_acquire(&text(), Split::Primary, 3).unwrap());
        assert_eq!(g.quota(Split::Primary).used, 0);
        assert_eq!(g.available(&text()), Some(2));
    }

    #[test]
    fn zero_quota_split_is_unlimited() {
        let g = guard(&[("google.text", 10, 0, HOUR)], 0.0);
        assert_eq!(g.quota(Split::Primary).quota, 0);
        assert!(g.try_acquire(&text(), Split::Primary, 10).unwrap());
        assert_eq!(g.quota(Split::Primary).used, 10);
    }

    #[test]
    fn release_restores_capacity_for_a_failed_request() {
        let g = guard(&[("google.text", 5, 0, HOUR)], 1.0);
        assert!(g.try_acquire(&text(), Split::Primary, 5).unwrap());
        assert!(!g.try_acquire(&text(), Split::Primary, 2).unwrap());
        g.release(&text(), 2, Split::Primary);
        assert!(g.try_acquire(&text(), Split::Primary, 2).unwrap());
    }

    #[test]
    fn over_release_is_harmless() {
        let g = guard(&[("google.text", 5, 0, HOUR)], 1.0);
        assert!(g.try_acquire(&text(), Split::Primary, 1).unwrap());
        g.release(&text(), 3, Split::Primary);
        g.release(&text(), 3, Split::Primary);
        assert_eq!(g.quota(Split::Primary).used, 0);
        assert_eq!(g.available(&text()), Some(5));
        g.release(&Connector::new("nope"), 1, Split::Secondary);
        assert_eq!(g.quota(Split::Secondary).used, 0);
    }

    #[test]
    fn rebalance_reseeds_from_remaining_tokens_and_resets_usage() {
        let g = guard(&[("google.text", 10, 0, HOUR)], 0.5);
        assert!(g.try_acquire(&text(), Split::Primary, 4).unwrap());
        assert_eq!(g.quota(Split::Primary).used, 4);

        g.rebalance();
        let q = g.quotas();
        assert_eq!(q.primary.quota, 3);
        assert_eq!(q.secondary.quota, 3);
        // Fresh window: earlier consumption is forgotten.
        assert_eq!(q.primary.used, 0);
        assert_eq!(q.secondary.used, 0);
    }

    #[test]
    fn unknown_connector_is_reported() {
        let g = guard(&[("google.text", 10, 0, HOUR)], 0.5);
        let err = g.try_acquire(&Connector::new("otm"), Split::Primary, 1).unwrap_err();
        assert_eq!(err, BudgetError::UnknownConnector(Connector::new("otm")));
    }

    #[tokio::test]
    async fn acquire_succeeds_immediately_when_available() {
        let g = guard(&[("google.text", 10, 10, HOUR)], 0.7);
        let req = AcquireRequest::new("google.text", Split::Primary).tokens(5);
        g.acquire(req, &CancelToken::new()).await.unwrap();
        assert_eq!(g.available(&text()), Some(5));
        assert_eq!(g.quota(Split::Primary).used, 5);
    }

    #[tokio::test]
    async fn acquire_normalizes_zero_tokens_to_one() {
        let g = guard(&[("google.text", 10, 0, HOUR)], 0.7);
        let req = AcquireRequest::new("google.text", Split::Primary).tokens(0);
        g.acquire(req, &CancelToken::new()).await.unwrap();
        assert_eq!(g.available(&text()), Some(9));
    }

    #[tokio::test]
    async fn acquire_times_out_with_budget_exceeded() {
        let g = guard(&[("google.text", 1, 0, HOUR)], 0.5);
        let req = AcquireRequest::new("google.text", Split::Secondary)
            .tokens(2)
            .deadline(Duration::from_millis(100));
        let started = std::time::Instant::now();
        let err = g.acquire(req, &CancelToken::new()).await.unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(
            err,
            BudgetError::Exceeded {
                connector: text(),
                split: Split::Secondary,
                tokens: 2
            }
        );
        assert_eq!(g.available(&text()), Some(1));
    }

    #[tokio::test]
    async fn acquire_waits_for_refill() {
        // Ratio 1.0 leaves the secondary quota at zero, i.e. unenforced.
        let g = guard(&[("google.text", 1, 1, Duration::from_millis(100))], 1.0);
        let cancel = CancelToken::new();
        let req = AcquireRequest::new("google.text", Split::Secondary).deadline(Duration::from_secs(2));
        g.acquire(req.clone(), &cancel).await.unwrap();
        let started = std::time::Instant::now();
        g.acquire(req, &cancel).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn acquire_returns_cancelled_when_token_already_set() {
        let g = guard(&[("google.text", 10, 0, HOUR)], 0.5);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = g
            .acquire(AcquireRequest::new("google.text", Split::Primary), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, BudgetError::Cancelled);
        assert_eq!(g.available(&text()), Some(10));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_waiting_acquire() {
        let g = guard(&[("google.text", 1, 0, HOUR)], 0.5);
        let cancel = CancelToken::new();
        let trip = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trip.cancel();
        });
        let req = AcquireRequest::new("google.text", Split::Primary)
            .tokens(5)
            .deadline(Duration::from_secs(10));
        let started = std::time::Instant::now();
        let err = g.acquire(req, &cancel).await.unwrap_err();
        assert_eq!(err, BudgetError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn acquire_unknown_connector_fails_without_waiting() {
        let g = guard(&[("google.text", 1, 0, HOUR)], 0.5);
        let req = AcquireRequest::new("tavily.api", Split::Primary).deadline(Duration::from_secs(10));
        let started = std::time::Instant::now();
        let err = g.acquire(req, &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, BudgetError::UnknownConnector(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_over_the_bound_admit_at_most_one() {
        let g = Arc::new(guard(&[("google.text", 10, 0, HOUR)], 0.5));
        let cancel = CancelToken::new();
        let mut handles = Vec::new();
        for _ in 0..2 {
            let g = Arc::clone(&g);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let req = AcquireRequest::new("google.text", Split::Secondary)
                    .tokens(4)
                    .deadline(Duration::from_millis(150));
                g.acquire(req, &cancel).await
            }));
        }
        let mut ok = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        // Secondary quota is 5: 4 + 4 does not fit.
        assert_eq!(ok, 1);
        assert_eq!(g.quota(Split::Secondary).used, 4);
        assert_eq!(g.available(&text()), Some(6));
    }

    #[tokio::test]
    async fn acquire_reports_outcomes_to_metrics() {
        let metrics = Arc::new(RecordingMetrics::default());
        let g = BudgetGuard::new(
            &budgets(&[("google.text", 2, 0, HOUR)]),
            0.5,
            metrics.clone(),
        )
        .unwrap()
        .with_poll_interval(Duration::from_millis(5));
        let cancel = CancelToken::new();
        g.acquire(AcquireRequest::new("google.text", Split::Primary), &cancel)
            .await
            .unwrap();
        let req = AcquireRequest::new("google.text", Split::Primary).deadline(Duration::from_millis(20));
        assert!(g.acquire(req, &cancel).await.is_err());
        g.release(&text(), 1, Split::Primary);

        assert_eq!(metrics.count("budget.acquire", ("outcome", "ok")), 1);
        assert_eq!(metrics.count("budget.acquire", ("outcome", "exceeded")), 1);
        assert_eq!(metrics.count("budget.release", ("split", "primary")), 1);
        let util = metrics.named("budget.utilization");
        assert_eq!(util.len(), 1);
        assert!((util[0].value - 1.0).abs() < 1e-9);
        assert_eq!(metrics.named("budget.wait").len(), 2);
    }
}
