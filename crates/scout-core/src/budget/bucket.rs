//! Per-connector token bucket with lazy, whole-period refill.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct BucketState {
    tokens: u64,
    last_refill: Instant,
}

/// Token bucket guarding one connector. Starts full.
///
/// Refill is lazy: each `take` first adds `refill` tokens per whole `period`
/// elapsed since the last refill (capped at `capacity`) and then moves the
/// refill timestamp to the current instant. Any fractional period left over
/// is dropped, so refill timing is reproducible rather than drift-free.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u64,
    refill: u64,
    period: Duration,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: u64, refill: u64, period: Duration) -> Self {
        Self::starting_at(capacity, refill, period, Instant::now())
    }

    pub(crate) fn starting_at(capacity: u64, refill: u64, period: Duration, now: Instant) -> Self {
        Self {
            capacity,
            refill,
            period,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        // Every update below leaves the state consistent, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refill_locked(&self, state: &mut BucketState, now: Instant) {
        if self.refill == 0 || self.period.is_zero() {
            return;
        }
        let elapsed = now.saturating_duration_since(state.last_refill);
        if elapsed < self.period {
            return;
        }
        let steps = u64::try_from(elapsed.as_nanos() / self.period.as_nanos()).unwrap_or(u64::MAX);
        state.tokens = state
            .tokens
            .saturating_add(steps.saturating_mul(self.refill))
            .min(self.capacity);
        state.last_refill = now;
    }

    /// Take `n` tokens if available. On failure nothing is deducted.
    pub fn take(&self, n: u64) -> bool {
        self.take_at(n, Instant::now())
    }

    pub(crate) fn take_at(&self, n: u64, now: Instant) -> bool {
        let mut state = self.lock();
        self.refill_locked(&mut state, now);
        if state.tokens >= n {
            state.tokens -= n;
            return true;
        }
        false
    }

    /// Return `n` tokens (e.g. an unused reservation), capped at capacity.
    pub fn put(&self, n: u64) {
        let mut state = self.lock();
        state.tokens = state.tokens.saturating_add(n).min(self.capacity);
    }

    /// Tokens currently in the bucket, without applying pending refill.
    pub fn tokens(&self) -> u64 {
        self.lock().tokens
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}
