//! Run cancellation: a shared abort token.
//!
//! One token is created per run and cloned into the guard's acquire loop and
//! every stage. Tripping it (e.g. on Ctrl-C) makes waiting acquisitions return
//! `Cancelled` and stops the runner before the next stage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable abort flag shared by everything working on one run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
