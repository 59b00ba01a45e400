//! Page fetch error type for retry classification.

use std::fmt;

use crate::budget::BudgetError;

/// Error returned by one fetch attempt (budget, curl failure or HTTP error).
/// Kept concrete so the retry loop can classify it before it becomes anyhow.
#[derive(Debug)]
pub enum FetchError {
    /// No budget could be acquired for the attempt. Never retried here; the
    /// guard already waited up to its deadline.
    Budget(BudgetError),
    /// Curl reported an error (timeout, connection, etc.).
    Curl(curl::Error),
    /// HTTP response had a non-2xx status.
    Http(u32),
    /// The body did not decode as the expected JSON.
    Decode(serde_json::Error),
    /// The blocking transfer task panicked or was cancelled.
    Task(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Budget(e) => write!(f, "budget: {}", e),
            FetchError::Curl(e) => write!(f, "{}", e),
            FetchError::Http(code) => write!(f, "HTTP {}", code),
            FetchError::Decode(e) => write!(f, "decode body: {}", e),
            FetchError::Task(msg) => write!(f, "fetch task: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Budget(e) => Some(e),
            FetchError::Curl(e) => Some(e),
            FetchError::Decode(e) => Some(e),
            FetchError::Http(_) | FetchError::Task(_) => None,
        }
    }
}

impl From<BudgetError> for FetchError {
    fn from(e: BudgetError) -> Self {
        FetchError::Budget(e)
    }
}

impl From<curl::Error> for FetchError {
    fn from(e: curl::Error) -> Self {
        FetchError::Curl(e)
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Decode(e)
    }
}
