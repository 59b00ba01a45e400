//! Retry and backoff for outbound requests.
//!
//! Classifies failures (timeouts, throttling, connection errors) and applies
//! capped exponential backoff so every stage making external calls shares one
//! policy.

mod classify;
mod error;
mod policy;
mod run;

pub use classify::{classify, classify_curl_error, classify_http_status, request_not_sent};
pub use error::FetchError;
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::run_with_retry;
