//! Startup validation. Every check maps to `ConfigError::Invalid`.

use std::time::Duration;

use super::{BucketConfig, ConfigError, ScoutConfig};

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

pub(crate) fn validate_split_ratio(ratio: f64) -> Result<(), ConfigError> {
    if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
        return Err(invalid(format!("split_ratio {ratio} must be within [0, 1]")));
    }
    Ok(())
}

pub(crate) fn validate_bucket(id: &str, bucket: &BucketConfig) -> Result<(), ConfigError> {
    if id.trim().is_empty() {
        return Err(invalid("connector id must not be empty"));
    }
    if bucket.capacity == 0 {
        return Err(invalid(format!("budgets.{id}.capacity must be at least 1")));
    }
    if bucket.period_secs <= 0.0 || Duration::try_from_secs_f64(bucket.period_secs).is_err() {
        return Err(invalid(format!(
            "budgets.{id}.period_secs {} must be a positive number of seconds",
            bucket.period_secs
        )));
    }
    Ok(())
}

/// Check the whole configuration.
pub fn validate(cfg: &ScoutConfig) -> Result<(), ConfigError> {
    validate_split_ratio(cfg.split_ratio)?;
    for (id, bucket) in &cfg.budgets {
        validate_bucket(id, bucket)?;
    }

    let stopping = &cfg.stopping;
    if !stopping.max_wall_clock_hours.is_finite() || stopping.max_wall_clock_hours < 0.0 {
        return Err(invalid("stopping.max_wall_clock_hours must be >= 0"));
    }
    let rate = stopping.min_new_unique_rate;
    if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
        return Err(invalid("stopping.min_new_unique_rate must be within [0, 1]"));
    }

    if cfg.fetch.concurrency == 0 {
        return Err(invalid("fetch.concurrency must be at least 1"));
    }
    let geocode = &cfg.geocode;
    match url::Url::parse(&geocode.base_url) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => {}
        _ => {
            return Err(invalid(format!(
                "geocode.base_url {:?} must be an http(s) URL",
                geocode.base_url
            )))
        }
    }
    if !geocode.min_confidence.is_finite() || !(0.0..=1.0).contains(&geocode.min_confidence) {
        return Err(invalid("geocode.min_confidence must be within [0, 1]"));
    }
    if let Some(retry) = &cfg.retry {
        if retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if Duration::try_from_secs_f64(retry.base_delay_secs).is_err() {
            return Err(invalid(format!(
                "retry.base_delay_secs {} must be a non-negative number of seconds",
                retry.base_delay_secs
            )));
        }
    }
    Ok(())
}
