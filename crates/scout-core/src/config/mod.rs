//! Run configuration loaded from `~/.config/scout/config.toml`.
//!
//! The file is read once per run, environment overrides are layered on top
//! (see [`env`]), and the result is validated before anything is built from
//! it. Invalid values fail the run at startup; nothing is silently defaulted.

mod env;
pub(crate) mod validate;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use env::{apply_env_overrides, apply_process_env, env_key};
pub use validate::validate;

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value is out of range, missing or does not parse.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("read {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {}: {}", .path.display(), .source)]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Token bucket parameters for one connector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Maximum tokens the bucket holds; the bucket starts full.
    pub capacity: u64,
    /// Tokens added per elapsed period (0 = never refills).
    pub refill: u64,
    /// Refill period in seconds (e.g. 60.0 = one minute).
    #[serde(default = "default_period_secs")]
    pub period_secs: f64,
}

fn default_period_secs() -> f64 {
    60.0
}

impl BucketConfig {
    pub fn new(capacity: u64, refill: u64, period: Duration) -> Self {
        Self {
            capacity,
            refill,
            period_secs: period.as_secs_f64(),
        }
    }

    /// Refill period as a `Duration`. Only meaningful after validation.
    pub fn period(&self) -> Duration {
        Duration::try_from_secs_f64(self.period_secs).unwrap_or(Duration::MAX)
    }
}

/// Stopping policy thresholds. Zero disables a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoppingConfig {
    /// Stop once this many API calls have been spent (0 = no cap).
    #[serde(default)]
    pub max_api_calls: u64,
    /// Stop once the run has been going this long (0 = no cap).
    #[serde(default)]
    pub max_wall_clock_hours: f64,
    /// Stop once new-unique / total-seen falls below this (0 = disabled).
    #[serde(default)]
    pub min_new_unique_rate: f64,
}

impl Default for StoppingConfig {
    fn default() -> Self {
        Self {
            max_api_calls: 5000,
            max_wall_clock_hours: 2.0,
            min_new_unique_rate: 0.05,
        }
    }
}

impl StoppingConfig {
    /// Wall clock cap as a `Duration` (zero when disabled).
    pub fn max_wall_clock(&self) -> Duration {
        if self.max_wall_clock_hours <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(self.max_wall_clock_hours * 3600.0).unwrap_or(Duration::MAX)
    }
}

/// Web fetch stage parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum concurrent page fetches within the stage.
    pub concurrency: usize,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Bodies larger than this are truncated (bytes).
    pub max_body_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout_secs: 30,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Geocode validation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodeConfig {
    /// Nominatim-compatible endpoint; `/search` is appended.
    pub base_url: String,
    /// Locations below this confidence are looked up.
    pub min_confidence: f64,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            min_confidence: 0.75,
        }
    }
}

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per request (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 0.25,
            max_delay_secs: 10,
        }
    }
}

/// Global configuration for one city job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoutConfig {
    /// Fraction of total bucket capacity reserved for primary work (0.7 = 70/30).
    pub split_ratio: f64,
    #[serde(default)]
    pub stopping: StoppingConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub geocode: GeocodeConfig,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Per-connector token buckets, keyed by connector id (e.g. "nominatim").
    #[serde(default)]
    pub budgets: BTreeMap<String, BucketConfig>,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        let minute = Duration::from_secs(60);
        let budgets = [
            ("nominatim", BucketConfig::new(60, 60, minute)),
            ("web.fetch", BucketConfig::new(600, 60, minute)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            split_ratio: 0.7,
            stopping: StoppingConfig::default(),
            fetch: FetchConfig::default(),
            geocode: GeocodeConfig::default(),
            retry: None,
            budgets,
        }
    }
}

impl ScoutConfig {
    /// Retry settings, falling back to defaults when the section is absent.
    pub fn retry_or_default(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("scout")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<ScoutConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = ScoutConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    Ok(load_from_path(&path)?)
}

/// Parse a config file without applying overrides or validation.
pub fn load_from_path(path: &Path) -> std::result::Result<ScoutConfig, ConfigError> {
    let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&data).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load (explicit path or the XDG default), apply process env overrides and validate.
pub fn resolve(path: Option<&Path>) -> Result<ScoutConfig> {
    let mut cfg = match path {
        Some(p) => load_from_path(p)?,
        None => load_or_init()?,
    };
    apply_process_env(&mut cfg)?;
    validate(&cfg)?;
    Ok(cfg)
}
