//! Resource governor for connector usage.
//!
//! Two constraints must both hold before tokens are committed:
//! - the connector's own [`TokenBucket`] (protects the external API's rate limit)
//! - the split quota (only a configured fraction of total capacity may go to
//!   secondary, exploratory work)
//!
//! [`BudgetGuard`] composes the two behind `acquire` / `release` / `rebalance`.
//! Each bucket has its own lock; split bookkeeping sits behind one guard-wide
//! lock that is always taken before any bucket lock.

mod bucket;
mod error;
mod guard;
mod quota;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use bucket::TokenBucket;
pub use error::BudgetError;
pub use guard::{
    AcquireRequest, BudgetGuard, DEFAULT_ACQUIRE_DEADLINE, DEFAULT_POLL_INTERVAL,
};
pub use quota::{SplitQuota, SplitQuotas};

/// Connector id for plain HTTP page fetches.
pub const WEB_FETCH: &str = "web.fetch";

/// Connector id for the Nominatim geocoding API.
pub const NOMINATIM: &str = "nominatim";

/// Identifier of an external rate-limited resource (e.g. "nominatim").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Connector(String);

impl Connector {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Connector {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Connector {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Business budget category, independent of connector identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    /// Seed work.
    Primary,
    /// Exploratory work.
    Secondary,
}

impl Split {
    pub fn as_str(self) -> &'static str {
        match self {
            Split::Primary => "primary",
            Split::Secondary => "secondary",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
