//! Budget acquisition errors.

use super::{Connector, Split};

/// Why `BudgetGuard::acquire` did not hand out tokens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BudgetError {
    /// Bucket and split quota could not both be satisfied before the deadline.
    /// Recoverable: the caller may retry later, skip the call, or back off.
    #[error("budget exceeded: {tokens} token(s) on {connector} ({split}) not available before deadline")]
    Exceeded {
        connector: Connector,
        split: Split,
        tokens: u64,
    },
    /// The run's cancel token fired while waiting.
    #[error("budget acquisition cancelled")]
    Cancelled,
    /// No bucket is configured for this connector.
    #[error("no budget configured for connector {0}")]
    UnknownConnector(Connector),
}
