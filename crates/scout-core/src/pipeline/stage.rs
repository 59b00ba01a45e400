//! Stage contract.

use async_trait::async_trait;

use super::job::JobSpec;
use super::types::{Location, StageMetrics, WebSource};
use crate::control::CancelToken;

/// Read-only view of the run handed to a stage.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    pub job: &'a JobSpec,
    pub correlation_id: &'a str,
    /// Locations accumulated by earlier stages.
    pub locations: &'a [Location],
    /// URLs accumulated by earlier stages.
    pub urls: &'a [WebSource],
    pub cancel: &'a CancelToken,
}

/// What a stage hands back. An empty list leaves the accumulated one as is.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub locations: Vec<Location>,
    pub urls: Vec<WebSource>,
    pub metrics: StageMetrics,
}

/// One step of a job. Stages must acquire budget before every external call
/// and report what they spent in [`StageOutput::metrics`].
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, input: StageInput<'_>) -> anyhow::Result<StageOutput>;
}
