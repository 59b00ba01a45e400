/// Why a run ended without a result.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A stage returned an error; later stages did not run.
    #[error("stage {stage} failed")]
    StageFailed {
        stage: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    /// The run was cancelled before or during `stage`.
    #[error("run cancelled at stage {stage}")]
    Cancelled { stage: String },
}

impl PipelineError {
    /// Name of the stage the run ended at.
    pub fn stage(&self) -> &str {
        match self {
            PipelineError::StageFailed { stage, .. } | PipelineError::Cancelled { stage } => stage,
        }
    }
}
