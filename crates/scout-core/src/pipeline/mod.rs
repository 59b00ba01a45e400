//! Job pipeline: stage contract, accumulated state and the runner.

mod error;
mod job;
mod result;
mod runner;
mod stage;
mod stats;
mod types;

pub use error::PipelineError;
pub use job::{JobSpec, SeedPlace, SeedSpec};
pub use result::{RunOutcome, RunResult, Summary};
pub use runner::PipelineRunner;
pub use stage::{Stage, StageInput, StageOutput};
pub use stats::Stats;
pub use types::{Coordinates, Location, LocationKind, StageMetrics, WebSource};
