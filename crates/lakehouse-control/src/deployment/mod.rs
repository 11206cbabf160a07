//! Deployment progress tracking and orchestration.
//!
//! A [`DeploymentTracker`] holds the ordered operations of the current
//! deployment attempt and their derived overall status. A
//! [`DeploymentOrchestrator`] drives the remote pipeline and reports into
//! the tracker through an [`OperationReporter`] bound to one attempt.

mod orchestrator;
mod polling;
mod tracker;

pub use orchestrator::{DeploymentContext, DeploymentOrchestrator};
pub use polling::{
    MockPipelineProbe, PipelineProbe, PollingOrchestrator, StageProgress, StageScript,
};
pub use tracker::{
    DeploymentTracker, OperationReporter, TrackerSnapshot, TrackerView, OVERALL_LABEL,
};
pub(crate) use tracker::AttemptGuard;
