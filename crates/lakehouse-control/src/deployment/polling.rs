//! Orchestrator that runs configured stages and polls each to completion.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{DeploymentContext, DeploymentOrchestrator, OperationReporter};
use crate::config::{DeploymentConfig, StageConfig};
use crate::operation::Outcome;
use crate::types::ErrorDetail;

/// Progress of a remote stage as seen by one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageProgress {
    /// Still working.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with a failure.
    Failed(ErrorDetail),
}

/// Remote side of the pipeline: kicks off a stage and reports its progress.
#[async_trait]
pub trait PipelineProbe: Send + Sync {
    /// Start the remote work for `stage`.
    async fn start(
        &self,
        stage: &StageConfig,
        context: &DeploymentContext,
    ) -> Result<(), ErrorDetail>;

    /// Check on a started stage.
    async fn poll(
        &self,
        stage: &StageConfig,
        context: &DeploymentContext,
    ) -> Result<StageProgress, ErrorDetail>;
}

/// Runs stages in order, polling each until it settles or times out.
///
/// Every stage is enqueued as a pending operation before the first one
/// starts. The first failed stage stops the pipeline; later stages stay
/// pending. A failed poll fails the stage, it is not retried.
pub struct PollingOrchestrator {
    stages: Vec<StageConfig>,
    poll_interval: Duration,
    stage_timeout: Duration,
    probe: Arc<dyn PipelineProbe>,
}

impl PollingOrchestrator {
    /// Create an orchestrator from the deployment configuration.
    #[must_use]
    pub fn new(config: &DeploymentConfig, probe: Arc<dyn PipelineProbe>) -> Self {
        Self {
            stages: config.stages.clone(),
            poll_interval: config.poll_interval(),
            stage_timeout: config.stage_timeout(),
            probe,
        }
    }

    /// Stages run by this orchestrator.
    #[must_use]
    pub fn stages(&self) -> &[StageConfig] {
        &self.stages
    }

    async fn run_stage(&self, stage: &StageConfig, context: &DeploymentContext) -> Outcome {
        self.probe.start(stage, context).await?;

        match tokio::time::timeout(self.stage_timeout, self.poll_until_settled(stage, context))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ErrorDetail::new("timeout").with_code("StageTimeout")),
        }
    }

    async fn poll_until_settled(&self, stage: &StageConfig, context: &DeploymentContext) -> Outcome {
        loop {
            match self.probe.poll(stage, context).await? {
                StageProgress::Running => {
                    debug!(stage = %stage.name, "stage still running");
                    tokio::time::sleep(self.poll_interval).await;
                }
                StageProgress::Succeeded => return Ok(()),
                StageProgress::Failed(error) => return Err(error),
            }
        }
    }
}

#[async_trait]
impl DeploymentOrchestrator for PollingOrchestrator {
    async fn deploy(
        &self,
        context: &DeploymentContext,
        reporter: &OperationReporter,
    ) -> Result<(), ErrorDetail> {
        let report_err = |e: crate::error::ControlError| ErrorDetail::new(e.to_string());

        let mut ids = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            ids.push(reporter.enqueue_operation(&stage.label).map_err(report_err)?);
        }

        for (stage, id) in self.stages.iter().zip(ids) {
            reporter.mark_in_progress(id).map_err(report_err)?;
            info!(
                installation_id = %context.installation_id,
                stage = %stage.name,
                "stage started"
            );

            let outcome = self.run_stage(stage, context).await;
            let failed = outcome.is_err();
            reporter
                .complete_operation(id, outcome)
                .map_err(report_err)?;

            if failed {
                warn!(
                    installation_id = %context.installation_id,
                    stage = %stage.name,
                    "stage failed, stopping pipeline"
                );
                return Ok(());
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for PollingOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingOrchestrator")
            .field("stages", &self.stages)
            .field("poll_interval", &self.poll_interval)
            .field("stage_timeout", &self.stage_timeout)
            .finish_non_exhaustive()
    }
}

/// Scripted behaviour of one stage in [`MockPipelineProbe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageScript {
    /// Report `Running` for `polls` polls, then succeed.
    Succeed { polls: u32 },
    /// Report `Running` for `polls` polls, then fail.
    Fail { polls: u32, error: ErrorDetail },
    /// Refuse to start.
    RejectStart(ErrorDetail),
    /// Never finish.
    Hang,
}

impl Default for StageScript {
    fn default() -> Self {
        Self::Succeed { polls: 1 }
    }
}

/// Mock pipeline probe for testing and simulation.
///
/// Stages without a script succeed after one `Running` poll.
#[derive(Debug, Default)]
pub struct MockPipelineProbe {
    scripts: RwLock<HashMap<String, StageScript>>,
    polls: RwLock<HashMap<String, u32>>,
    started: RwLock<Vec<String>>,
}

impl MockPipelineProbe {
    /// Script the behaviour of `stage` for subsequent starts.
    pub fn script(&self, stage: &str, script: StageScript) {
        let mut scripts = self.scripts.write().unwrap_or_else(|e| e.into_inner());
        scripts.insert(stage.to_owned(), script);
    }

    /// Stage names in the order they were started, across all attempts.
    #[must_use]
    pub fn started(&self) -> Vec<String> {
        self.started
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn script_for(&self, stage: &str) -> StageScript {
        self.scripts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(stage)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl PipelineProbe for MockPipelineProbe {
    async fn start(
        &self,
        stage: &StageConfig,
        _context: &DeploymentContext,
    ) -> Result<(), ErrorDetail> {
        if let StageScript::RejectStart(error) = self.script_for(&stage.name) {
            return Err(error);
        }
        self.started
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(stage.name.clone());
        self.polls
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(stage.name.clone(), 0);
        Ok(())
    }

    async fn poll(
        &self,
        stage: &StageConfig,
        _context: &DeploymentContext,
    ) -> Result<StageProgress, ErrorDetail> {
        let seen = {
            let mut polls = self.polls.write().unwrap_or_else(|e| e.into_inner());
            let count = polls.entry(stage.name.clone()).or_insert(0);
            *count += 1;
            *count
        };

        Ok(match self.script_for(&stage.name) {
            StageScript::Succeed { polls } if seen > polls => StageProgress::Succeeded,
            StageScript::Fail { polls, error } if seen > polls => StageProgress::Failed(error),
            StageScript::RejectStart(error) => StageProgress::Failed(error),
            _ => StageProgress::Running,
        })
    }
}
