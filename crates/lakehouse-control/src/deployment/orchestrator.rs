//! The collaborator that drives a deployment pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::OperationReporter;
use crate::types::{AccountContext, ErrorDetail, InstallationId};

/// What an orchestrator needs to know about the installation it deploys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentContext {
    /// Installation being deployed.
    pub installation_id: InstallationId,
    /// Account and credentials the pipeline runs against.
    pub account: AccountContext,
}

/// Drives a sequence of remote calls for one deployment attempt.
///
/// Progress is reported through `reporter` as steps start and finish. A
/// step failure is reported on its operation and the orchestrator returns
/// `Ok(())`; `Err` is reserved for failures that belong to no single step
/// (the pipeline could not be started at all, the reporter rejected a
/// report), and becomes the overall error of the attempt.
#[async_trait]
pub trait DeploymentOrchestrator: Send + Sync {
    /// Run one attempt to completion.
    async fn deploy(
        &self,
        context: &DeploymentContext,
        reporter: &OperationReporter,
    ) -> Result<(), ErrorDetail>;
}
