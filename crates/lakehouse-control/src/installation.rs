//! The installation aggregate: one data lake being set up in the wizard.

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::deployment::{
    AttemptGuard, DeploymentContext, DeploymentOrchestrator, DeploymentTracker, TrackerSnapshot,
};
use crate::error::{ControlError, ControlResult};
use crate::remote::InstallationApi;
use crate::store::{ResourceStore, StoreState};
use crate::types::{
    AccountContext, AttemptId, InstallationDetails, InstallationId, UserDirectory,
};

/// An installation with its cached remote state and deployment progress.
///
/// The details and users stores are shared with the session registries, so
/// every holder of the same installation id observes the same lifecycle.
pub struct Installation {
    id: InstallationId,
    account: AccountContext,
    details: Arc<ResourceStore<InstallationDetails>>,
    users: Arc<ResourceStore<UserDirectory>>,
    tracker: Arc<DeploymentTracker>,
    api: Arc<dyn InstallationApi>,
    orchestrator: Arc<dyn DeploymentOrchestrator>,
}

impl Installation {
    pub(crate) fn new(
        id: InstallationId,
        account: AccountContext,
        details: Arc<ResourceStore<InstallationDetails>>,
        users: Arc<ResourceStore<UserDirectory>>,
        tracker: Arc<DeploymentTracker>,
        api: Arc<dyn InstallationApi>,
        orchestrator: Arc<dyn DeploymentOrchestrator>,
    ) -> Self {
        Self {
            id,
            account,
            details,
            users,
            tracker,
            api,
            orchestrator,
        }
    }

    #[must_use]
    pub const fn id(&self) -> &InstallationId {
        &self.id
    }

    #[must_use]
    pub const fn account(&self) -> &AccountContext {
        &self.account
    }

    /// Store caching the installation's remote details.
    #[must_use]
    pub fn details(&self) -> &Arc<ResourceStore<InstallationDetails>> {
        &self.details
    }

    /// Store caching the installation's users.
    #[must_use]
    pub fn users(&self) -> &Arc<ResourceStore<UserDirectory>> {
        &self.users
    }

    /// Tracker of the installation's deployment attempts.
    #[must_use]
    pub fn tracker(&self) -> &Arc<DeploymentTracker> {
        &self.tracker
    }

    /// Context handed to the orchestrator for each attempt.
    #[must_use]
    pub fn context(&self) -> DeploymentContext {
        DeploymentContext {
            installation_id: self.id.clone(),
            account: self.account.clone(),
        }
    }

    /// Load or refresh the installation details.
    pub async fn load_details(&self) -> StoreState<InstallationDetails> {
        let api = Arc::clone(&self.api);
        let id = self.id.clone();
        self.details
            .load(move || async move { api.fetch_installation(&id).await })
            .await
    }

    /// Load or refresh the installation's users.
    pub async fn load_users(&self) -> StoreState<UserDirectory> {
        let api = Arc::clone(&self.api);
        let id = self.id.clone();
        let account = self.account.clone();
        self.users
            .load(move || async move { api.list_users(&id, &account).await })
            .await
    }

    /// Current deployment progress.
    #[must_use]
    pub fn deployment(&self) -> TrackerSnapshot {
        self.tracker.snapshot()
    }

    /// Start a deployment attempt on a background task.
    ///
    /// Also the retry entry point after a failure: the previous attempt's
    /// operations are cleared. Rejected with
    /// [`ControlError::DeploymentInProgress`] while an attempt is running.
    ///
    /// If the orchestrator panics or its task is cancelled, the attempt is
    /// closed as a failure so a retry can be triggered.
    pub fn trigger_deployment(&self) -> ControlResult<DeploymentHandle> {
        let guard = AttemptGuard::new(self.tracker.begin_attempt()?);
        let attempt = guard.reporter()?.attempt().clone();
        let orchestrator = Arc::clone(&self.orchestrator);
        let context = self.context();

        info!(
            installation_id = %self.id,
            attempt = %attempt,
            "deployment triggered"
        );

        let task = tokio::spawn(async move {
            let result = orchestrator.deploy(&context, guard.reporter()?).await;
            guard.finish(result)
        });

        Ok(DeploymentHandle {
            installation_id: self.id.clone(),
            attempt,
            task,
        })
    }
}

impl fmt::Debug for Installation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Installation")
            .field("id", &self.id)
            .field("account", &self.account)
            .field("details", &self.details.phase())
            .field("users", &self.users.phase())
            .finish_non_exhaustive()
    }
}

/// Handle to a running deployment attempt.
///
/// Dropping the handle does not cancel the attempt.
#[derive(Debug)]
pub struct DeploymentHandle {
    installation_id: InstallationId,
    attempt: AttemptId,
    task: JoinHandle<ControlResult<TrackerSnapshot>>,
}

impl DeploymentHandle {
    #[must_use]
    pub const fn attempt(&self) -> &AttemptId {
        &self.attempt
    }

    /// Whether the attempt's task has completed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the attempt to finish and return the final progress.
    pub async fn wait(self) -> ControlResult<TrackerSnapshot> {
        self.task.await.map_err(|e| {
            error!(
                installation_id = %self.installation_id,
                attempt = %self.attempt,
                error = %e,
                "deployment task did not complete"
            );
            ControlError::internal(format!("deployment task failed: {e}"))
        })?
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::DeploymentConfig;
    use crate::deployment::{
        MockPipelineProbe, OperationReporter, PollingOrchestrator, StageScript,
    };
    use crate::operation::OperationStatus;
    use crate::remote::MockInstallationApi;
    use crate::store::StoreKey;
    use crate::types::ErrorDetail;

    fn installation(api: Arc<MockInstallationApi>, probe: Arc<MockPipelineProbe>) -> Installation {
        let config = DeploymentConfig {
            poll_interval_ms: 50,
            ..DeploymentConfig::default()
        };
        with_orchestrator(api, Arc::new(PollingOrchestrator::new(&config, probe)))
    }

    fn with_orchestrator(
        api: Arc<MockInstallationApi>,
        orchestrator: Arc<dyn DeploymentOrchestrator>,
    ) -> Installation {
        let id = InstallationId::new("abc");
        let key = StoreKey::parse("abc").unwrap();
        Installation::new(
            id.clone(),
            AccountContext::new("123456789012", "us-east-1"),
            Arc::new(ResourceStore::new(key.clone())),
            Arc::new(ResourceStore::new(key)),
            Arc::new(DeploymentTracker::new(id, Arc::new(SystemClock))),
            api,
            orchestrator,
        )
    }

    /// Panics on its first run after starting one step, then succeeds.
    #[derive(Default)]
    struct PanicsOnce {
        runs: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DeploymentOrchestrator for PanicsOnce {
        async fn deploy(
            &self,
            _context: &DeploymentContext,
            reporter: &OperationReporter,
        ) -> Result<(), ErrorDetail> {
            let run = self.runs.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let id = reporter.start_operation("Create cross-account roles").unwrap();
            if run == 0 {
                panic!("stack template rendering failed");
            }
            reporter.complete_operation(id, Ok(())).unwrap();
            Ok(())
        }
    }

    #[tokio::test]
    async fn load_details_goes_through_api() {
        let api = Arc::new(MockInstallationApi::new());
        api.set_installation(
            "abc",
            InstallationDetails::from_json(r#"{"id": "abc", "name": "Main lake"}"#),
        );
        let installation = installation(Arc::clone(&api), Arc::default());

        let state = installation.load_details().await;

        assert!(state.is_ready());
        assert_eq!(state.data().unwrap().name, "Main lake");
        assert_eq!(api.installation_calls("abc"), 1);
        assert!(installation.users().is_new());
    }

    #[tokio::test]
    async fn failed_users_load_is_recorded_on_store() {
        let api = Arc::new(MockInstallationApi::new());
        api.set_users("abc", Err(ErrorDetail::new("AccessDenied")));
        let installation = installation(api, Arc::default());

        let state = installation.load_users().await;

        assert!(state.is_error());
        assert_eq!(state.error().unwrap().message, "AccessDenied");
    }

    #[tokio::test(start_paused = true)]
    async fn triggered_deployment_runs_to_success() {
        let installation = installation(Arc::default(), Arc::default());

        let handle = installation.trigger_deployment().unwrap();
        assert!(installation.tracker().is_running());
        let snapshot = handle.wait().await.unwrap();

        assert!(snapshot.is_success());
        assert_eq!(snapshot.operations.len(), 4);
        assert!(!installation.tracker().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_while_running_is_rejected() {
        let probe = Arc::new(MockPipelineProbe::default());
        probe.script("iam_roles", StageScript::Succeed { polls: 5 });
        let installation = installation(Arc::default(), probe);

        let handle = installation.trigger_deployment().unwrap();
        let err = installation.trigger_deployment().unwrap_err();
        assert_eq!(
            err,
            ControlError::DeploymentInProgress(InstallationId::new("abc"))
        );

        let snapshot = handle.wait().await.unwrap();
        assert!(snapshot.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_failure_starts_fresh_attempt() {
        let probe = Arc::new(MockPipelineProbe::default());
        probe.script(
            "lake_stack",
            StageScript::Fail {
                polls: 0,
                error: ErrorDetail::new("ROLLBACK_COMPLETE"),
            },
        );
        let installation = installation(Arc::default(), Arc::clone(&probe));

        let first = installation.trigger_deployment().unwrap();
        let first_attempt = first.attempt().clone();
        let failed = first.wait().await.unwrap();
        assert!(failed.is_failure());
        assert_eq!(failed.operations[1].status, OperationStatus::Failure);

        probe.script("lake_stack", StageScript::default());
        let second = installation.trigger_deployment().unwrap();
        assert_ne!(second.attempt(), &first_attempt);
        assert!(installation.deployment().operations.is_empty());

        let snapshot = second.wait().await.unwrap();
        assert!(snapshot.is_success());
        assert!(snapshot
            .operations
            .iter()
            .all(|op| op.status == OperationStatus::Success));
    }

    #[tokio::test]
    async fn panicking_orchestrator_fails_attempt_and_allows_retry() {
        let installation = with_orchestrator(Arc::default(), Arc::new(PanicsOnce::default()));

        let handle = installation.trigger_deployment().unwrap();
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, ControlError::Internal(_)));

        let snapshot = installation.deployment();
        assert!(!snapshot.running);
        assert!(snapshot.is_failure());
        assert_eq!(
            snapshot.overall.error.as_ref().unwrap().message,
            "orchestrator aborted"
        );
        assert_eq!(snapshot.operations[0].status, OperationStatus::Failure);

        let retry = installation.trigger_deployment().unwrap();
        let snapshot = retry.wait().await.unwrap();
        assert!(snapshot.is_success());
        assert_eq!(snapshot.operations.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_deployment_task_closes_attempt() {
        let installation = with_orchestrator(Arc::default(), Arc::new(Stalls));

        let handle = installation.trigger_deployment().unwrap();
        tokio::task::yield_now().await;
        handle.task.abort();
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, ControlError::Internal(_)));

        assert!(!installation.tracker().is_running());
        assert!(installation.tracker().is_failure());
        assert!(installation.trigger_deployment().is_ok());
    }

    /// Never returns once started.
    struct Stalls;

    #[async_trait::async_trait]
    impl DeploymentOrchestrator for Stalls {
        async fn deploy(
            &self,
            _context: &DeploymentContext,
            _reporter: &OperationReporter,
        ) -> Result<(), ErrorDetail> {
            std::future::pending().await
        }
    }
}
