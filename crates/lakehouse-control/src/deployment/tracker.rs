//! Progress tracking for one installation's deployment pipeline.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{ControlError, ControlResult};
use crate::operation::{
    aggregate, Operation, OperationId, OperationStatus, OperationView, Outcome,
};
use crate::types::{AttemptId, ErrorDetail, InstallationId};

/// Label of the derived overall operation.
pub const OVERALL_LABEL: &str = "Deployment";

const ABANDONED: &str = "abandoned by orchestrator";
const ABORTED: &str = "orchestrator aborted";
const EMPTY_ATTEMPT: &str = "no operations reported";

/// Consistent view of a tracker at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerSnapshot {
    /// Attempt being tracked; `None` until the first trigger.
    pub attempt: Option<AttemptId>,
    /// Operations of the current attempt, in execution order.
    pub operations: Vec<Operation>,
    /// Aggregate of `operations`.
    pub overall: Operation,
    /// Whether the orchestrator for the current attempt is still running.
    pub running: bool,
    #[serde(skip)]
    attempt_error: Option<ErrorDetail>,
}

impl TrackerSnapshot {
    fn idle() -> Self {
        Self {
            attempt: None,
            operations: Vec::new(),
            overall: aggregate(OVERALL_LABEL, &[]),
            running: false,
            attempt_error: None,
        }
    }

    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.overall.status == OperationStatus::InProgress
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.overall.status == OperationStatus::Failure
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.overall.status == OperationStatus::Success
    }

    /// First operation that failed, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<(OperationId, &Operation)> {
        self.operations
            .iter()
            .enumerate()
            .find(|(_, op)| op.status == OperationStatus::Failure)
            .map(|(index, op)| (OperationId::new(index), op))
    }

    /// Owned projection for the rendering layer.
    #[must_use]
    pub fn view(&self, now: DateTime<Utc>) -> TrackerView {
        TrackerView {
            attempt: self.attempt.clone(),
            operations: self.operations.iter().map(|op| op.view(now)).collect(),
            overall: self.overall.view(now),
            is_in_progress: self.is_in_progress(),
            is_failure: self.is_failure(),
            is_success: self.is_success(),
        }
    }

    fn recompute(&mut self) {
        let mut overall = aggregate(OVERALL_LABEL, &self.operations);
        if self.running && self.operations.is_empty() {
            overall.status = OperationStatus::InProgress;
        }
        if let Some(error) = &self.attempt_error {
            overall.status = OperationStatus::Failure;
            overall.error = Some(error.clone());
        }
        self.overall = overall;
    }

    fn operation_mut(&mut self, id: OperationId) -> ControlResult<&mut Operation> {
        self.operations
            .get_mut(id.index())
            .ok_or_else(|| ControlError::UnknownOperation(id.to_string()))
    }
}

/// Tracker as exposed to the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<AttemptId>,
    pub operations: Vec<OperationView>,
    pub overall: OperationView,
    pub is_in_progress: bool,
    pub is_failure: bool,
    pub is_success: bool,
}

/// Ordered operation sequence of a deployment plus its derived overall
/// status.
///
/// The overall operation is recomputed inside every mutation, so a reader
/// never observes an aggregate that lags the operations it summarises.
pub struct DeploymentTracker {
    installation_id: InstallationId,
    clock: Arc<dyn Clock>,
    state: watch::Sender<TrackerSnapshot>,
}

impl DeploymentTracker {
    /// Create an idle tracker.
    #[must_use]
    pub fn new(installation_id: InstallationId, clock: Arc<dyn Clock>) -> Self {
        let (state, _) = watch::channel(TrackerSnapshot::idle());
        Self {
            installation_id,
            clock,
            state,
        }
    }

    /// Installation this tracker belongs to.
    #[must_use]
    pub const fn installation_id(&self) -> &InstallationId {
        &self.installation_id
    }

    #[must_use]
    pub fn snapshot(&self) -> TrackerSnapshot {
        self.state.borrow().clone()
    }

    /// Subscribe to progress changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TrackerSnapshot> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        self.state.borrow().operations.clone()
    }

    #[must_use]
    pub fn overall(&self) -> Operation {
        self.state.borrow().overall.clone()
    }

    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.state.borrow().is_in_progress()
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.state.borrow().is_failure()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state.borrow().is_success()
    }

    /// Whether an attempt's orchestrator is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    /// First operation that failed in the current attempt.
    #[must_use]
    pub fn first_failure(&self) -> Option<(OperationId, Operation)> {
        self.state
            .borrow()
            .first_failure()
            .map(|(id, op)| (id, op.clone()))
    }

    /// Owned projection for the rendering layer, timed against the clock.
    #[must_use]
    pub fn view(&self) -> TrackerView {
        self.state.borrow().view(self.clock.now())
    }

    /// Start a fresh attempt.
    ///
    /// Clears the operations of any previous attempt. Rejected with
    /// [`ControlError::DeploymentInProgress`] while an attempt is running;
    /// two pipelines never report into one tracker.
    pub fn begin_attempt(self: &Arc<Self>) -> ControlResult<OperationReporter> {
        let attempt = AttemptId::generate();
        let mut rejected = false;

        self.state.send_if_modified(|snapshot| {
            if snapshot.running {
                rejected = true;
                return false;
            }
            *snapshot = TrackerSnapshot {
                attempt: Some(attempt.clone()),
                running: true,
                ..TrackerSnapshot::idle()
            };
            snapshot.recompute();
            true
        });

        if rejected {
            warn!(
                installation_id = %self.installation_id,
                "deployment trigger rejected, an attempt is already running"
            );
            return Err(ControlError::DeploymentInProgress(
                self.installation_id.clone(),
            ));
        }

        info!(
            installation_id = %self.installation_id,
            attempt = %attempt,
            "deployment attempt started"
        );

        Ok(OperationReporter {
            tracker: Arc::clone(self),
            attempt,
        })
    }

    /// Apply `f` to the current attempt, recomputing the aggregate if it
    /// succeeds. Reports against any other attempt are rejected.
    fn mutate<R>(
        &self,
        attempt: &AttemptId,
        f: impl FnOnce(&mut TrackerSnapshot, DateTime<Utc>) -> ControlResult<R>,
    ) -> ControlResult<R> {
        let now = self.clock.now();
        let mut result = Err(ControlError::internal("tracker mutation not applied"));

        self.state.send_if_modified(|snapshot| {
            match &snapshot.attempt {
                Some(current) if current == attempt => {}
                current => {
                    result = Err(ControlError::SupersededAttempt {
                        expected: current
                            .clone()
                            .unwrap_or_else(|| AttemptId::new("none")),
                        actual: attempt.clone(),
                    });
                    return false;
                }
            }
            result = f(snapshot, now);
            if result.is_ok() {
                snapshot.recompute();
                true
            } else {
                false
            }
        });

        if let Err(e) = &result {
            if e.is_contract_violation() {
                error!(installation_id = %self.installation_id, attempt = %attempt, error = %e, "operation contract violated");
            } else {
                warn!(installation_id = %self.installation_id, attempt = %attempt, error = %e, "operation report rejected");
            }
        }
        result
    }
}

impl fmt::Debug for DeploymentTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentTracker")
            .field("installation_id", &self.installation_id)
            .field("overall", &self.state.borrow().overall.status)
            .finish_non_exhaustive()
    }
}

/// Handle through which an orchestrator reports progress for one attempt.
///
/// Reports made after a newer attempt has started are rejected with
/// [`ControlError::SupersededAttempt`] and never touch the new sequence.
#[derive(Clone)]
pub struct OperationReporter {
    tracker: Arc<DeploymentTracker>,
    attempt: AttemptId,
}

impl OperationReporter {
    /// Attempt this reporter is bound to.
    #[must_use]
    pub const fn attempt(&self) -> &AttemptId {
        &self.attempt
    }

    /// Append an operation and mark it in progress.
    pub fn start_operation(&self, label: impl Into<String>) -> ControlResult<OperationId> {
        self.append(label.into(), true)
    }

    /// Append an operation in the `Pending` state.
    ///
    /// Declaring the whole pipeline up front keeps the overall status from
    /// reading `Success` in the gap between two steps.
    pub fn enqueue_operation(&self, label: impl Into<String>) -> ControlResult<OperationId> {
        self.append(label.into(), false)
    }

    fn append(&self, label: String, start: bool) -> ControlResult<OperationId> {
        let id = self.tracker.mutate(&self.attempt, |snapshot, now| {
            if !snapshot.running {
                return Err(ControlError::contract(
                    label.as_str(),
                    "attempt has already finished",
                ));
            }
            let mut op = Operation::pending(label.as_str());
            if start {
                op.begin(now);
            }
            snapshot.operations.push(op);
            Ok(OperationId::new(snapshot.operations.len() - 1))
        })?;
        debug!(attempt = %self.attempt, operation = %label, id = %id, started = start, "operation added");
        Ok(id)
    }

    /// Move a pending operation to `InProgress`.
    pub fn mark_in_progress(&self, id: OperationId) -> ControlResult<()> {
        self.tracker.mutate(&self.attempt, |snapshot, now| {
            let op = snapshot.operation_mut(id)?;
            match op.status {
                OperationStatus::Pending => {
                    op.begin(now);
                    debug!(operation = %op.label, "operation started");
                    Ok(())
                }
                status => Err(ControlError::contract(
                    op.label.as_str(),
                    format!("cannot start an operation that is {status}"),
                )),
            }
        })
    }

    /// Record the outcome of an in-progress operation.
    ///
    /// Completing a pending operation is a contract violation; completing a
    /// finished one is rejected as stale and leaves it untouched.
    pub fn complete_operation(&self, id: OperationId, outcome: Outcome) -> ControlResult<()> {
        self.tracker.mutate(&self.attempt, |snapshot, now| {
            let op = snapshot.operation_mut(id)?;
            match op.status {
                OperationStatus::InProgress => {
                    op.finish(now, outcome);
                    match &op.error {
                        Some(error) => {
                            warn!(operation = %op.label, error = %error, "operation failed");
                        }
                        None => debug!(operation = %op.label, "operation succeeded"),
                    }
                    Ok(())
                }
                OperationStatus::Pending => Err(ControlError::contract(
                    op.label.as_str(),
                    "completed before it was started",
                )),
                status => Err(ControlError::StaleCompletion {
                    operation: op.label.clone(),
                    status: status.as_str(),
                }),
            }
        })
    }

    /// Close the attempt with the orchestrator's own result.
    ///
    /// An orchestration error becomes the overall error. Operations still in
    /// progress are failed as abandoned; pending ones are failed too unless
    /// the attempt already failed, in which case they stay pending (skipped).
    /// An attempt that reported no operations at all ends as a failure.
    pub fn finish(self, result: Result<(), ErrorDetail>) -> ControlResult<TrackerSnapshot> {
        let installation_id = self.tracker.installation_id.clone();
        self.tracker.mutate(&self.attempt, |snapshot, now| {
            if !snapshot.running {
                return Err(ControlError::contract(
                    OVERALL_LABEL,
                    "attempt has already finished",
                ));
            }
            snapshot.running = false;
            snapshot.attempt_error = match result {
                Err(error) => Some(error),
                Ok(()) if snapshot.operations.is_empty() => {
                    Some(ErrorDetail::new(EMPTY_ATTEMPT).with_code("EmptyAttempt"))
                }
                Ok(()) => None,
            };

            let already_failed = snapshot.attempt_error.is_some()
                || snapshot
                    .operations
                    .iter()
                    .any(|op| op.status == OperationStatus::Failure);

            for op in &mut snapshot.operations {
                let abandon = match op.status {
                    OperationStatus::InProgress => true,
                    OperationStatus::Pending => !already_failed,
                    OperationStatus::Success | OperationStatus::Failure => false,
                };
                if abandon {
                    warn!(installation_id = %installation_id, operation = %op.label, "operation left unfinished");
                    if op.started_at.is_none() {
                        op.begin(now);
                    }
                    op.finish(now, Err(ErrorDetail::new(ABANDONED)));
                }
            }
            Ok(())
        })?;

        let snapshot = self.tracker.snapshot();
        snapshot.log_outcome(&installation_id, &self.attempt);
        Ok(snapshot)
    }
}

/// Owns an attempt's reporter until the attempt is closed.
///
/// If the guard is dropped while still holding the reporter, because the
/// orchestrator panicked or its task was cancelled, the attempt is closed
/// as aborted so the tracker never stays running.
pub(crate) struct AttemptGuard {
    reporter: Option<OperationReporter>,
}

impl AttemptGuard {
    pub(crate) const fn new(reporter: OperationReporter) -> Self {
        Self {
            reporter: Some(reporter),
        }
    }

    /// Reporter for the guarded attempt.
    pub(crate) fn reporter(&self) -> ControlResult<&OperationReporter> {
        self.reporter
            .as_ref()
            .ok_or_else(|| ControlError::internal("attempt already closed"))
    }

    /// Close the attempt with the orchestrator's result.
    pub(crate) fn finish(
        mut self,
        result: Result<(), ErrorDetail>,
    ) -> ControlResult<TrackerSnapshot> {
        match self.reporter.take() {
            Some(reporter) => reporter.finish(result),
            None => Err(ControlError::internal("attempt already closed")),
        }
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if let Some(reporter) = self.reporter.take() {
            error!(
                installation_id = %reporter.tracker.installation_id,
                attempt = %reporter.attempt,
                "deployment attempt aborted before the orchestrator returned"
            );
            // A newer attempt or an earlier finish already settled the tracker.
            let _ = reporter.finish(Err(ErrorDetail::new(ABORTED).with_code("Aborted")));
        }
    }
}

impl TrackerSnapshot {
    fn log_outcome(&self, installation_id: &InstallationId, attempt: &AttemptId) {
        match self.overall.status {
            OperationStatus::Success => info!(
                installation_id = %installation_id,
                attempt = %attempt,
                "deployment attempt succeeded"
            ),
            status => warn!(
                installation_id = %installation_id,
                attempt = %attempt,
                status = %status,
                error = ?self.overall.error,
                "deployment attempt did not succeed"
            ),
        }
    }
}

impl fmt::Debug for OperationReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationReporter")
            .field("installation_id", &self.tracker.installation_id)
            .field("attempt", &self.attempt)
            .finish()
    }
}
