//! Trackable remote operations and their aggregate.
//!
//! ```text
//! Pending ──▶ InProgress ──▶ Success
//!                  │
//!                  ▼
//!               Failure
//! ```
//!
//! Terminal states are never left; a new deployment attempt discards the
//! whole sequence instead.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ErrorDetail;

/// Position of an operation within its attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(usize);

impl OperationId {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Index in the attempt's operation list.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Known but not started.
    Pending,
    /// Started, not finished.
    InProgress,
    /// Finished successfully.
    Success,
    /// Finished with a failure.
    Failure,
}

impl OperationStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    /// Whether the status can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome reported when an operation completes.
pub type Outcome = Result<(), ErrorDetail>;

/// One step of a multi-step remote workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Human-readable step name.
    pub label: String,
    /// Current status.
    pub status: OperationStatus,
    /// When the step started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the step finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Failure detail, present only for `Failure`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl Operation {
    /// Create a pending operation.
    #[must_use]
    pub fn pending(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            status: OperationStatus::Pending,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    /// Time spent on the operation.
    ///
    /// `ended_at - started_at` once finished, time since start while in
    /// progress, `None` otherwise.
    #[must_use]
    pub fn processing_time(&self, now: DateTime<Utc>) -> Option<Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            (Some(start), None) if self.status == OperationStatus::InProgress => Some(now - start),
            _ => None,
        }
    }

    /// Owned projection for the rendering layer.
    #[must_use]
    pub fn view(&self, now: DateTime<Utc>) -> OperationView {
        OperationView {
            label: self.label.clone(),
            status: self.status,
            started_at: self.started_at,
            ended_at: self.ended_at,
            processing_time_ms: self
                .processing_time(now)
                .map(|d| d.num_milliseconds()),
            error: self.error.clone(),
        }
    }

    pub(crate) fn begin(&mut self, now: DateTime<Utc>) {
        self.status = OperationStatus::InProgress;
        self.started_at = Some(now);
    }

    pub(crate) fn finish(&mut self, now: DateTime<Utc>, outcome: Outcome) {
        self.ended_at = Some(now);
        match outcome {
            Ok(()) => {
                self.status = OperationStatus::Success;
                self.error = None;
            }
            Err(error) => {
                self.status = OperationStatus::Failure;
                self.error = Some(error);
            }
        }
    }
}

/// Operation as exposed to the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationView {
    pub label: String,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

/// Aggregate status of a sequence of operations.
///
/// Failure dominates: one failed step fails the whole sequence even while
/// other steps still report progress. An empty sequence is `Pending`.
#[must_use]
pub fn aggregate_status(operations: &[Operation]) -> OperationStatus {
    if operations.is_empty() {
        return OperationStatus::Pending;
    }
    if operations
        .iter()
        .any(|op| op.status == OperationStatus::Failure)
    {
        return OperationStatus::Failure;
    }
    if operations.iter().any(|op| !op.status.is_terminal()) {
        return OperationStatus::InProgress;
    }
    OperationStatus::Success
}

/// Derive the overall operation of a sequence.
///
/// The overall start is the earliest start; the overall end is the latest
/// end, and only once every operation has finished. The overall error is
/// left empty: step failures stay on the step that failed.
#[must_use]
pub fn aggregate(label: &str, operations: &[Operation]) -> Operation {
    let started_at = operations.iter().filter_map(|op| op.started_at).min();
    let all_finished =
        !operations.is_empty() && operations.iter().all(|op| op.status.is_terminal());
    let ended_at = if all_finished {
        operations.iter().filter_map(|op| op.ended_at).max()
    } else {
        None
    };

    Operation {
        label: label.to_owned(),
        status: aggregate_status(operations),
        started_at,
        ended_at,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(secs)
    }

    fn op(status: OperationStatus) -> Operation {
        Operation {
            status,
            ..Operation::pending("step")
        }
    }

    #[test]
    fn processing_time_of_finished_operation() {
        let mut op = Operation::pending("roles");
        op.begin(at(10));
        op.finish(at(25), Ok(()));
        assert_eq!(op.processing_time(at(100)), Some(Duration::seconds(15)));
    }

    #[test]
    fn processing_time_while_in_progress() {
        let mut op = Operation::pending("roles");
        op.begin(at(10));
        assert_eq!(op.processing_time(at(40)), Some(Duration::seconds(30)));
    }

    #[test]
    fn processing_time_undefined_before_start() {
        assert_eq!(Operation::pending("roles").processing_time(at(40)), None);
    }

    #[test]
    fn failure_records_detail() {
        let mut op = Operation::pending("stack");
        op.begin(at(0));
        op.finish(at(5), Err(ErrorDetail::new("timeout")));
        assert_eq!(op.status, OperationStatus::Failure);
        assert_eq!(op.error.as_ref().map(|e| e.message.as_str()), Some("timeout"));
    }

    #[test]
    fn empty_sequence_is_pending() {
        assert_eq!(aggregate_status(&[]), OperationStatus::Pending);
        let overall = aggregate("Deployment", &[]);
        assert_eq!(overall.started_at, None);
        assert_eq!(overall.ended_at, None);
    }

    #[test]
    fn overall_times_span_the_sequence() {
        let mut a = Operation::pending("a");
        a.begin(at(5));
        a.finish(at(10), Ok(()));
        let mut b = Operation::pending("b");
        b.begin(at(8));

        let running = aggregate("Deployment", &[a.clone(), b.clone()]);
        assert_eq!(running.started_at, Some(at(5)));
        assert_eq!(running.ended_at, None);
        assert_eq!(running.status, OperationStatus::InProgress);

        b.finish(at(30), Ok(()));
        let done = aggregate("Deployment", &[a, b]);
        assert_eq!(done.ended_at, Some(at(30)));
        assert_eq!(done.status, OperationStatus::Success);
        assert_eq!(done.processing_time(at(99)), Some(Duration::seconds(25)));
    }

    #[test]
    fn view_reports_processing_time() {
        let mut op = Operation::pending("roles");
        op.begin(at(0));
        let view = op.view(at(2));
        assert_eq!(view.processing_time_ms, Some(2000));
        assert_eq!(view.status, OperationStatus::InProgress);
    }

    fn status_strategy() -> impl Strategy<Value = OperationStatus> {
        prop_oneof![
            Just(OperationStatus::Pending),
            Just(OperationStatus::InProgress),
            Just(OperationStatus::Success),
            Just(OperationStatus::Failure),
        ]
    }

    proptest! {
        #[test]
        fn failure_dominates(
            statuses in prop::collection::vec(status_strategy(), 1..5),
            failed_at in 0usize..5,
        ) {
            let mut ops: Vec<Operation> = statuses.into_iter().map(op).collect();
            let index = failed_at % (ops.len() + 1);
            ops.insert(index, op(OperationStatus::Failure));
            prop_assert_eq!(aggregate_status(&ops), OperationStatus::Failure);
        }

        #[test]
        fn success_iff_all_succeeded(statuses in prop::collection::vec(status_strategy(), 2..=5)) {
            let ops: Vec<Operation> = statuses.iter().copied().map(op).collect();
            let all_success = statuses.iter().all(|s| *s == OperationStatus::Success);
            prop_assert_eq!(aggregate_status(&ops) == OperationStatus::Success, all_success);
        }

        #[test]
        fn in_progress_iff_unfinished_without_failure(
            statuses in prop::collection::vec(status_strategy(), 2..=5),
        ) {
            let ops: Vec<Operation> = statuses.iter().copied().map(op).collect();
            let no_failure = !statuses.contains(&OperationStatus::Failure);
            let unfinished = statuses
                .iter()
                .any(|s| matches!(s, OperationStatus::Pending | OperationStatus::InProgress));
            prop_assert_eq!(
                aggregate_status(&ops) == OperationStatus::InProgress,
                no_failure && unfinished
            );
        }
    }
}
