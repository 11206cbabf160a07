//! Lakehouse control core
//!
//! This crate holds the state behind the data-lake provisioning wizard: the
//! caches of remotely fetched installation state and the progress tracker of
//! the multi-stage deployment that creates the lake.
//!
//! # Architecture
//!
//! - **Resource stores**: a [`ResourceStore`] caches one remote value behind
//!   a `New`/`Loading`/`Ready`/`Error`/`Reloading` lifecycle, with at most one
//!   fetch in flight. A [`StoreRegistry`] memoises one store per key.
//! - **Operations**: an [`Operation`] is one trackable remote step; a
//!   sequence of them aggregates into an overall operation where failure
//!   dominates.
//! - **Deployment tracking**: a [`DeploymentTracker`] records the operations
//!   of the current attempt as a [`DeploymentOrchestrator`] reports them, and
//!   gates retries so that only one attempt runs at a time.
//! - **Session**: a [`Session`] owns the registries and hands out one
//!   [`Installation`] per installation id.
//!
//! Remote calls are injected through [`InstallationApi`] and
//! [`PipelineProbe`]; this crate never talks to the network itself.
//!
//! # Deployment lifecycle
//!
//! ```text
//! idle ──trigger──▶ running ──finish──▶ Success
//!                     ▲                    │
//!                     │                    ▼
//!                     └─────trigger────  Failure
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use lakehouse_control::{ControlConfig, MockInstallationApi, MockPipelineProbe, Session};
//!
//! let session = Session::from_config(
//!     &ControlConfig::default(),
//!     Arc::new(MockInstallationApi::new()),
//!     Arc::new(MockPipelineProbe::default()),
//! )?;
//!
//! let installation = session.open_installation("abc", session.account("123456789012"))?;
//! installation.load_details().await;
//!
//! let handle = installation.trigger_deployment()?;
//! let progress = handle.wait().await?;
//! assert!(progress.is_success());
//! ```

#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod deployment;
pub mod error;
pub mod installation;
pub mod operation;
pub mod remote;
pub mod session;
pub mod store;
pub mod types;

// Re-export commonly used types at the crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ControlConfig;
pub use deployment::{
    DeploymentContext, DeploymentOrchestrator, DeploymentTracker, MockPipelineProbe,
    OperationReporter, PipelineProbe, PollingOrchestrator, StageProgress, StageScript,
    TrackerSnapshot, TrackerView, OVERALL_LABEL,
};
pub use error::{ControlError, ControlResult};
pub use installation::{DeploymentHandle, Installation};
pub use operation::{
    aggregate, aggregate_status, Operation, OperationId, OperationStatus, OperationView, Outcome,
};
pub use remote::{InstallationApi, MockInstallationApi};
pub use session::Session;
pub use store::{LoadPhase, ResourceStore, StoreKey, StoreRegistry, StoreState, StoreView};
pub use types::{
    AccountContext, AccountUser, AttemptId, ErrorDetail, InstallationDetails, InstallationId,
    StackOutputs, UserDirectory,
};
