//! Common test utilities for lakehouse-control integration tests.

#![allow(dead_code, clippy::unwrap_used)]

pub mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use lakehouse_control::config::{DeploymentConfig, StageConfig};
use lakehouse_control::{
    ControlConfig, Installation, InstallationApi, ManualClock, MockInstallationApi,
    MockPipelineProbe, PipelineProbe, PollingOrchestrator, Session,
};

/// Session wired to mock collaborators the test can script.
pub struct TestSession {
    pub api: Arc<MockInstallationApi>,
    pub probe: Arc<MockPipelineProbe>,
    pub session: Session,
}

impl TestSession {
    /// Three-stage pipeline polled every 100ms, no API latency.
    pub fn new() -> Self {
        Self::with_api(MockInstallationApi::new())
    }

    /// Every API call takes `latency` before it answers.
    pub fn with_latency(latency: Duration) -> Self {
        Self::with_api(MockInstallationApi::new().with_latency(latency))
    }

    fn with_api(api: MockInstallationApi) -> Self {
        let api = Arc::new(api);
        let probe = Arc::new(MockPipelineProbe::default());
        let session = Session::from_config(
            &test_config(),
            Arc::clone(&api) as Arc<dyn InstallationApi>,
            Arc::clone(&probe) as Arc<dyn PipelineProbe>,
        )
        .unwrap();

        Self {
            api,
            probe,
            session,
        }
    }

    /// Open an installation in the default test account.
    pub fn open(&self, id: &str) -> Arc<Installation> {
        self.session
            .open_installation(id, self.session.account("123456789012"))
            .unwrap()
    }
}

/// Session whose timestamps come from a manual clock.
pub fn session_with_clock(clock: Arc<ManualClock>) -> (Arc<MockPipelineProbe>, Session) {
    let probe = Arc::new(MockPipelineProbe::default());
    let config = test_config();
    let orchestrator = PollingOrchestrator::new(
        &config.deployment,
        Arc::clone(&probe) as Arc<dyn PipelineProbe>,
    );
    let session = Session::with_clock(
        Arc::new(MockInstallationApi::new()),
        Arc::new(orchestrator),
        clock,
    );
    (probe, session)
}

pub fn test_config() -> ControlConfig {
    ControlConfig {
        deployment: DeploymentConfig {
            poll_interval_ms: 100,
            stage_timeout_secs: 10,
            stages: vec![
                StageConfig::new("roles", "Create roles"),
                StageConfig::new("stack", "Create stack"),
                StageConfig::new("ingest", "Start ingestion"),
            ],
        },
        ..ControlConfig::default()
    }
}
