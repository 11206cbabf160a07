//! Session root: owns the store registries and the open installations.

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::ControlConfig;
use crate::deployment::{
    DeploymentOrchestrator, DeploymentTracker, PipelineProbe, PollingOrchestrator,
};
use crate::error::ControlResult;
use crate::installation::Installation;
use crate::remote::InstallationApi;
use crate::store::{ResourceStore, StoreKey, StoreRegistry};
use crate::types::{AccountContext, InstallationDetails, InstallationId, UserDirectory};

/// Application root context.
///
/// State lives for the lifetime of the session. Stores and installations
/// are created on first lookup and memoised by installation id.
pub struct Session {
    api: Arc<dyn InstallationApi>,
    orchestrator: Arc<dyn DeploymentOrchestrator>,
    clock: Arc<dyn Clock>,
    default_region: String,
    details: StoreRegistry<InstallationDetails>,
    users: StoreRegistry<UserDirectory>,
    installations: DashMap<StoreKey, Arc<Installation>>,
}

impl Session {
    /// Create a session backed by the system clock.
    #[must_use]
    pub fn new(
        api: Arc<dyn InstallationApi>,
        orchestrator: Arc<dyn DeploymentOrchestrator>,
    ) -> Self {
        Self::with_clock(api, orchestrator, Arc::new(SystemClock))
    }

    /// Create a session with an explicit time source.
    #[must_use]
    pub fn with_clock(
        api: Arc<dyn InstallationApi>,
        orchestrator: Arc<dyn DeploymentOrchestrator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            api,
            orchestrator,
            clock,
            default_region: crate::config::SessionConfig::default().default_region,
            details: StoreRegistry::new(),
            users: StoreRegistry::new(),
            installations: DashMap::new(),
        }
    }

    /// Create a session whose deployments run the configured stages
    /// against `probe`.
    pub fn from_config(
        config: &ControlConfig,
        api: Arc<dyn InstallationApi>,
        probe: Arc<dyn PipelineProbe>,
    ) -> ControlResult<Self> {
        config.validate()?;
        let orchestrator = PollingOrchestrator::new(&config.deployment, probe);
        info!(
            stages = orchestrator.stages().len(),
            poll_interval_ms = config.deployment.poll_interval_ms,
            stage_timeout_secs = config.deployment.stage_timeout_secs,
            "deployment pipeline configured"
        );

        let mut session = Self::new(api, Arc::new(orchestrator));
        session.default_region.clone_from(&config.session.default_region);
        Ok(session)
    }

    /// Account context in the session's default region.
    #[must_use]
    pub fn account(&self, account_id: impl Into<String>) -> AccountContext {
        AccountContext::new(account_id, self.default_region.clone())
    }

    /// Get or create the installation for `id`.
    ///
    /// The account is only used when the installation is created; reopening
    /// an installation returns the existing aggregate unchanged.
    pub fn open_installation(
        &self,
        id: impl AsRef<str>,
        account: AccountContext,
    ) -> ControlResult<Arc<Installation>> {
        let key = StoreKey::parse(id.as_ref())?;

        match self.installations.entry(key) {
            Entry::Occupied(entry) => {
                debug!(installation_id = %entry.key(), "installation already open");
                Ok(Arc::clone(entry.get()))
            }
            Entry::Vacant(entry) => {
                let id = InstallationId::new(entry.key().as_str());
                let installation = Arc::new(Installation::new(
                    id.clone(),
                    account,
                    self.details.resolve(entry.key())?,
                    self.users.resolve(entry.key())?,
                    Arc::new(DeploymentTracker::new(id.clone(), Arc::clone(&self.clock))),
                    Arc::clone(&self.api),
                    Arc::clone(&self.orchestrator),
                ));
                info!(
                    installation_id = %id,
                    account_id = %installation.account().account_id,
                    region = %installation.account().region,
                    "installation opened"
                );
                entry.insert(Arc::clone(&installation));
                Ok(installation)
            }
        }
    }

    /// An installation opened earlier in this session.
    #[must_use]
    pub fn installation(&self, id: &str) -> Option<Arc<Installation>> {
        let key = StoreKey::parse(id).ok()?;
        self.installations
            .get(&key)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Ids of all open installations.
    #[must_use]
    pub fn installation_ids(&self) -> Vec<InstallationId> {
        self.installations
            .iter()
            .map(|entry| InstallationId::new(entry.key().as_str()))
            .collect()
    }

    /// Details store for `id`, created on first use.
    pub fn details(&self, id: impl AsRef<str>) -> ControlResult<Arc<ResourceStore<InstallationDetails>>> {
        self.details.resolve(id)
    }

    /// Users store for `id`, created on first use.
    pub fn users(&self, id: impl AsRef<str>) -> ControlResult<Arc<ResourceStore<UserDirectory>>> {
        self.users.resolve(id)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("default_region", &self.default_region)
            .field("installations", &self.installations.len())
            .field("details", &self.details)
            .field("users", &self.users)
            .finish_non_exhaustive()
    }
}
