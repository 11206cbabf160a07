//! Boundary to the remote installation API.
//!
//! The concrete calls (account lookups, identity listing) live outside this
//! crate. Payloads cross the boundary already validated into typed values.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::{
    AccountContext, ErrorDetail, InstallationDetails, InstallationId, UserDirectory,
};

/// Remote reads backing the installation and users stores.
#[async_trait]
pub trait InstallationApi: Send + Sync {
    /// Fetch the current remote view of an installation.
    async fn fetch_installation(
        &self,
        id: &InstallationId,
    ) -> Result<InstallationDetails, ErrorDetail>;

    /// List the users with access to an installation's account.
    async fn list_users(
        &self,
        id: &InstallationId,
        account: &AccountContext,
    ) -> Result<UserDirectory, ErrorDetail>;
}

#[derive(Debug, Default)]
struct Calls {
    installations: HashMap<String, usize>,
    users: HashMap<String, usize>,
}

/// Mock installation API for testing and simulation.
///
/// Unknown installations fail with a `NotFound` detail. An optional latency
/// is applied to every call so that overlapping loads can be exercised.
#[derive(Debug, Default)]
pub struct MockInstallationApi {
    installations: RwLock<HashMap<String, Result<InstallationDetails, ErrorDetail>>>,
    users: RwLock<HashMap<String, Result<UserDirectory, ErrorDetail>>>,
    calls: RwLock<Calls>,
    latency: Option<Duration>,
}

impl MockInstallationApi {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Set the response for `fetch_installation`.
    pub fn set_installation(&self, id: &str, response: Result<InstallationDetails, ErrorDetail>) {
        let mut installations = self
            .installations
            .write()
            .unwrap_or_else(|e| e.into_inner());
        installations.insert(id.to_owned(), response);
    }

    /// Set the response for `list_users`.
    pub fn set_users(&self, id: &str, response: Result<UserDirectory, ErrorDetail>) {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        users.insert(id.to_owned(), response);
    }

    /// Number of `fetch_installation` calls made for `id`.
    #[must_use]
    pub fn installation_calls(&self, id: &str) -> usize {
        let calls = self.calls.read().unwrap_or_else(|e| e.into_inner());
        calls.installations.get(id).copied().unwrap_or(0)
    }

    /// Number of `list_users` calls made for `id`.
    #[must_use]
    pub fn user_calls(&self, id: &str) -> usize {
        let calls = self.calls.read().unwrap_or_else(|e| e.into_inner());
        calls.users.get(id).copied().unwrap_or(0)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn not_found(id: &InstallationId) -> ErrorDetail {
    ErrorDetail::new(format!("installation {id} not found")).with_code("NotFound")
}

#[async_trait]
impl InstallationApi for MockInstallationApi {
    async fn fetch_installation(
        &self,
        id: &InstallationId,
    ) -> Result<InstallationDetails, ErrorDetail> {
        {
            let mut calls = self.calls.write().unwrap_or_else(|e| e.into_inner());
            *calls.installations.entry(id.to_string()).or_insert(0) += 1;
        }
        self.simulate_latency().await;

        let installations = self.installations.read().unwrap_or_else(|e| e.into_inner());
        installations
            .get(id.as_str())
            .cloned()
            .unwrap_or_else(|| Err(not_found(id)))
    }

    async fn list_users(
        &self,
        id: &InstallationId,
        _account: &AccountContext,
    ) -> Result<UserDirectory, ErrorDetail> {
        {
            let mut calls = self.calls.write().unwrap_or_else(|e| e.into_inner());
            *calls.users.entry(id.to_string()).or_insert(0) += 1;
        }
        self.simulate_latency().await;

        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        users
            .get(id.as_str())
            .cloned()
            .unwrap_or_else(|| Err(not_found(id)))
    }
}
