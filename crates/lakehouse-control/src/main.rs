//! Lakehouse control simulation binary.
//!
//! Drives one installation through the wizard's load and deployment flow
//! against the mock collaborators, logging every progress change.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lakehouse_control::{
    AccountUser, ControlConfig, InstallationDetails, MockInstallationApi, MockPipelineProbe,
    Session, UserDirectory,
};

const INSTALLATION_ID: &str = "demo";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ControlConfig::load();

    let default_filter = config
        .as_ref()
        .map(|c| c.logging.filter.clone())
        .unwrap_or_else(|_| "lakehouse_control=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&default_filter))?,
        )
        .init();

    info!("lakehouse control simulation starting");

    let config = config.unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        ControlConfig::default()
    });

    let api = Arc::new(MockInstallationApi::new());
    api.set_installation(
        INSTALLATION_ID,
        InstallationDetails::from_json(r#"{"id": "demo", "name": "Demo lake"}"#),
    );
    api.set_users(
        INSTALLATION_ID,
        Ok(UserDirectory {
            users: vec![AccountUser {
                name: "admin".to_owned(),
                arn: "arn:aws:iam::123456789012:user/admin".to_owned(),
                admin: true,
            }],
        }),
    );

    let session = Session::from_config(&config, api, Arc::new(MockPipelineProbe::default()))?;
    let installation =
        session.open_installation(INSTALLATION_ID, session.account("123456789012"))?;

    let (details, users) = tokio::join!(installation.load_details(), installation.load_users());
    info!(
        details = %details.phase(),
        users = %users.phase(),
        admins = users.data().map_or(0, |u| u.admin_count()),
        "installation state loaded"
    );

    let mut progress = installation.tracker().subscribe();
    let handle = installation.trigger_deployment()?;

    let watcher = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let snapshot = progress.borrow_and_update().clone();
            let done = snapshot
                .operations
                .iter()
                .filter(|op| op.status.is_terminal())
                .count();
            info!(
                overall = %snapshot.overall.status,
                done,
                total = snapshot.operations.len(),
                "deployment progress"
            );
            if !snapshot.running {
                break;
            }
        }
    });

    let snapshot = handle.wait().await?;
    watcher.await?;

    let view = installation.tracker().view();
    info!(
        success = snapshot.is_success(),
        view = %serde_json::to_string(&view)?,
        "deployment finished"
    );

    Ok(())
}
