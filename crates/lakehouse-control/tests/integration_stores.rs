//! Integration tests for installation and users stores behind a session.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fixtures, fixtures::InstallationBuilder, TestSession};
use lakehouse_control::{ErrorDetail, LoadPhase};

#[tokio::test]
async fn installations_load_independently() {
    let test = TestSession::new();
    test.api
        .set_installation("abc", Ok(InstallationBuilder::new("abc").provisioned().build()));
    test.api.set_installation(
        "xyz",
        Err(ErrorDetail::new("AccessDenied").with_code("403")),
    );

    let abc = test.open("abc");
    let xyz = test.open("xyz");

    let (abc_state, xyz_state) = tokio::join!(abc.load_details(), xyz.load_details());

    assert!(abc_state.is_ready());
    assert_eq!(
        abc_state.data().unwrap().data_lake_bucket(),
        Some("lakehouse-abc-raw")
    );
    assert!(xyz_state.is_error());
    assert_eq!(xyz_state.error().unwrap().code.as_deref(), Some("403"));

    // A failure for one key leaves the other untouched
    assert!(abc.details().is_ready());
    assert_eq!(test.api.installation_calls("abc"), 1);
    assert_eq!(test.api.installation_calls("xyz"), 1);
}

#[tokio::test]
async fn session_store_lookup_sees_installation_loads() {
    let test = TestSession::new();
    test.api.set_users("abc", Ok(fixtures::users(2)));

    let installation = test.open("abc");
    let store = test.session.users("abc").unwrap();
    assert!(store.is_new());

    installation.load_users().await;

    assert!(store.is_ready());
    assert_eq!(store.data().unwrap().users.len(), 3);
    assert_eq!(store.data().unwrap().admin_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_loads_dispatch_one_fetch() {
    let test = TestSession::with_latency(Duration::from_millis(50));
    test.api
        .set_installation("abc", Ok(InstallationBuilder::new("abc").build()));
    let installation = test.open("abc");

    let (first, second, third) = tokio::join!(
        installation.load_details(),
        installation.load_details(),
        installation.load_details()
    );

    assert_eq!(test.api.installation_calls("abc"), 1);
    for state in [first, second, third] {
        assert!(state.is_ready());
        assert_eq!(state.data().unwrap().name, "Lake abc");
    }
}

#[tokio::test(start_paused = true)]
async fn reload_keeps_previous_data_visible() {
    let test = TestSession::with_latency(Duration::from_millis(50));
    test.api
        .set_installation("abc", Ok(InstallationBuilder::new("abc").build()));
    let installation = test.open("abc");
    installation.load_details().await;

    test.api.set_installation(
        "abc",
        Ok(InstallationBuilder::new("abc")
            .with_account("123456789012", "eu-west-1")
            .provisioned()
            .build()),
    );

    let reload = {
        let installation = Arc::clone(&installation);
        tokio::spawn(async move { installation.load_details().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let store = installation.details();
    assert_eq!(store.phase(), LoadPhase::Reloading);
    assert!(!store.data().unwrap().is_provisioned());

    let state = reload.await.unwrap();
    assert!(state.is_ready());
    assert!(state.data().unwrap().is_provisioned());
    assert_eq!(test.api.installation_calls("abc"), 2);
}

#[tokio::test]
async fn failed_reload_surfaces_error_and_drops_data() {
    let test = TestSession::new();
    test.api
        .set_installation("abc", Ok(InstallationBuilder::new("abc").build()));
    let installation = test.open("abc");
    installation.load_details().await;

    test.api
        .set_installation("abc", Err(ErrorDetail::new("throttled")));
    let state = installation.load_details().await;

    assert!(state.is_error());
    assert!(installation.details().data().is_none());
    assert_eq!(installation.details().error().unwrap().message, "throttled");

    // Recovery goes through Loading again, not Reloading
    test.api
        .set_installation("abc", Ok(InstallationBuilder::new("abc").build()));
    let state = installation.load_details().await;
    assert!(state.is_ready());
}

#[tokio::test]
async fn unknown_installation_fails_with_not_found() {
    let test = TestSession::new();
    let installation = test.open("missing");

    let state = installation.load_details().await;

    assert_eq!(state.phase(), LoadPhase::Error);
    assert_eq!(state.error().unwrap().code.as_deref(), Some("NotFound"));
}

#[tokio::test]
async fn store_view_serialises_for_rendering() {
    let test = TestSession::new();
    test.api.set_users("abc", Ok(fixtures::users(0)));
    let installation = test.open("abc");
    installation.load_users().await;

    let view = serde_json::to_value(installation.users().view()).unwrap();

    assert_eq!(view["key"], "abc");
    assert_eq!(view["state"], "ready");
    assert_eq!(view["is_ready"], true);
    assert_eq!(view["data"]["users"][0]["name"], "admin");
}
