//! Integration tests for suite resource lifecycle
//!
//! Resources are built from declarations against a discovered mesh and
//! provisioned through the mock provisioner, so every create and delete
//! is observable.

use common::config::{ConfigError, ResourceKind, SuiteConfig};
use mesh_prober::discovery::load_clusters;
use mesh_prober::errors::ProberError;
use mesh_prober::lifecycle::SuiteManager;
use mesh_prober::provisioner::mock::MockProvisioner;
use mesh_prober::resources::{build_suite_resources, ResourceState, TopologyContext};
use mp_test_utils::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn isolation_suite() -> SuiteConfig {
    suite(
        "isolated",
        vec![
            resource(
                ResourceKind::IsolationNetworkPolicy,
                CLUSTER_A,
                NS_DEFAULT,
                "isolate-a",
                json!({ "allowed_clusters": [CLUSTER_B] }),
            ),
            resource(
                ResourceKind::FabricFirewallRule,
                CLUSTER_B,
                NS_DEFAULT,
                "block-dns",
                serde_json::Value::Null,
            ),
        ],
    )
}

async fn manager(suite: &SuiteConfig, provisioner: Arc<MockProvisioner>) -> SuiteManager {
    let mesh = two_cluster_mesh().with_suite(suite.clone());
    let registry = load_clusters(&mesh.config(), &mesh.inventory())
        .await
        .unwrap();
    let resources = build_suite_resources(suite, &TopologyContext::new(&registry)).unwrap();
    SuiteManager::new(suite.name.as_str(), resources, provisioner)
        .with_settle(std::time::Duration::ZERO)
}

async fn never_finishes() -> Result<(), ProberError> {
    std::future::pending().await
}

#[allow(clippy::panic)]
async fn explode() -> Result<(), ProberError> {
    panic!("probe block exploded")
}

/// Resources are created in order, live during the block, and removed after
#[tokio::test]
async fn test_resources_live_only_during_block() {
    // Arrange
    let provisioner = Arc::new(MockProvisioner::new());
    let mut suite = manager(&isolation_suite(), provisioner.clone()).await;
    let observer = provisioner.clone();

    // Act
    let live_inside = suite
        .run(|| async move { Ok(observer.live_count()) })
        .await
        .unwrap();

    // Assert
    assert_eq!(live_inside, 2);
    assert_eq!(provisioner.live_count(), 0);
    assert_eq!(provisioner.created(), vec!["isolate-a", "block-dns"]);
    assert_eq!(provisioner.deleted(), vec!["isolate-a", "block-dns"]);
    assert!(suite
        .resources()
        .iter()
        .all(|r| r.state() == ResourceState::Removed));
}

/// An error from the block still tears the suite down
#[tokio::test]
async fn test_block_error_tears_down() {
    let provisioner = Arc::new(MockProvisioner::new());
    let mut suite = manager(&isolation_suite(), provisioner.clone()).await;

    let result: Result<(), _> = suite
        .run(|| async { Err(ProberError::Config(ConfigError::NoClusters)) })
        .await;

    assert!(matches!(result, Err(ProberError::Config(_))));
    assert_eq!(provisioner.live_count(), 0);
    assert_eq!(provisioner.deleted().len(), 2);
}

/// A panic in the block still tears the suite down, then propagates
#[tokio::test]
async fn test_block_panic_tears_down_then_propagates() {
    let provisioner = Arc::new(MockProvisioner::new());
    let mut suite = manager(&isolation_suite(), provisioner.clone()).await;

    let joined = tokio::spawn(async move { suite.run(explode).await }).await;

    assert!(joined.unwrap_err().is_panic());
    assert_eq!(provisioner.live_count(), 0);
    assert_eq!(provisioner.deleted(), vec!["isolate-a", "block-dns"]);
}

/// A failed create rolls back what was created and skips the block
#[tokio::test]
async fn test_failed_create_rolls_back() {
    let provisioner = Arc::new(MockProvisioner::new().failing_create("block-dns"));
    let mut suite = manager(&isolation_suite(), provisioner.clone()).await;
    let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = ran.clone();

    let result = suite
        .run(|| async move {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        })
        .await;

    let Err(ProberError::Setup { suite: name, resource, .. }) = result else {
        unreachable!("expected a setup error");
    };
    assert_eq!(name, "isolated");
    assert!(resource.contains("block-dns"));
    assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(provisioner.deleted(), vec!["isolate-a"]);
    assert_eq!(provisioner.live_count(), 0);
}

/// A failed delete is reported after the block succeeded
#[tokio::test]
async fn test_failed_delete_is_reported() {
    let provisioner = Arc::new(MockProvisioner::new().failing_delete("isolate-a"));
    let mut suite = manager(&isolation_suite(), provisioner.clone()).await;

    let result = suite.run(|| async { Ok(()) }).await;

    let Err(ProberError::Teardown { failures, .. }) = result else {
        unreachable!("expected a teardown error");
    };
    assert_eq!(failures.len(), 1);
    assert!(failures[0].resource.contains("isolate-a"));
    // The remaining resource is still removed
    assert_eq!(provisioner.deleted(), vec!["isolate-a", "block-dns"]);
    assert_eq!(provisioner.live_count(), 1);
}

/// A suite without resources runs its block without provisioning anything
#[tokio::test]
async fn test_empty_suite_touches_nothing() {
    let provisioner = Arc::new(MockProvisioner::new());
    let mut open = manager(&suite("open", vec![]), provisioner.clone()).await;

    let value = open.run(|| async { Ok(42) }).await.unwrap();

    assert_eq!(value, 42);
    assert!(provisioner.calls().is_empty());
}

/// Shutdown during the block tears the suite down before returning
#[tokio::test(start_paused = true)]
async fn test_shutdown_tears_down_running_suite() {
    let provisioner = Arc::new(MockProvisioner::new());
    let token = CancellationToken::new();
    let mut suite = manager(&isolation_suite(), provisioner.clone())
        .await
        .with_shutdown(token.clone());

    let handle = tokio::spawn(async move { suite.run(never_finishes).await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(provisioner.live_count(), 2);
    token.cancel();

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(ProberError::Cancelled { suite }) if suite == "isolated"));
    assert_eq!(provisioner.live_count(), 0);
    assert_eq!(provisioner.deleted(), vec!["isolate-a", "block-dns"]);
}

/// An aborted task still removes the suite's resources
#[tokio::test(start_paused = true)]
async fn test_aborted_task_leaves_nothing_behind() {
    let provisioner = Arc::new(MockProvisioner::new());
    let mut suite = manager(&isolation_suite(), provisioner.clone()).await;

    let handle = tokio::spawn(async move { suite.run(never_finishes).await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(provisioner.live_count(), 2);
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());

    for _ in 0..100 {
        if provisioner.live_count() == 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(provisioner.live_count(), 0, "resources leaked on cancellation");
}
