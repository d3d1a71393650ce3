//! Integration tests for discovery and test matrix generation
//!
//! Drives discovery against the mock inventory built by `TestMeshBuilder`
//! and checks the pairing rules on the resulting matrix.

use common::types::{EntityId, ProbeKind};
use mesh_prober::discovery::load_clusters;
use mesh_prober::matrix::{build_entities, build_test_matrix, MatrixPlan, UnreachablePair};
use mp_test_utils::*;

async fn plan_for(mesh: &TestMeshBuilder) -> Result<MatrixPlan, anyhow::Error> {
    let config = mesh.config();
    let registry = load_clusters(&config, &mesh.inventory()).await?;
    let sets = build_entities(&registry, &config.probes, &config.externals)?;
    Ok(build_test_matrix(&sets.sources, &sets.destinations, &registry)?)
}

/// Cross-cluster destinations are probed at their remapped address
#[tokio::test]
async fn test_cross_cluster_pod_is_probed_at_remapped_address() -> Result<(), anyhow::Error> {
    // Arrange
    let mesh = two_cluster_mesh();

    // Act
    let plan = plan_for(&mesh).await?;

    // Assert
    let remote: Vec<_> = plan
        .tests
        .iter()
        .filter(|t| t.destination().id.name == POD_B1 && t.source().id.name == POD_A1)
        .collect();
    assert_eq!(remote.len(), 2, "Expected ping and curl from p1 to p2");
    for test in remote {
        assert_eq!(test.destination().address, POD_B1_IP_FROM_A);
        assert_eq!(test.access().cluster(), CLUSTER_A);
    }

    Ok(())
}

/// The two-cluster mesh yields exactly the expected matrix
#[tokio::test]
async fn test_two_cluster_matrix_shape() -> Result<(), anyhow::Error> {
    let plan = plan_for(&two_cluster_mesh()).await?;

    // p1: p2 (ping, curl), internet, nameserver; p2: s2, internet, nameserver
    plan.tests
        .assert_test_count(7)
        .assert_no_self_tests()
        .assert_services_are_local()
        .assert_no_tests_between(CLUSTER_B, CLUSTER_A)
        .assert_probe_for(SVC_B1, ProbeKind::Curl)
        .assert_probe_for(EXTERNAL_INTERNET, ProbeKind::Ping)
        .assert_probe_for(EXTERNAL_NAMESERVER, ProbeKind::Nslookup);

    assert_eq!(
        plan.unreachable,
        vec![UnreachablePair {
            source: EntityId::in_cluster(CLUSTER_B, NS_DEFAULT, POD_B1),
            destination: EntityId::in_cluster(CLUSTER_A, NS_DEFAULT, POD_A1),
        }]
    );

    Ok(())
}

/// Services only accept the probes configured for services
#[tokio::test]
async fn test_services_are_never_pinged() -> Result<(), anyhow::Error> {
    let plan = plan_for(&two_cluster_mesh()).await?;

    assert!(
        !plan
            .tests
            .iter()
            .any(|t| t.destination().id.name == SVC_B1 && t.kind() == ProbeKind::Ping),
        "Services must not be pinged"
    );

    Ok(())
}

/// Pods scheduled on virtual nodes are neither sources nor destinations
#[tokio::test]
async fn test_virtual_node_pods_are_excluded() -> Result<(), anyhow::Error> {
    let mesh = two_cluster_mesh().with_virtual_pod(CLUSTER_A, NS_DEFAULT, "shadow", "10.1.0.77");

    let plan = plan_for(&mesh).await?;

    plan.tests.assert_test_count(7);
    assert!(!plan
        .tests
        .iter()
        .any(|t| t.source().id.name == "shadow" || t.destination().id.name == "shadow"));

    Ok(())
}

/// A route in both directions removes every unreachable pair
#[tokio::test]
async fn test_bidirectional_routes_leave_no_unreachable_pairs() -> Result<(), anyhow::Error> {
    let mesh = two_cluster_mesh().with_route(CLUSTER_B, CLUSTER_A, "10.80.0.0/16");

    let plan = plan_for(&mesh).await?;

    assert!(plan.unreachable.is_empty());
    let back = plan
        .tests
        .iter()
        .find(|t| t.source().id.name == POD_B1 && t.destination().id.name == POD_A1)
        .expect("p2 should probe p1");
    assert_eq!(back.destination().address, "10.80.0.9");

    Ok(())
}

/// Pods in different namespaces of the same cluster reach each other directly
#[tokio::test]
async fn test_same_cluster_pods_use_native_address() -> Result<(), anyhow::Error> {
    let mesh = two_cluster_mesh().with_pod(CLUSTER_A, NS_WEB, "web", "10.1.3.3");

    let plan = plan_for(&mesh).await?;

    let local = plan
        .tests
        .iter()
        .find(|t| t.source().id.name == POD_A1 && t.destination().id.name == "web")
        .expect("p1 should probe web");
    assert_eq!(local.destination().address, "10.1.3.3");
    plan.tests.assert_no_self_tests();

    Ok(())
}

/// A malformed remapped CIDR fails matrix construction
#[tokio::test]
async fn test_malformed_route_is_rejected() -> Result<(), anyhow::Error> {
    let mesh = two_cluster_mesh().with_route(CLUSTER_A, CLUSTER_B, "not-a-cidr");

    let result = plan_for(&mesh).await;

    assert!(result.is_err(), "Malformed CIDR must fail the matrix");

    Ok(())
}

/// An unavailable cluster fails discovery
#[tokio::test]
async fn test_unavailable_cluster_fails_discovery() {
    let mesh = two_cluster_mesh();
    let inventory = mesh.inventory().with_unavailable(CLUSTER_B);

    let result = load_clusters(&mesh.config(), &inventory).await;

    assert!(result.is_err());
}
