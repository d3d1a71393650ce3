//! Integration tests for whole runs
//!
//! A run is driven end to end against the mock collaborators: discovery,
//! matrix, suite lifecycle and probe execution.

use common::config::ResourceKind;
use common::types::{EntityId, ProbeKind};
use mesh_prober::errors::ProberError;
use mesh_prober::matrix::TestResult;
use mesh_prober::probes::mock::{MockOutcome, MockProbeExecutor};
use mesh_prober::provisioner::mock::MockProvisioner;
use mesh_prober::report::RunDocument;
use mesh_prober::runner::{Collaborators, Runner};
use mp_test_utils::*;
use serde_json::json;
use std::sync::Arc;

fn collaborators(
    mesh: &TestMeshBuilder,
    provisioner: Arc<MockProvisioner>,
    executor: Arc<MockProbeExecutor>,
) -> Collaborators {
    Collaborators {
        inventory: Arc::new(mesh.inventory()),
        provisioner,
        executor,
    }
}

/// Without declared suites a single baseline suite runs
#[tokio::test]
async fn test_run_without_suites_runs_baseline() -> Result<(), anyhow::Error> {
    // Arrange
    let mesh = two_cluster_mesh();
    let provisioner = Arc::new(MockProvisioner::new());
    let executor = Arc::new(MockProbeExecutor::reachable());

    // Act
    let outcomes = Runner::new(mesh.config(), collaborators(&mesh, provisioner.clone(), executor.clone()))
        .run()
        .await?
        .into_result()?;

    // Assert
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].report.name, "baseline");
    assert_eq!(executor.call_count(), 7);
    assert!(provisioner.calls().is_empty());
    assert!(outcomes[0]
        .tests
        .iter()
        .all(|t| t.result() == TestResult::Success));

    Ok(())
}

/// A panicking probe fails its own test and nothing else
#[tokio::test]
async fn test_panicking_probe_is_isolated() -> Result<(), anyhow::Error> {
    let mesh = two_cluster_mesh();
    let executor = Arc::new(
        MockProbeExecutor::reachable().with_target_kind(POD_B1_IP_FROM_A, ProbeKind::Curl, MockOutcome::Panic),
    );

    let outcomes = Runner::new(
        mesh.config(),
        collaborators(&mesh, Arc::new(MockProvisioner::new()), executor),
    )
    .run()
    .await?
    .into_result()?;

    let tests = &outcomes[0].tests;
    assert_eq!(tests.len(), 7, "Every test must come back");
    let failed: Vec<String> = tests
        .iter()
        .filter(|t| t.result() == TestResult::Failure)
        .map(ToString::to_string)
        .collect();
    assert_eq!(failed.len(), 1, "Only the panicking probe fails: {failed:?}");

    let results = outcomes[0].report.results();
    let p1 = EntityId::in_cluster(CLUSTER_A, NS_DEFAULT, POD_A1);
    let p2 = EntityId::in_cluster(CLUSTER_B, NS_DEFAULT, POD_B1);
    assert_eq!(results.lookup(&p1, &p2, ProbeKind::Curl), Some(false));
    assert_eq!(results.lookup(&p1, &p2, ProbeKind::Ping), Some(true));

    Ok(())
}

/// Every suite runs the same matrix under its own resources
#[tokio::test]
async fn test_each_suite_provisions_its_own_resources() -> Result<(), anyhow::Error> {
    let mesh = two_cluster_mesh()
        .with_suite(suite("open", vec![]))
        .with_suite(suite(
            "isolated",
            vec![resource(
                ResourceKind::IsolationNetworkPolicy,
                CLUSTER_B,
                NS_DEFAULT,
                "isolate-b",
                json!({}),
            )],
        ));
    let provisioner = Arc::new(MockProvisioner::new());
    let executor = Arc::new(MockProbeExecutor::unreachable());

    let outcomes = Runner::new(mesh.config(), collaborators(&mesh, provisioner.clone(), executor.clone()))
        .run()
        .await?
        .into_result()?;

    let names: Vec<_> = outcomes.iter().map(|o| o.report.name.as_str()).collect();
    assert_eq!(names, vec!["open", "isolated"]);
    assert_eq!(executor.call_count(), 14);
    assert_eq!(provisioner.created(), vec!["isolate-b"]);
    assert_eq!(provisioner.deleted(), vec!["isolate-b"]);
    assert_eq!(provisioner.live_count(), 0);

    Ok(())
}

/// A suite that cannot be provisioned stops the run and keeps what finished
#[tokio::test]
async fn test_failing_suite_stops_run() {
    let mesh = two_cluster_mesh()
        .with_suite(suite("open", vec![]))
        .with_suite(suite(
            "broken",
            vec![resource(
                ResourceKind::FabricFirewallRule,
                CLUSTER_A,
                NS_DEFAULT,
                "fabric-a",
                json!({}),
            )],
        ))
        .with_suite(suite("later", vec![]));
    let provisioner = Arc::new(MockProvisioner::new().failing_create("fabric-a"));
    let executor = Arc::new(MockProbeExecutor::reachable());

    let outcome = Runner::new(mesh.config(), collaborators(&mesh, provisioner.clone(), executor.clone()))
        .run()
        .await
        .unwrap();

    assert!(matches!(
        &outcome.failure,
        Some(ProberError::Setup { suite, .. }) if suite == "broken"
    ));
    // Only "open" probed; "later" never started
    assert_eq!(executor.call_count(), 7);
    assert_eq!(provisioner.created(), vec!["fabric-a"]);

    let names: Vec<_> = outcome.suites.iter().map(|o| o.report.name.as_str()).collect();
    assert_eq!(names, vec!["open"]);
    let document = RunDocument::new(outcome.suites.into_iter().map(|o| o.report).collect());
    assert!(document.render().starts_with("Suite: open\n"));
}

/// A teardown failure drops that suite's report and keeps earlier ones
#[tokio::test]
async fn test_teardown_failure_keeps_earlier_suites() {
    let mesh = two_cluster_mesh()
        .with_suite(suite("open", vec![]))
        .with_suite(suite(
            "sticky",
            vec![resource(
                ResourceKind::IsolationNetworkPolicy,
                CLUSTER_B,
                NS_DEFAULT,
                "isolate-b",
                json!({}),
            )],
        ));
    let provisioner = Arc::new(MockProvisioner::new().failing_delete("isolate-b"));
    let executor = Arc::new(MockProbeExecutor::reachable());

    let outcome = Runner::new(mesh.config(), collaborators(&mesh, provisioner, executor))
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.suites.len(), 1);
    assert!(matches!(outcome.failure, Some(ProberError::Teardown { .. })));
    assert!(outcome.into_result().is_err());
}

/// A service answering from the wrong backend fails its HTTP probe
#[tokio::test]
async fn test_service_backend_hostname_is_checked() -> Result<(), anyhow::Error> {
    let mesh = two_cluster_mesh();
    let executor = Arc::new(
        MockProbeExecutor::reachable().with_target(SVC_B1_IP, MockOutcome::ServesHostname("p7")),
    );

    let outcomes = Runner::new(
        mesh.config(),
        collaborators(&mesh, Arc::new(MockProvisioner::new()), executor.clone()),
    )
    .run()
    .await?
    .into_result()?;

    let to_service = executor
        .calls()
        .into_iter()
        .find(|c| c.target_address == SVC_B1_IP)
        .expect("p2 should curl its local service");
    assert_eq!(to_service.target_hostname.as_deref(), Some(POD_B1));

    let results = outcomes[0].report.results();
    let p2 = EntityId::in_cluster(CLUSTER_B, NS_DEFAULT, POD_B1);
    let s2 = EntityId::in_cluster(CLUSTER_B, NS_DEFAULT, SVC_B1);
    assert_eq!(results.lookup(&p2, &s2, ProbeKind::Curl), Some(false));

    // The right backend passes
    let executor = Arc::new(
        MockProbeExecutor::reachable().with_target(SVC_B1_IP, MockOutcome::ServesHostname(POD_B1)),
    );
    let outcomes = Runner::new(
        mesh.config(),
        collaborators(&mesh, Arc::new(MockProvisioner::new()), executor),
    )
    .run()
    .await?
    .into_result()?;
    assert_eq!(
        outcomes[0].report.results().lookup(&p2, &s2, ProbeKind::Curl),
        Some(true)
    );

    Ok(())
}

/// Probe requests carry the source pod and the remapped target
#[tokio::test]
async fn test_probe_requests_use_source_cluster_access() -> Result<(), anyhow::Error> {
    let mesh = two_cluster_mesh();
    let executor = Arc::new(MockProbeExecutor::reachable());

    Runner::new(
        mesh.config(),
        collaborators(&mesh, Arc::new(MockProvisioner::new()), executor.clone()),
    )
    .run()
    .await?
    .into_result()?;

    let calls = executor.calls();
    let remote = calls
        .iter()
        .find(|c| c.target_address == POD_B1_IP_FROM_A && c.kind == ProbeKind::Ping)
        .expect("p1 should ping p2 at its remapped address");
    assert_eq!(remote.cluster, CLUSTER_A);
    assert_eq!(remote.pod, POD_A1);

    let lookup = calls
        .iter()
        .find(|c| c.kind == ProbeKind::Nslookup)
        .expect("nameserver should be probed");
    assert_eq!(lookup.target_address, EXTERNAL_ADDRESS);
    assert_eq!(lookup.target_hostname.as_deref(), Some("example.com"));

    Ok(())
}
