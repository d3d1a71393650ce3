//! Run orchestration.
//!
//! One run discovers the clusters once, builds one static matrix, then
//! executes it inside every configured suite.

use crate::discovery::load_clusters;
use crate::engine::{run_tests, EngineConfig};
use crate::errors::ProberError;
use crate::inventory::{ClusterInventory, KubeInventory};
use crate::kube_client::ClientPool;
use crate::lifecycle::SuiteManager;
use crate::matrix::{build_entities, build_test_matrix, EntitySets, MatrixPlan, Test};
use crate::models::{AccessHandle, ClusterRegistry};
use crate::probes::{KubeProbeExecutor, ProbeExecutor};
use crate::provisioner::{KubeProvisioner, ResourceProvisioner};
use crate::report::SuiteReport;
use crate::resources::{build_suite_resources, TopologyContext};
use crate::results::create_results_map;
use common::config::ConfigDocument;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// The three external collaborators a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub inventory: Arc<dyn ClusterInventory>,
    pub provisioner: Arc<dyn ResourceProvisioner>,
    pub executor: Arc<dyn ProbeExecutor>,
}

impl Collaborators {
    /// Kubernetes-backed collaborators sharing one client per cluster.
    pub async fn kubernetes(config: &ConfigDocument) -> Result<Self, ProberError> {
        let handles: Vec<AccessHandle> = config
            .clusters
            .iter()
            .map(|c| AccessHandle::new(c.name.as_str(), c.kubeconfig_location.as_path()))
            .collect();
        let pool = ClientPool::connect_handles(handles.iter()).await?;
        info!(target: "mp.runner", clusters = pool.len(), "Cluster clients ready");

        Ok(Self {
            inventory: Arc::new(KubeInventory::new(pool.clone())),
            provisioner: Arc::new(KubeProvisioner::new(pool.clone())),
            executor: Arc::new(KubeProbeExecutor::new(pool)),
        })
    }
}

/// Result of one suite.
#[derive(Debug)]
pub struct SuiteOutcome {
    pub report: SuiteReport,
    pub tests: Vec<Test>,
}

/// Suites that finished, and the error that stopped the run early.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub suites: Vec<SuiteOutcome>,
    pub failure: Option<ProberError>,
}

impl RunOutcome {
    /// Every suite, or the error that stopped the run.
    pub fn into_result(self) -> Result<Vec<SuiteOutcome>, ProberError> {
        match self.failure {
            Some(e) => Err(e),
            None => Ok(self.suites),
        }
    }
}

pub struct Runner {
    config: ConfigDocument,
    collaborators: Collaborators,
    shutdown: CancellationToken,
}

impl Runner {
    pub fn new(config: ConfigDocument, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling `token` tears down the running suite and starts no more.
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn config(&self) -> &ConfigDocument {
        &self.config
    }

    /// Discover every cluster, then run every suite in declaration order.
    ///
    /// Stops at the first failing suite: its resources are torn down, later
    /// suites never start, and the suites that already finished are kept
    /// alongside the failure in the returned [`RunOutcome`].
    ///
    /// # Errors
    ///
    /// Discovery, matrix and resource declaration errors, raised before
    /// any suite starts.
    #[instrument(skip_all, name = "mp.runner.run")]
    pub async fn run(&self) -> Result<RunOutcome, ProberError> {
        let registry = load_clusters(&self.config, self.collaborators.inventory.as_ref()).await?;
        let entities = build_entities(&registry, &self.config.probes, &self.config.externals)?;
        let plan = build_test_matrix(&entities.sources, &entities.destinations, &registry)?;
        let mut suites = self.prepare_suites(&registry)?;

        let mut outcome = RunOutcome::default();
        for suite in &mut suites {
            match self.run_suite(suite, &registry, &entities, &plan).await {
                Ok(done) => outcome.suites.push(done),
                Err(e) => {
                    error!(
                        target: "mp.runner",
                        suite = %suite.name(),
                        completed = outcome.suites.len(),
                        error = %e,
                        "Suite failed, stopping run"
                    );
                    outcome.failure = Some(e);
                    break;
                }
            }
        }
        Ok(outcome)
    }

    /// Build every suite's resources before anything is created, so a bad
    /// declaration fails the run up front.
    pub fn prepare_suites(&self, registry: &ClusterRegistry) -> Result<Vec<SuiteManager>, ProberError> {
        let context = TopologyContext::new(registry);
        self.config
            .suites()
            .iter()
            .map(|suite| {
                let resources = build_suite_resources(suite, &context)?;
                Ok(SuiteManager::new(
                    suite.name.as_str(),
                    resources,
                    Arc::clone(&self.collaborators.provisioner),
                )
                .with_settle(self.config.run.settle())
                .with_strict_delete(self.config.run.strict_delete)
                .with_shutdown(self.shutdown.clone()))
            })
            .collect()
    }

    /// Execute the matrix inside one suite's resource scope.
    #[instrument(skip_all, name = "mp.runner.suite", fields(suite = %suite.name()))]
    pub async fn run_suite(
        &self,
        suite: &mut SuiteManager,
        registry: &ClusterRegistry,
        entities: &EntitySets,
        plan: &MatrixPlan,
    ) -> Result<SuiteOutcome, ProberError> {
        info!(
            target: "mp.runner",
            suite = %suite.name(),
            resources = suite.resources().len(),
            tests = plan.tests.len(),
            "Running suite"
        );

        let tests = plan.tests.clone();
        let executor = Arc::clone(&self.collaborators.executor);
        let engine = EngineConfig::from_run(&self.config.run);
        let executed = suite
            .run(|| async move { Ok(run_tests(tests, executor, &engine).await) })
            .await?;

        let mut results = create_results_map(&executed);
        for pair in &plan.unreachable {
            results.mark_unreachable(pair.clone());
        }
        let (passed, failed) = results.tally();
        info!(
            target: "mp.runner",
            suite = %suite.name(),
            passed,
            failed,
            unreachable_pairs = plan.unreachable.len(),
            "Suite complete"
        );

        let report = SuiteReport::new(
            suite.name(),
            &results,
            entities.sources.clone(),
            entities.destinations.clone(),
            registry.descriptors(),
            self.config.probes.order.clone(),
        );
        Ok(SuiteOutcome {
            report,
            tests: executed,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::inventory::mock::{ClusterData, MockInventory};
    use crate::models::Pod;
    use crate::probes::mock::{MockOutcome, MockProbeExecutor};
    use crate::provisioner::mock::MockProvisioner;
    use common::types::{EntityId, ProbeKind};

    const CONFIG: &str = r#"
clusters:
  - name: a
    kubeconfig_location: /tmp/a
    namespaces: [{ name: default }]
  - name: b
    kubeconfig_location: /tmp/b
    namespaces: [{ name: default }]
tests:
  - name: open
  - name: isolated
    resources:
      - type: isolation_network_policy
        cluster: a
        namespace: default
        name: isolate
run:
  settle_seconds: 0
"#;

    fn pod(name: &str, address: &str) -> (Pod, String) {
        (
            Pod {
                name: name.to_string(),
                namespace: "default".to_string(),
                address: address.to_string(),
            },
            "worker".to_string(),
        )
    }

    fn collaborators(executor: MockProbeExecutor) -> (Collaborators, Arc<MockProvisioner>) {
        let inventory = MockInventory::new()
            .with_cluster(
                "a",
                ClusterData {
                    pods: vec![pod("p1", "10.1.0.9")],
                    remapped_cidrs: [("b".to_string(), "10.71.0.0/16".to_string())]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                },
            )
            .with_cluster(
                "b",
                ClusterData {
                    pods: vec![pod("p2", "10.2.0.5")],
                    ..Default::default()
                },
            );
        let provisioner = Arc::new(MockProvisioner::new());
        (
            Collaborators {
                inventory: Arc::new(inventory),
                provisioner: provisioner.clone(),
                executor: Arc::new(executor),
            },
            provisioner,
        )
    }

    #[tokio::test]
    async fn test_run_executes_every_suite() {
        let config = ConfigDocument::from_yaml_str(CONFIG).unwrap();
        let executor = MockProbeExecutor::reachable().with_target("8.8.8.8", MockOutcome::Unreachable);
        let (collaborators, provisioner) = collaborators(executor);

        let outcome = Runner::new(config, collaborators).run().await.unwrap();
        assert!(outcome.failure.is_none());
        let outcomes = outcome.suites;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].report.name, "open");
        assert_eq!(outcomes[1].report.name, "isolated");
        assert_eq!(provisioner.created(), vec!["isolate"]);
        assert_eq!(provisioner.deleted(), vec!["isolate"]);

        let results = outcomes[0].report.results();
        let p1 = EntityId::in_cluster("a", "default", "p1");
        let p2 = EntityId::in_cluster("b", "default", "p2");
        let internet = EntityId::external("internet");
        assert_eq!(results.lookup(&p1, &p2, ProbeKind::Ping), Some(true));
        assert_eq!(results.lookup(&p1, &internet, ProbeKind::Ping), Some(false));
        assert_eq!(results.lookup(&p2, &p1, ProbeKind::Ping), None);
        assert!(results.is_unreachable(&p2, &p1));

        let remapped = outcomes[0]
            .tests
            .iter()
            .find(|t| t.destination().id == p2)
            .unwrap();
        assert_eq!(remapped.destination().address, "10.71.0.5");
    }

    #[tokio::test]
    async fn test_bad_resource_fails_before_any_create() {
        let raw = CONFIG.replace(
            "name: isolate\n",
            "name: isolate\n        options: { allowed_clusters: [z] }\n",
        );
        let config = ConfigDocument::from_yaml_str(&raw).unwrap();
        let (collaborators, provisioner) = collaborators(MockProbeExecutor::reachable());

        let result = Runner::new(config, collaborators).run().await;

        assert!(matches!(result, Err(ProberError::Resource(_))));
        assert!(provisioner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_before_suites_runs_nothing() {
        let config = ConfigDocument::from_yaml_str(CONFIG).unwrap();
        let executor = MockProbeExecutor::reachable();
        let (collaborators, provisioner) = collaborators(executor);
        let token = CancellationToken::new();
        token.cancel();

        let outcome = Runner::new(config, collaborators)
            .with_shutdown(token)
            .run()
            .await
            .unwrap();

        assert!(outcome.suites.is_empty());
        assert!(matches!(
            outcome.failure,
            Some(ProberError::Cancelled { suite }) if suite == "open"
        ));
        assert!(provisioner.calls().is_empty());
    }
}
