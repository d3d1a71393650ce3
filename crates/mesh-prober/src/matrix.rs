//! Test matrix construction.
//!
//! Sources are every discovered pod. Destinations are every pod, every
//! service and the configured external endpoints. Each (source, destination)
//! pair goes through the topology exclusion rules, then yields one [`Test`]
//! per probe kind the destination supports.

use crate::models::{AccessHandle, ClusterRegistry, Service};
use crate::remap::{remap_ip, AddressError};
use common::config::{ExternalConfig, ProbeConfig};
use common::types::{EntityId, EntityKind, ProbeKind, TestEntity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatrixError {
    #[error("Duplicate {role} entity '{id}'")]
    DuplicateEntity { role: &'static str, id: EntityId },

    #[error("Source '{0}' does not belong to a cluster")]
    SourceWithoutCluster(EntityId),

    #[error("No access handle for cluster '{0}'")]
    UnknownCluster(String),

    #[error("Cannot remap '{destination}' for cluster '{cluster}': {source}")]
    Remap {
        destination: EntityId,
        cluster: String,
        #[source]
        source: AddressError,
    },

    #[error("Result for {0} already recorded")]
    ResultAlreadyRecorded(String),
}

/// Outcome of a single test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestResult {
    #[default]
    NotRun,
    Success,
    Failure,
}

impl TestResult {
    #[must_use]
    pub fn from_bool(ok: bool) -> Self {
        if ok {
            TestResult::Success
        } else {
            TestResult::Failure
        }
    }

    /// `None` when the test never ran.
    #[must_use]
    pub fn as_bool(self) -> Option<bool> {
        match self {
            TestResult::NotRun => None,
            TestResult::Success => Some(true),
            TestResult::Failure => Some(false),
        }
    }
}

/// One probe from a source pod to a destination.
///
/// Everything but the result is fixed at construction; the result is
/// written once by the test's own execution.
#[derive(Debug, Clone)]
pub struct Test {
    kind: ProbeKind,
    source: TestEntity,
    destination: TestEntity,
    access: AccessHandle,
    result: TestResult,
}

impl Test {
    /// `destination.address` must already be the address the source's
    /// cluster routes to.
    pub fn new(
        kind: ProbeKind,
        source: TestEntity,
        destination: TestEntity,
        access: AccessHandle,
    ) -> Self {
        Self {
            kind,
            source,
            destination,
            access,
            result: TestResult::NotRun,
        }
    }

    pub fn kind(&self) -> ProbeKind {
        self.kind
    }

    pub fn source(&self) -> &TestEntity {
        &self.source
    }

    pub fn destination(&self) -> &TestEntity {
        &self.destination
    }

    pub fn access(&self) -> &AccessHandle {
        &self.access
    }

    pub fn result(&self) -> TestResult {
        self.result
    }

    /// Store the outcome. Only the first non-`NotRun` write is accepted.
    pub fn record(&mut self, result: TestResult) -> Result<(), MatrixError> {
        if self.result != TestResult::NotRun || result == TestResult::NotRun {
            return Err(MatrixError::ResultAlreadyRecorded(self.to_string()));
        }
        self.result = result;
        Ok(())
    }
}

impl std::fmt::Display for Test {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} -> {}",
            self.kind, self.source.id, self.destination.id
        )
    }
}

/// Rows and columns of the matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitySets {
    pub sources: Vec<TestEntity>,
    pub destinations: Vec<TestEntity>,
}

/// Hostname a service's backend reports: the discovered backend first,
/// then the configured naming rule.
fn service_hostname(service: &Service, probes: &ProbeConfig) -> Option<String> {
    service.backend.clone().or_else(|| {
        probes
            .service_hostname
            .as_ref()
            .and_then(|rule| rule.apply(&service.name))
    })
}

/// Derive sources and destinations from the discovered clusters.
///
/// Pods and services take their cluster's color. Order follows clusters,
/// then namespaces, then inventory order, with externals last.
pub fn build_entities(
    registry: &ClusterRegistry,
    probes: &ProbeConfig,
    externals: &[ExternalConfig],
) -> Result<EntitySets, MatrixError> {
    let mut pods = Vec::new();
    let mut services = Vec::new();
    for cluster in registry.iter() {
        for namespace in &cluster.namespaces {
            pods.extend(cluster.pods_in(namespace).iter().map(|pod| {
                TestEntity::pod(
                    cluster.name.as_str(),
                    namespace.as_str(),
                    pod.name.as_str(),
                    pod.address.as_str(),
                    probes.pods.clone(),
                )
                .with_color(cluster.color.as_str())
            }));
            services.extend(cluster.services_in(namespace).iter().map(|svc| {
                let entity = TestEntity::service(
                    cluster.name.as_str(),
                    namespace.as_str(),
                    svc.name.as_str(),
                    svc.cluster_ip.as_str(),
                    probes.services.clone(),
                )
                .with_color(cluster.color.as_str());
                match service_hostname(svc, probes) {
                    Some(hostname) => entity.with_hostname(hostname),
                    None => entity,
                }
            }));
        }
    }

    let externals = externals.iter().map(|ext| {
        let entity = TestEntity::external(ext.name.as_str(), ext.address.as_str(), ext.probes.clone());
        match &ext.hostname {
            Some(hostname) => entity.with_hostname(hostname.as_str()),
            None => entity,
        }
    });

    let sources = pods.clone();
    let destinations: Vec<TestEntity> = pods.into_iter().chain(services).chain(externals).collect();

    ensure_unique("source", &sources)?;
    ensure_unique("destination", &destinations)?;

    Ok(EntitySets {
        sources,
        destinations,
    })
}

fn ensure_unique(role: &'static str, entities: &[TestEntity]) -> Result<(), MatrixError> {
    let mut seen = BTreeSet::new();
    for entity in entities {
        if !seen.insert(&entity.id) {
            return Err(MatrixError::DuplicateEntity {
                role,
                id: entity.id.clone(),
            });
        }
    }
    Ok(())
}

/// A source/destination pair left out because no route exists between
/// their clusters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnreachablePair {
    pub source: EntityId,
    pub destination: EntityId,
}

/// Generated tests plus the pairs the topology rules out.
#[derive(Debug, Clone, Default)]
pub struct MatrixPlan {
    pub tests: Vec<Test>,
    pub unreachable: Vec<UnreachablePair>,
}

#[derive(Debug, Default)]
struct SkipCounts {
    self_pairs: usize,
    remote_services: usize,
    no_route: usize,
}

/// Apply the pairing rules to every (source, destination) combination.
///
/// # Errors
///
/// Fails when a source has no cluster or no access handle, or when a
/// remapped CIDR from the inventory is malformed.
#[instrument(skip_all, name = "mp.matrix.build", fields(sources = sources.len(), destinations = destinations.len()))]
pub fn build_test_matrix(
    sources: &[TestEntity],
    destinations: &[TestEntity],
    registry: &ClusterRegistry,
) -> Result<MatrixPlan, MatrixError> {
    let remap = registry.remap_table();
    let mut plan = MatrixPlan::default();
    let mut skipped = SkipCounts::default();

    for source in sources {
        let source_cluster = source
            .id
            .cluster()
            .ok_or_else(|| MatrixError::SourceWithoutCluster(source.id.clone()))?;
        let access = registry
            .access(source_cluster)
            .ok_or_else(|| MatrixError::UnknownCluster(source_cluster.to_string()))?;

        for destination in destinations {
            if source.id == destination.id {
                skipped.self_pairs += 1;
                continue;
            }

            let destination_cluster = destination.id.cluster();
            if destination.kind == EntityKind::Service && destination_cluster != Some(source_cluster) {
                skipped.remote_services += 1;
                continue;
            }

            let mut effective = destination.clone();
            if let Some(destination_cluster) = destination_cluster.filter(|c| *c != source_cluster) {
                let Some(cidr) = remap.route(source_cluster, destination_cluster) else {
                    debug!(
                        target: "mp.matrix",
                        source = %source.id,
                        destination = %destination.id,
                        "No route between clusters, skipping pair"
                    );
                    skipped.no_route += 1;
                    plan.unreachable.push(UnreachablePair {
                        source: source.id.clone(),
                        destination: destination.id.clone(),
                    });
                    continue;
                };
                let remapped = remap_ip(&destination.address, cidr).map_err(|e| {
                    MatrixError::Remap {
                        destination: destination.id.clone(),
                        cluster: source_cluster.to_string(),
                        source: e,
                    }
                })?;
                effective.address = remapped.to_string();
            }

            plan.tests.extend(destination.probes.iter().map(|kind| {
                Test::new(*kind, source.clone(), effective.clone(), access.clone())
            }));
        }
    }

    info!(
        target: "mp.matrix",
        tests = plan.tests.len(),
        skipped_self = skipped.self_pairs,
        skipped_remote_services = skipped.remote_services,
        skipped_no_route = skipped.no_route,
        "Test matrix built"
    );
    Ok(plan)
}
