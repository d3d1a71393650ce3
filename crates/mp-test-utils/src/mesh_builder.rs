//! Builder for test meshes.
//!
//! One builder describes the clusters once and yields both views a test
//! needs: the configuration document and a mock inventory serving the
//! same workloads.

use crate::test_ids::*;
use common::config::{ConfigDocument, ResourceConfig, ResourceKind, SuiteConfig};
use mesh_prober::inventory::mock::{ClusterData, MockInventory};
use mesh_prober::inventory::{VIRTUAL_NODE_LABEL, VIRTUAL_NODE_VALUE};
use mesh_prober::models::{Node, Pod, Service};
use serde_json::json;
use std::collections::BTreeMap;

struct MeshCluster {
    name: String,
    color: String,
    namespaces: Vec<String>,
    data: ClusterData,
}

/// Builder for a mesh of clusters
///
/// # Example
/// ```rust,ignore
/// let mesh = TestMeshBuilder::new()
///     .with_cluster("a", "44")
///     .with_cluster("b", "45")
///     .with_pod("a", "default", "p1", "10.1.0.9")
///     .with_pod("b", "default", "p2", "10.2.0.5")
///     .with_route("a", "b", "10.1.0.0/16");
/// let inventory = mesh.inventory();
/// let config = mesh.config();
/// ```
pub struct TestMeshBuilder {
    clusters: Vec<MeshCluster>,
    suites: Vec<SuiteConfig>,
    workers: usize,
    settle_seconds: u64,
    strict_delete: bool,
}

impl TestMeshBuilder {
    /// Create an empty mesh with a zero settle interval
    pub fn new() -> Self {
        Self {
            clusters: Vec::new(),
            suites: Vec::new(),
            workers: 4,
            settle_seconds: 0,
            strict_delete: false,
        }
    }

    fn cluster_mut(&mut self, name: &str) -> &mut MeshCluster {
        self.clusters
            .iter_mut()
            .find(|c| c.name == name)
            .unwrap_or_else(|| panic!("cluster '{name}' must be added with with_cluster first"))
    }

    fn ensure_namespace(&mut self, cluster: &str, namespace: &str) {
        let cluster = self.cluster_mut(cluster);
        if !cluster.namespaces.iter().any(|ns| ns == namespace) {
            cluster.namespaces.push(namespace.to_string());
        }
    }

    /// Add a cluster with a worker node and no workloads
    pub fn with_cluster(mut self, name: &str, color: &str) -> Self {
        self.clusters.push(MeshCluster {
            name: name.to_string(),
            color: color.to_string(),
            namespaces: Vec::new(),
            data: ClusterData {
                nodes: vec![Node {
                    name: WORKER_NODE.to_string(),
                    labels: BTreeMap::new(),
                }],
                ..ClusterData::default()
            },
        });
        self
    }

    /// Monitor a namespace without adding workloads to it
    pub fn with_namespace(mut self, cluster: &str, namespace: &str) -> Self {
        self.ensure_namespace(cluster, namespace);
        self
    }

    /// Add a pod scheduled on the worker node
    pub fn with_pod(self, cluster: &str, namespace: &str, name: &str, address: &str) -> Self {
        self.with_pod_on(cluster, namespace, name, address, WORKER_NODE)
    }

    /// Add a pod scheduled on the cluster's virtual node (never a source)
    pub fn with_virtual_pod(mut self, cluster: &str, namespace: &str, name: &str, address: &str) -> Self {
        let data = &mut self.cluster_mut(cluster).data;
        if !data.nodes.iter().any(|n| n.name == VIRTUAL_NODE) {
            data.nodes.push(Node {
                name: VIRTUAL_NODE.to_string(),
                labels: [(VIRTUAL_NODE_LABEL.to_string(), VIRTUAL_NODE_VALUE.to_string())]
                    .into_iter()
                    .collect(),
            });
        }
        self.with_pod_on(cluster, namespace, name, address, VIRTUAL_NODE)
    }

    fn with_pod_on(mut self, cluster: &str, namespace: &str, name: &str, address: &str, node: &str) -> Self {
        self.ensure_namespace(cluster, namespace);
        self.cluster_mut(cluster).data.pods.push((
            Pod {
                name: name.to_string(),
                namespace: namespace.to_string(),
                address: address.to_string(),
            },
            node.to_string(),
        ));
        self
    }

    /// Add a service with a cluster IP
    pub fn with_service(mut self, cluster: &str, namespace: &str, name: &str, cluster_ip: &str) -> Self {
        self.ensure_namespace(cluster, namespace);
        self.cluster_mut(cluster).data.services.push(Service {
            name: name.to_string(),
            namespace: namespace.to_string(),
            cluster_ip: cluster_ip.to_string(),
            backend: None,
        });
        self
    }

    /// Name the pod behind a service added with `with_service`
    pub fn with_service_backend(mut self, cluster: &str, service: &str, backend: &str) -> Self {
        let services = &mut self.cluster_mut(cluster).data.services;
        let entry = services
            .iter_mut()
            .find(|s| s.name == service)
            .unwrap_or_else(|| panic!("service '{service}' must be added with with_service first"));
        entry.backend = Some(backend.to_string());
        self
    }

    /// Let `from` reach `to`'s pods through `cidr`
    pub fn with_route(mut self, from: &str, to: &str, cidr: &str) -> Self {
        self.cluster_mut(from)
            .data
            .remapped_cidrs
            .insert(to.to_string(), cidr.to_string());
        self
    }

    /// Record a pod from `origin` running in `host`
    pub fn with_offloaded_pod(mut self, host: &str, origin: &str, name: &str, address: &str) -> Self {
        self.cluster_mut(host)
            .data
            .offloaded
            .entry(origin.to_string())
            .or_default()
            .push(Pod {
                name: name.to_string(),
                namespace: NS_DEFAULT.to_string(),
                address: address.to_string(),
            });
        self
    }

    /// Declare a test suite
    pub fn with_suite(mut self, suite: SuiteConfig) -> Self {
        self.suites.push(suite);
        self
    }

    /// Set the number of concurrent probes
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Treat already-absent resources as teardown failures
    pub fn with_strict_delete(mut self) -> Self {
        self.strict_delete = true;
        self
    }

    /// Mock inventory serving the declared workloads
    pub fn inventory(&self) -> MockInventory {
        self.clusters
            .iter()
            .fold(MockInventory::new(), |inventory, cluster| {
                inventory.with_cluster(cluster.name.as_str(), cluster.data.clone())
            })
    }

    /// Validated configuration document for the mesh
    pub fn config(&self) -> ConfigDocument {
        let clusters: Vec<_> = self
            .clusters
            .iter()
            .map(|c| {
                json!({
                    "name": c.name,
                    "color": c.color,
                    "kubeconfig_location": format!("/tmp/{}.kubeconfig", c.name),
                    "namespaces": c.namespaces.iter().map(|ns| json!({ "name": ns })).collect::<Vec<_>>(),
                })
            })
            .collect();
        let document = json!({
            "clusters": clusters,
            "tests": self.suites,
            "run": {
                "workers": self.workers,
                "settle_seconds": self.settle_seconds,
                "strict_delete": self.strict_delete,
            },
        });
        let config: ConfigDocument =
            serde_json::from_value(document).expect("mesh builder produced an invalid document");
        config.validate().expect("mesh builder produced an invalid document");
        config
    }

    /// The configuration document as YAML
    pub fn config_yaml(&self) -> String {
        serde_yaml::to_string(&self.config()).expect("configuration serializes to YAML")
    }
}

impl Default for TestMeshBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Two clusters: A (`p1`) routes to B (`p2`, service `s2`) through
/// `ROUTE_A_TO_B`; B has no route back to A.
pub fn two_cluster_mesh() -> TestMeshBuilder {
    TestMeshBuilder::new()
        .with_cluster(CLUSTER_A, COLOR_A)
        .with_cluster(CLUSTER_B, COLOR_B)
        .with_pod(CLUSTER_A, NS_DEFAULT, POD_A1, POD_A1_IP)
        .with_pod(CLUSTER_B, NS_DEFAULT, POD_B1, POD_B1_IP)
        .with_service(CLUSTER_B, NS_DEFAULT, SVC_B1, SVC_B1_IP)
        .with_service_backend(CLUSTER_B, SVC_B1, POD_B1)
        .with_route(CLUSTER_A, CLUSTER_B, ROUTE_A_TO_B)
}

/// A suite declaration
pub fn suite(name: &str, resources: Vec<ResourceConfig>) -> SuiteConfig {
    SuiteConfig {
        name: name.to_string(),
        resources,
    }
}

/// A resource declaration; `options` must be a JSON object or null
pub fn resource(
    kind: ResourceKind,
    cluster: &str,
    namespace: &str,
    name: &str,
    options: serde_json::Value,
) -> ResourceConfig {
    ResourceConfig {
        kind,
        cluster: cluster.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        options: options.as_object().cloned().unwrap_or_default(),
    }
}
