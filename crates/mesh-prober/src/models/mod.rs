//! Mesh Prober models.
//!
//! Value types describing the federated clusters and the workloads
//! discovered in them. No behavior beyond construction and lookup.

use common::types::ClusterDescriptor;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Handle used to reach a cluster's control plane.
///
/// Cheap to clone and never mutated once built, so probe workers can share
/// it freely.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessHandle {
    cluster: String,
    kubeconfig: PathBuf,
}

impl AccessHandle {
    pub fn new(cluster: impl Into<String>, kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            cluster: cluster.into(),
            kubeconfig: kubeconfig.into(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }
}

/// A cluster node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

/// A pod with an assigned address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    pub address: String,
}

/// A service with a cluster IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub name: String,
    pub namespace: String,
    pub cluster_ip: String,

    /// Pod behind the service, when its endpoints name exactly one.
    pub backend: Option<String>,
}

/// A federated cluster and its discovered inventory.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub name: String,

    /// ANSI SGR code used for headers belonging to this cluster.
    pub color: String,

    pub access: AccessHandle,

    /// Monitored namespaces, in configuration order.
    pub namespaces: Vec<String>,

    pub nodes: Vec<Node>,

    /// Pods by namespace. Pods scheduled on virtual nodes are excluded.
    pub pods: BTreeMap<String, Vec<Pod>>,

    /// Services by namespace.
    pub services: BTreeMap<String, Vec<Service>>,

    /// Peer cluster name -> CIDR that this cluster targets to reach the
    /// peer's pods. Unreachable peers are absent.
    pub remapped_cidrs: BTreeMap<String, String>,

    /// Origin cluster name -> pods offloaded from it and running here.
    pub offloaded_pods: BTreeMap<String, Vec<Pod>>,
}

impl Cluster {
    /// A cluster with an empty inventory.
    pub fn new(
        name: impl Into<String>,
        color: impl Into<String>,
        access: AccessHandle,
        namespaces: Vec<String>,
    ) -> Self {
        let pods = namespaces.iter().map(|ns| (ns.clone(), Vec::new())).collect();
        let services = namespaces.iter().map(|ns| (ns.clone(), Vec::new())).collect();
        Self {
            name: name.into(),
            color: color.into(),
            access,
            namespaces,
            nodes: Vec::new(),
            pods,
            services,
            remapped_cidrs: BTreeMap::new(),
            offloaded_pods: BTreeMap::new(),
        }
    }

    /// Pods of a namespace, empty if the namespace is not monitored.
    pub fn pods_in(&self, namespace: &str) -> &[Pod] {
        self.pods.get(namespace).map(Vec::as_slice).unwrap_or_default()
    }

    /// Services of a namespace, empty if the namespace is not monitored.
    pub fn services_in(&self, namespace: &str) -> &[Service] {
        self.services
            .get(namespace)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Pods offloaded into this cluster from `origin`.
    pub fn offloaded_from(&self, origin: &str) -> &[Pod] {
        self.offloaded_pods
            .get(origin)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn descriptor(&self) -> ClusterDescriptor {
        ClusterDescriptor {
            name: self.name.clone(),
            color: self.color.clone(),
            kubeconfig_location: self.access.kubeconfig().display().to_string(),
            namespaces: self.namespaces.clone(),
        }
    }
}

/// Per-source-cluster routes to peer clusters.
///
/// Absence of an entry means "no known route".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemapTable {
    routes: BTreeMap<String, BTreeMap<String, String>>,
}

impl RemapTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        source: impl Into<String>,
        destination: impl Into<String>,
        cidr: impl Into<String>,
    ) {
        self.routes
            .entry(source.into())
            .or_default()
            .insert(destination.into(), cidr.into());
    }

    /// CIDR `source` targets to reach `destination`'s pods.
    pub fn route(&self, source: &str, destination: &str) -> Option<&str> {
        self.routes
            .get(source)
            .and_then(|peers| peers.get(destination))
            .map(String::as_str)
    }
}

/// All clusters of a run, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct ClusterRegistry {
    clusters: Vec<Cluster>,
}

impl ClusterRegistry {
    pub fn new(clusters: Vec<Cluster>) -> Self {
        Self { clusters }
    }

    pub fn get(&self, name: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.iter()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn access(&self, name: &str) -> Option<&AccessHandle> {
        self.get(name).map(|c| &c.access)
    }

    pub fn remap_table(&self) -> RemapTable {
        let mut table = RemapTable::new();
        for cluster in &self.clusters {
            for (peer, cidr) in &cluster.remapped_cidrs {
                table.insert(cluster.name.as_str(), peer.as_str(), cidr.as_str());
            }
        }
        table
    }

    pub fn descriptors(&self) -> BTreeMap<String, ClusterDescriptor> {
        self.clusters
            .iter()
            .map(|c| (c.name.clone(), c.descriptor()))
            .collect()
    }
}
