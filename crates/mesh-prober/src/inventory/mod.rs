//! Cluster inventory collaborator.
//!
//! The core never talks to a control plane directly: it asks a
//! [`ClusterInventory`] for nodes, pods, services, offloaded workloads and
//! remapped CIDRs. [`KubeInventory`] is the Kubernetes-backed implementation;
//! [`mock::MockInventory`] serves canned data to tests.

mod kube_inventory;

pub use kube_inventory::KubeInventory;

use crate::models::{AccessHandle, Node, Pod, Service};
use std::collections::BTreeMap;
use thiserror::Error;

/// Node label marking virtual (proxy) nodes.
pub const VIRTUAL_NODE_LABEL: &str = "liqo.io/type";

/// Value of [`VIRTUAL_NODE_LABEL`] on virtual nodes.
pub const VIRTUAL_NODE_VALUE: &str = "virtual-node";

/// Pod label naming the cluster an offloaded pod originates from.
pub const OFFLOADING_ORIGIN_LABEL: &str = "offloading.liqo.io/origin";

/// Namespace prefix under which per-peer network objects live.
pub const TENANT_NAMESPACE_PREFIX: &str = "liqo-tenant-";

/// Name suffix of the network object describing a peer's pod CIDR.
pub const POD_NETWORK_SUFFIX: &str = "-pod";

/// Errors returned by inventory operations.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("No client for cluster '{0}'")]
    UnknownCluster(String),

    #[error("Kubernetes API error on cluster '{cluster}': {source}")]
    Api {
        cluster: String,
        #[source]
        source: kube::Error,
    },

    #[error("Inventory unavailable for cluster '{0}'")]
    Unavailable(String),
}

/// Read-only view of a cluster's workloads.
#[async_trait::async_trait]
pub trait ClusterInventory: Send + Sync {
    /// All nodes with their labels.
    async fn list_nodes(&self, handle: &AccessHandle) -> Result<Vec<Node>, InventoryError>;

    /// Pods of `namespace` that have an address and are not scheduled on any
    /// of `excluded_nodes`.
    async fn list_pods(
        &self,
        handle: &AccessHandle,
        namespace: &str,
        excluded_nodes: &[String],
    ) -> Result<Vec<Pod>, InventoryError>;

    /// Services of `namespace` that have a cluster IP.
    async fn list_services(
        &self,
        handle: &AccessHandle,
        namespace: &str,
    ) -> Result<Vec<Service>, InventoryError>;

    /// Pods running in this cluster on behalf of another, keyed by origin.
    async fn list_local_offloaded_pods(
        &self,
        handle: &AccessHandle,
    ) -> Result<BTreeMap<String, Vec<Pod>>, InventoryError>;

    /// Peer cluster name -> CIDR this cluster uses to reach the peer's pods.
    async fn list_remapped_cidrs(
        &self,
        handle: &AccessHandle,
    ) -> Result<BTreeMap<String, String>, InventoryError>;
}

pub fn is_virtual_node(node: &Node) -> bool {
    node.labels.get(VIRTUAL_NODE_LABEL).map(String::as_str) == Some(VIRTUAL_NODE_VALUE)
}

/// Names of the virtual nodes among `nodes`.
pub fn virtual_node_names(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .filter(|n| is_virtual_node(n))
        .map(|n| n.name.clone())
        .collect()
}

/// Peer cluster described by a network object, if the object is a pod
/// network in a tenant namespace.
pub fn peer_for_network<'a>(namespace: &str, name: &'a str) -> Option<&'a str> {
    if !namespace.starts_with(TENANT_NAMESPACE_PREFIX) {
        return None;
    }
    name.strip_suffix(POD_NETWORK_SUFFIX)
        .filter(|peer| !peer.is_empty())
}

/// Group pods by their origin label. Pods without the label are local.
pub fn group_by_origin<I>(pods: I) -> BTreeMap<String, Vec<Pod>>
where
    I: IntoIterator<Item = (Option<String>, Pod)>,
{
    let mut grouped: BTreeMap<String, Vec<Pod>> = BTreeMap::new();
    for (origin, pod) in pods {
        if let Some(origin) = origin.filter(|o| !o.is_empty()) {
            grouped.entry(origin).or_default().push(pod);
        }
    }
    grouped
}

/// Mock inventory module for testing.
pub mod mock {
    use super::*;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Canned inventory for one cluster.
    #[derive(Debug, Clone, Default)]
    pub struct ClusterData {
        pub nodes: Vec<Node>,
        /// Pods with the node they are scheduled on.
        pub pods: Vec<(Pod, String)>,
        pub services: Vec<Service>,
        pub offloaded: BTreeMap<String, Vec<Pod>>,
        pub remapped_cidrs: BTreeMap<String, String>,
    }

    /// Mock inventory keyed by cluster name.
    #[derive(Default)]
    pub struct MockInventory {
        clusters: HashMap<String, ClusterData>,
        unavailable: BTreeSet<String>,
        call_count: AtomicUsize,
    }

    impl MockInventory {
        pub fn new() -> Self {
            Self::default()
        }

        /// Serve `data` for `cluster`.
        #[must_use]
        pub fn with_cluster(mut self, cluster: impl Into<String>, data: ClusterData) -> Self {
            self.clusters.insert(cluster.into(), data);
            self
        }

        /// Fail every call for `cluster`.
        #[must_use]
        pub fn with_unavailable(mut self, cluster: impl Into<String>) -> Self {
            self.unavailable.insert(cluster.into());
            self
        }

        /// Get the number of calls made.
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        fn data(&self, handle: &AccessHandle) -> Result<ClusterData, InventoryError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.unavailable.contains(handle.cluster()) {
                return Err(InventoryError::Unavailable(handle.cluster().to_string()));
            }
            Ok(self
                .clusters
                .get(handle.cluster())
                .cloned()
                .unwrap_or_default())
        }
    }

    #[async_trait::async_trait]
    impl ClusterInventory for MockInventory {
        async fn list_nodes(&self, handle: &AccessHandle) -> Result<Vec<Node>, InventoryError> {
            Ok(self.data(handle)?.nodes)
        }

        async fn list_pods(
            &self,
            handle: &AccessHandle,
            namespace: &str,
            excluded_nodes: &[String],
        ) -> Result<Vec<Pod>, InventoryError> {
            Ok(self
                .data(handle)?
                .pods
                .into_iter()
                .filter(|(pod, node)| pod.namespace == namespace && !excluded_nodes.contains(node))
                .map(|(pod, _)| pod)
                .collect())
        }

        async fn list_services(
            &self,
            handle: &AccessHandle,
            namespace: &str,
        ) -> Result<Vec<Service>, InventoryError> {
            Ok(self
                .data(handle)?
                .services
                .into_iter()
                .filter(|s| s.namespace == namespace)
                .collect())
        }

        async fn list_local_offloaded_pods(
            &self,
            handle: &AccessHandle,
        ) -> Result<BTreeMap<String, Vec<Pod>>, InventoryError> {
            Ok(self.data(handle)?.offloaded)
        }

        async fn list_remapped_cidrs(
            &self,
            handle: &AccessHandle,
        ) -> Result<BTreeMap<String, String>, InventoryError> {
            Ok(self.data(handle)?.remapped_cidrs)
        }
    }
}
