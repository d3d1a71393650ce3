//! Kubernetes-backed cluster inventory.

use super::{
    group_by_origin, peer_for_network, ClusterInventory, InventoryError, OFFLOADING_ORIGIN_LABEL,
};
use crate::kube_client::ClientPool;
use crate::models::{AccessHandle, Node, Pod, Service};
use crate::provisioner::ResourceApi;
use k8s_openapi::api::core::v1::{
    Endpoints, Node as KubeNode, Pod as KubePod, Service as KubeService,
};
use kube::api::{Api, DynamicObject, ListParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Inventory read through the Kubernetes API.
#[derive(Clone)]
pub struct KubeInventory {
    pool: ClientPool,
}

impl KubeInventory {
    pub fn new(pool: ClientPool) -> Self {
        Self { pool }
    }

    fn client(&self, handle: &AccessHandle) -> Result<Client, InventoryError> {
        self.pool
            .client(handle)
            .map_err(|_| InventoryError::UnknownCluster(handle.cluster().to_string()))
    }
}

fn api_error(handle: &AccessHandle) -> impl FnOnce(kube::Error) -> InventoryError + '_ {
    move |source| InventoryError::Api {
        cluster: handle.cluster().to_string(),
        source,
    }
}

/// Flatten a pod object; pods without an address yet are skipped.
fn pod_record(pod: &KubePod) -> Option<Pod> {
    let address = pod.status.as_ref()?.pod_ip.clone()?;
    Some(Pod {
        name: pod.metadata.name.clone()?,
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        address,
    })
}

/// The pod behind an Endpoints object, when every ready address targets
/// the same one.
fn single_backend(endpoints: &Endpoints) -> Option<String> {
    let mut names = endpoints
        .subsets
        .iter()
        .flatten()
        .flat_map(|subset| subset.addresses.iter().flatten())
        .map(|address| {
            address
                .target_ref
                .as_ref()
                .filter(|target| target.kind.as_deref() == Some("Pod"))
                .and_then(|target| target.name.clone())
        });
    let first = names.next()??;
    names
        .all(|name| name.as_deref() == Some(first.as_str()))
        .then_some(first)
}

fn node_name(pod: &KubePod) -> Option<&str> {
    pod.spec.as_ref()?.node_name.as_deref()
}

fn origin_label(pod: &KubePod) -> Option<String> {
    pod.metadata
        .labels
        .as_ref()?
        .get(OFFLOADING_ORIGIN_LABEL)
        .cloned()
}

#[async_trait::async_trait]
impl ClusterInventory for KubeInventory {
    #[instrument(skip_all, name = "mp.inventory.nodes", fields(cluster = %handle.cluster()))]
    async fn list_nodes(&self, handle: &AccessHandle) -> Result<Vec<Node>, InventoryError> {
        let api: Api<KubeNode> = Api::all(self.client(handle)?);
        let nodes = api
            .list(&ListParams::default())
            .await
            .map_err(api_error(handle))?;

        Ok(nodes
            .items
            .into_iter()
            .filter_map(|node| {
                Some(Node {
                    name: node.metadata.name?,
                    labels: node.metadata.labels.unwrap_or_default(),
                })
            })
            .collect())
    }

    #[instrument(skip_all, name = "mp.inventory.pods", fields(cluster = %handle.cluster(), namespace = %namespace))]
    async fn list_pods(
        &self,
        handle: &AccessHandle,
        namespace: &str,
        excluded_nodes: &[String],
    ) -> Result<Vec<Pod>, InventoryError> {
        let api: Api<KubePod> = Api::namespaced(self.client(handle)?, namespace);
        let pods = api
            .list(&ListParams::default())
            .await
            .map_err(api_error(handle))?;

        let mut records = Vec::new();
        for pod in &pods.items {
            if node_name(pod).is_some_and(|node| excluded_nodes.iter().any(|n| n == node)) {
                continue;
            }
            match pod_record(pod) {
                Some(record) => records.push(record),
                None => debug!(
                    target: "mp.inventory",
                    pod = ?pod.metadata.name,
                    "Skipping pod without an address"
                ),
            }
        }
        Ok(records)
    }

    #[instrument(skip_all, name = "mp.inventory.services", fields(cluster = %handle.cluster(), namespace = %namespace))]
    async fn list_services(
        &self,
        handle: &AccessHandle,
        namespace: &str,
    ) -> Result<Vec<Service>, InventoryError> {
        let client = self.client(handle)?;
        let api: Api<KubeService> = Api::namespaced(client.clone(), namespace);
        let services = api
            .list(&ListParams::default())
            .await
            .map_err(api_error(handle))?;

        let endpoints: Api<Endpoints> = Api::namespaced(client, namespace);
        let backends: BTreeMap<String, String> = endpoints
            .list(&ListParams::default())
            .await
            .map_err(api_error(handle))?
            .items
            .iter()
            .filter_map(|ep| Some((ep.metadata.name.clone()?, single_backend(ep)?)))
            .collect();

        Ok(services
            .items
            .into_iter()
            .filter_map(|svc| {
                let cluster_ip = svc.spec?.cluster_ip.filter(|ip| ip != "None")?;
                let name = svc.metadata.name?;
                Some(Service {
                    backend: backends.get(&name).cloned(),
                    name,
                    namespace: svc.metadata.namespace.unwrap_or_else(|| namespace.to_string()),
                    cluster_ip,
                })
            })
            .collect())
    }

    #[instrument(skip_all, name = "mp.inventory.offloaded", fields(cluster = %handle.cluster()))]
    async fn list_local_offloaded_pods(
        &self,
        handle: &AccessHandle,
    ) -> Result<BTreeMap<String, Vec<Pod>>, InventoryError> {
        let api: Api<KubePod> = Api::all(self.client(handle)?);
        let params = ListParams::default().labels(OFFLOADING_ORIGIN_LABEL);
        let pods = api.list(&params).await.map_err(api_error(handle))?;

        Ok(group_by_origin(pods.items.iter().filter_map(|pod| {
            pod_record(pod).map(|record| (origin_label(pod), record))
        })))
    }

    #[instrument(skip_all, name = "mp.inventory.remapped_cidrs", fields(cluster = %handle.cluster()))]
    async fn list_remapped_cidrs(
        &self,
        handle: &AccessHandle,
    ) -> Result<BTreeMap<String, String>, InventoryError> {
        let resource = ResourceApi::network().api_resource();
        let api: Api<DynamicObject> = Api::all_with(self.client(handle)?, &resource);
        let networks = api
            .list(&ListParams::default())
            .await
            .map_err(api_error(handle))?;

        let mut cidrs = BTreeMap::new();
        for network in &networks.items {
            let (Some(namespace), Some(name)) =
                (network.metadata.namespace.as_deref(), network.metadata.name.as_deref())
            else {
                continue;
            };
            let Some(peer) = peer_for_network(namespace, name) else {
                continue;
            };
            let cidr = network
                .data
                .get("status")
                .and_then(|status| status.get("cidr"))
                .and_then(|cidr| cidr.as_str())
                .filter(|cidr| !cidr.is_empty());
            if let Some(cidr) = cidr {
                cidrs.insert(peer.to_string(), cidr.to_string());
            }
        }

        debug!(
            target: "mp.inventory",
            cluster = %handle.cluster(),
            peers = cidrs.len(),
            "Loaded remapped CIDRs"
        );
        Ok(cidrs)
    }
}
