//! Cluster discovery.
//!
//! Reads every configured cluster's inventory once, before any test is
//! generated. Clusters are discovered concurrently; the registry keeps
//! configuration order.

use crate::inventory::{virtual_node_names, ClusterInventory, InventoryError};
use crate::models::{AccessHandle, Cluster, ClusterRegistry};
use common::config::{ClusterConfig, ConfigDocument};
use futures::future::try_join_all;
use tracing::{info, instrument};

/// Build the registry for every cluster in `config`.
///
/// # Errors
///
/// Fails on the first inventory call that fails; a partial registry is
/// never returned.
#[instrument(skip_all, name = "mp.discovery.load", fields(clusters = config.clusters.len()))]
pub async fn load_clusters(
    config: &ConfigDocument,
    inventory: &dyn ClusterInventory,
) -> Result<ClusterRegistry, InventoryError> {
    let clusters = try_join_all(
        config
            .clusters
            .iter()
            .map(|cluster| discover_cluster(cluster, inventory)),
    )
    .await?;
    Ok(ClusterRegistry::new(clusters))
}

async fn discover_cluster(
    config: &ClusterConfig,
    inventory: &dyn ClusterInventory,
) -> Result<Cluster, InventoryError> {
    let access = AccessHandle::new(config.name.as_str(), config.kubeconfig_location.as_path());
    let namespaces: Vec<String> = config.namespace_names().map(ToString::to_string).collect();
    let mut cluster = Cluster::new(
        config.name.as_str(),
        config.color.as_str(),
        access.clone(),
        namespaces.clone(),
    );

    cluster.nodes = inventory.list_nodes(&access).await?;
    let excluded = virtual_node_names(&cluster.nodes);

    for namespace in &namespaces {
        let pods = inventory.list_pods(&access, namespace, &excluded).await?;
        let services = inventory.list_services(&access, namespace).await?;
        cluster.pods.insert(namespace.clone(), pods);
        cluster.services.insert(namespace.clone(), services);
    }

    cluster.offloaded_pods = inventory.list_local_offloaded_pods(&access).await?;
    cluster.remapped_cidrs = inventory.list_remapped_cidrs(&access).await?;

    info!(
        target: "mp.inventory",
        cluster = %cluster.name,
        nodes = cluster.nodes.len(),
        virtual_nodes = excluded.len(),
        pods = cluster.pods.values().map(Vec::len).sum::<usize>(),
        services = cluster.services.values().map(Vec::len).sum::<usize>(),
        peers = cluster.remapped_cidrs.len(),
        "Cluster discovered"
    );
    Ok(cluster)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::inventory::mock::{ClusterData, MockInventory};
    use crate::inventory::{VIRTUAL_NODE_LABEL, VIRTUAL_NODE_VALUE};
    use crate::models::{Node, Pod, Service};
    use std::collections::BTreeMap;

    const CONFIG: &str = r#"
clusters:
  - name: cluster-a
    color: "44"
    kubeconfig_location: /tmp/a.kubeconfig
    namespaces: [{ name: default }, { name: web }]
  - name: cluster-b
    color: "45"
    kubeconfig_location: /tmp/b.kubeconfig
    namespaces: [{ name: default }]
"#;

    fn pod(name: &str, namespace: &str, address: &str) -> Pod {
        Pod {
            name: name.to_string(),
            namespace: namespace.to_string(),
            address: address.to_string(),
        }
    }

    fn inventory() -> MockInventory {
        let a = ClusterData {
            nodes: vec![
                Node {
                    name: "worker".to_string(),
                    labels: BTreeMap::new(),
                },
                Node {
                    name: "liqo-cluster-b".to_string(),
                    labels: [(VIRTUAL_NODE_LABEL.to_string(), VIRTUAL_NODE_VALUE.to_string())]
                        .into_iter()
                        .collect(),
                },
            ],
            pods: vec![
                (pod("p1", "default", "10.1.0.9"), "worker".to_string()),
                (pod("p-remote", "default", "10.2.0.77"), "liqo-cluster-b".to_string()),
                (pod("w1", "web", "10.1.0.20"), "worker".to_string()),
            ],
            services: vec![Service {
                name: "s1".to_string(),
                namespace: "web".to_string(),
                cluster_ip: "10.96.0.10".to_string(),
                backend: None,
            }],
            remapped_cidrs: [("cluster-b".to_string(), "10.71.0.0/16".to_string())]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let b = ClusterData {
            pods: vec![(pod("p2", "default", "10.2.0.5"), "worker".to_string())],
            offloaded: [("cluster-a".to_string(), vec![pod("p-remote", "default", "10.2.0.77")])]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        MockInventory::new().with_cluster("cluster-a", a).with_cluster("cluster-b", b)
    }

    #[tokio::test]
    async fn test_discovery_populates_registry_in_order() {
        let config = ConfigDocument::from_yaml_str(CONFIG).unwrap();
        let registry = load_clusters(&config, &inventory()).await.unwrap();

        let names: Vec<_> = registry.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["cluster-a", "cluster-b"]);

        let a = registry.get("cluster-a").unwrap();
        assert_eq!(a.color, "44");
        assert_eq!(a.nodes.len(), 2);
        let default_pods: Vec<_> = a.pods_in("default").iter().map(|p| p.name.as_str()).collect();
        assert_eq!(default_pods, vec!["p1"]);
        assert_eq!(a.pods_in("web").len(), 1);
        assert_eq!(a.services_in("web")[0].cluster_ip, "10.96.0.10");
        assert_eq!(registry.remap_table().route("cluster-a", "cluster-b"), Some("10.71.0.0/16"));
        assert_eq!(registry.remap_table().route("cluster-b", "cluster-a"), None);

        let b = registry.get("cluster-b").unwrap();
        assert_eq!(b.offloaded_from("cluster-a")[0].address, "10.2.0.77");
        assert_eq!(
            b.access.kubeconfig(),
            std::path::Path::new("/tmp/b.kubeconfig")
        );
    }

    #[tokio::test]
    async fn test_unavailable_cluster_fails_discovery() {
        let config = ConfigDocument::from_yaml_str(CONFIG).unwrap();
        let inventory = inventory().with_unavailable("cluster-b");

        let result = load_clusters(&config, &inventory).await;
        assert!(matches!(result, Err(InventoryError::Unavailable(name)) if name == "cluster-b"));
    }
}
