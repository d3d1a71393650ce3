//! Namespace isolation policy.
//!
//! Selects every pod of the namespace and only lets it talk to the same
//! namespace, explicitly allowed namespaces, CIDRs and peer clusters, plus
//! public addresses.

use super::{parse_options, BodyBuilder, BuildTarget, ResourceError, TopologyContext};
use crate::provisioner::ResourceApi;
use common::config::ResourceKind;
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Private ranges egress to `0.0.0.0/0` never covers.
const PRIVATE_RANGES: [&str; 3] = ["10.0.0.0/8", "192.168.0.0/16", "172.16.0.0/20"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IsolationOptions {
    #[serde(default)]
    allowed_cidrs: Vec<String>,

    /// Matched against the namespace's `name` label.
    #[serde(default)]
    allowed_namespaces: Vec<String>,

    /// Peer clusters whose pods stay reachable through their remapped CIDR.
    #[serde(default)]
    allowed_clusters: Vec<String>,
}

pub struct IsolationNetworkPolicy;

impl BodyBuilder for IsolationNetworkPolicy {
    fn api(&self) -> ResourceApi {
        ResourceApi::NetworkPolicy
    }

    fn build_body(
        &self,
        target: BuildTarget<'_>,
        options: &Map<String, Value>,
        context: &TopologyContext<'_>,
    ) -> Result<Value, ResourceError> {
        let options: IsolationOptions =
            parse_options(ResourceKind::IsolationNetworkPolicy, target.name, options)?;

        let mut peers = Vec::new();
        for cluster in &options.allowed_clusters {
            if context.cluster(cluster).is_none() {
                return Err(ResourceError::UnknownPeerCluster {
                    resource: target.name.to_string(),
                    peer: cluster.clone(),
                });
            }
            let cidr = target.cluster.remapped_cidrs.get(cluster).ok_or_else(|| {
                ResourceError::NoRouteToPeer {
                    resource: target.name.to_string(),
                    cluster: target.cluster.name.clone(),
                    peer: cluster.clone(),
                }
            })?;
            peers.push(ip_block(cidr));
        }

        let namespaces: Vec<Value> = options
            .allowed_namespaces
            .iter()
            .map(|ns| json!({ "namespaceSelector": { "matchLabels": { "name": ns } } }))
            .collect();
        let cidrs: Vec<Value> = options.allowed_cidrs.iter().map(|c| ip_block(c)).collect();

        let same_namespace = json!({ "podSelector": {} });
        let allowed: Vec<Value> = std::iter::once(same_namespace)
            .chain(namespaces)
            .chain(cidrs)
            .chain(peers)
            .collect();

        let mut egress: Vec<Value> = allowed.iter().map(|peer| json!({ "to": [peer] })).collect();
        egress.push(json!({
            "to": [{ "ipBlock": { "cidr": "0.0.0.0/0", "except": PRIVATE_RANGES } }]
        }));
        let ingress: Vec<Value> = allowed
            .iter()
            .map(|peer| json!({ "from": [peer] }))
            .collect();

        Ok(json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "NetworkPolicy",
            "spec": {
                "podSelector": {},
                "policyTypes": ["Egress", "Ingress"],
                "egress": egress,
                "ingress": ingress,
            }
        }))
    }
}

fn ip_block(cidr: &str) -> Value {
    json!({ "ipBlock": { "cidr": cidr } })
}
