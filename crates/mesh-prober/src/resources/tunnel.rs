//! Gateway tunnel firewall rule.
//!
//! Drops traffic arriving from the inter-cluster tunnel unless its
//! destination or source is explicitly allowed.

use super::{merge_unique, parse_options, BodyBuilder, BuildTarget, ResourceError, TopologyContext};
use crate::provisioner::ResourceApi;
use common::config::ResourceKind;
use serde::Deserialize;
use serde_json::{json, Map, Value};

const TUNNEL_DEVICE: &str = "liqo-tunnel";
const HOST_DEVICE: &str = "eth0";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TunnelOptions {
    #[serde(default)]
    allowed_destination_ips: Vec<String>,

    #[serde(default)]
    allowed_source_ips: Vec<String>,

    /// Also allow traffic to pods offloaded here from this cluster.
    #[serde(default)]
    allow_to_offloaded_pods_from: Option<String>,

    #[serde(default = "default_allow_established")]
    allow_established: bool,
}

fn default_allow_established() -> bool {
    true
}

pub struct TunnelFirewallRule;

impl BodyBuilder for TunnelFirewallRule {
    fn api(&self) -> ResourceApi {
        ResourceApi::firewall_configuration()
    }

    fn build_body(
        &self,
        target: BuildTarget<'_>,
        options: &Map<String, Value>,
        _context: &TopologyContext<'_>,
    ) -> Result<Value, ResourceError> {
        let options: TunnelOptions =
            parse_options(ResourceKind::TunnelFirewallRule, target.name, options)?;

        let mut destinations = Vec::new();
        merge_unique(&mut destinations, options.allowed_destination_ips);
        if let Some(origin) = &options.allow_to_offloaded_pods_from {
            merge_unique(
                &mut destinations,
                target
                    .cluster
                    .offloaded_from(origin)
                    .iter()
                    .map(|pod| pod.address.clone()),
            );
        }
        let mut sources = Vec::new();
        merge_unique(&mut sources, options.allowed_source_ips);

        let mut rules = vec![
            // Only filter traffic leaving the tunnel towards the fabric
            json!({
                "action": "accept",
                "match": [{ "dev": { "position": "in", "value": TUNNEL_DEVICE }, "op": "neq" }]
            }),
            json!({
                "action": "accept",
                "match": [{ "dev": { "position": "out", "value": HOST_DEVICE }, "op": "eq" }]
            }),
        ];
        if options.allow_established {
            rules.push(json!({
                "action": "accept",
                "match": [{ "ctstate": { "value": ["established", "related"] }, "op": "eq" }]
            }));
        }
        rules.extend(destinations.iter().map(|ip| accept_ip("dst", ip)));
        rules.extend(sources.iter().map(|ip| accept_ip("src", ip)));

        Ok(json!({
            "apiVersion": "networking.liqo.io/v1beta1",
            "kind": "FirewallConfiguration",
            "metadata": {
                "labels": {
                    "liqo.io/managed": "true",
                    "networking.liqo.io/firewall-category": "gateway",
                    "networking.liqo.io/firewall-subcategory": "fabric",
                }
            },
            "spec": {
                "table": {
                    "family": "IPV4",
                    "name": format!("tunnel-firewall-table-{}", target.name),
                    "chains": [{
                        "hook": "postrouting",
                        "name": "tunnel-firewall-chain",
                        "policy": "drop",
                        "priority": 200,
                        "type": "filter",
                        "rules": { "filterRules": rules },
                    }],
                }
            }
        }))
    }
}

fn accept_ip(position: &str, ip: &str) -> Value {
    json!({
        "action": "accept",
        "match": [{ "ip": { "position": position, "value": ip }, "op": "eq" }]
    })
}
