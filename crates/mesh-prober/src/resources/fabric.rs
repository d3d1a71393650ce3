//! Fabric firewall rule dropping traffic to selected destinations on every
//! node.

use super::{parse_options, BodyBuilder, BuildTarget, ResourceError, TopologyContext};
use crate::provisioner::ResourceApi;
use common::config::ResourceKind;
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FabricOptions {
    #[serde(default = "default_blocked")]
    blocked_destination_ips: Vec<String>,
}

fn default_blocked() -> Vec<String> {
    vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()]
}

pub struct FabricFirewallRule;

impl BodyBuilder for FabricFirewallRule {
    fn api(&self) -> ResourceApi {
        ResourceApi::firewall_configuration()
    }

    fn build_body(
        &self,
        target: BuildTarget<'_>,
        options: &Map<String, Value>,
        _context: &TopologyContext<'_>,
    ) -> Result<Value, ResourceError> {
        let options: FabricOptions =
            parse_options(ResourceKind::FabricFirewallRule, target.name, options)?;
        if options.blocked_destination_ips.is_empty() {
            return Err(ResourceError::InvalidOptions {
                kind: ResourceKind::FabricFirewallRule,
                resource: target.name.to_string(),
                reason: "blocked_destination_ips must not be empty".to_string(),
            });
        }

        Ok(json!({
            "apiVersion": "networking.liqo.io/v1beta1",
            "kind": "FirewallConfiguration",
            "metadata": {
                "labels": {
                    "liqo.io/managed": "true",
                    "networking.liqo.io/firewall-category": "fabric",
                    "networking.liqo.io/firewall-subcategory": "all-nodes",
                }
            },
            "spec": {
                "table": {
                    "family": "IPV4",
                    "name": "fabric-firewall-table",
                    "chains": [{
                        "hook": "prerouting",
                        "name": "fabric-firewall-chain",
                        "policy": "accept",
                        "priority": 99,
                        "type": "filter",
                        "rules": {
                            "filterRules": [{
                                "action": "drop",
                                "match": [{
                                    "ip": {
                                        "value": options.blocked_destination_ips.join(","),
                                        "position": "dst",
                                    },
                                    "op": "eq",
                                }],
                            }]
                        },
                    }],
                }
            }
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::resources::tests::{registry, resource};
    use crate::resources::TestResource;

    fn build(options: Value) -> Result<Value, ResourceError> {
        let registry = registry();
        let ctx = TopologyContext::new(&registry);
        let config = resource(ResourceKind::FabricFirewallRule, "cluster-a", options);
        TestResource::from_config(&config, &ctx).map(|r| r.body().clone())
    }

    #[test]
    fn test_default_blocks_public_resolvers() {
        let body = build(json!({})).unwrap();
        let chain = &body["spec"]["table"]["chains"][0];
        assert_eq!(body["spec"]["table"]["name"], "fabric-firewall-table");
        assert_eq!(chain["hook"], "prerouting");
        assert_eq!(chain["priority"], 99);

        let rule = &chain["rules"]["filterRules"][0];
        assert_eq!(rule["action"], "drop");
        assert_eq!(rule["match"][0]["ip"]["value"], "8.8.8.8,8.8.4.4");
        assert_eq!(rule["match"][0]["ip"]["position"], "dst");
        assert_eq!(
            body["metadata"]["labels"]["networking.liqo.io/firewall-subcategory"],
            "all-nodes"
        );
    }

    #[test]
    fn test_custom_and_empty_block_lists() {
        let body = build(json!({ "blocked_destination_ips": ["1.1.1.1"] })).unwrap();
        assert_eq!(
            body["spec"]["table"]["chains"][0]["rules"]["filterRules"][0]["match"][0]["ip"]
                ["value"],
            "1.1.1.1"
        );
        assert!(matches!(
            build(json!({ "blocked_destination_ips": [] })),
            Err(ResourceError::InvalidOptions { .. })
        ));
    }
}
