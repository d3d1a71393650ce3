//! Test-scoped traffic-control resources.
//!
//! Each configured resource is turned into a [`TestResource`] when its suite
//! is built: the kind's builder reads the option bag and a read-only
//! [`TopologyContext`] and produces the native declarative body once. The
//! lifecycle manager then only moves the resource through its states.

mod fabric;
mod isolation;
mod tunnel;

use crate::models::{AccessHandle, Cluster, ClusterRegistry};
use crate::provisioner::ResourceApi;
use common::config::{ResourceConfig, ResourceKind, SuiteConfig};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

pub use fabric::FabricFirewallRule;
pub use isolation::IsolationNetworkPolicy;
pub use tunnel::TunnelFirewallRule;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("Resource '{resource}' targets unknown cluster '{cluster}'")]
    UnknownCluster { resource: String, cluster: String },

    #[error("Resource '{resource}' allows unknown peer cluster '{peer}'")]
    UnknownPeerCluster { resource: String, peer: String },

    #[error("Resource '{resource}': cluster '{cluster}' has no route to peer cluster '{peer}'")]
    NoRouteToPeer {
        resource: String,
        cluster: String,
        peer: String,
    },

    #[error("Invalid options for {kind} '{resource}': {reason}")]
    InvalidOptions {
        kind: ResourceKind,
        resource: String,
        reason: String,
    },

    #[error("Resource '{resource}' cannot move from {from} to {to}")]
    InvalidTransition {
        resource: String,
        from: ResourceState,
        to: ResourceState,
    },
}

/// Lifecycle state of a test-scoped resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Unprovisioned,
    Active,
    Removed,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceState::Unprovisioned => "unprovisioned",
            ResourceState::Active => "active",
            ResourceState::Removed => "removed",
        })
    }
}

/// Read-only view of the topology handed to body builders.
#[derive(Debug, Clone, Copy)]
pub struct TopologyContext<'a> {
    registry: &'a ClusterRegistry,
}

impl<'a> TopologyContext<'a> {
    pub fn new(registry: &'a ClusterRegistry) -> Self {
        Self { registry }
    }

    pub fn cluster(&self, name: &str) -> Option<&'a Cluster> {
        self.registry.get(name)
    }
}

/// Where a resource goes and what it is called.
#[derive(Debug, Clone, Copy)]
pub struct BuildTarget<'a> {
    pub cluster: &'a Cluster,
    pub namespace: &'a str,
    pub name: &'a str,
}

/// Body builder for one resource kind.
pub trait BodyBuilder: Sync {
    /// API the built body is submitted through.
    fn api(&self) -> ResourceApi;

    /// Native declarative body, without namespace and name.
    fn build_body(
        &self,
        target: BuildTarget<'_>,
        options: &Map<String, Value>,
        context: &TopologyContext<'_>,
    ) -> Result<Value, ResourceError>;
}

/// Builder registered for a kind.
pub fn builder_for(kind: ResourceKind) -> &'static dyn BodyBuilder {
    match kind {
        ResourceKind::IsolationNetworkPolicy => &IsolationNetworkPolicy,
        ResourceKind::TunnelFirewallRule => &TunnelFirewallRule,
        ResourceKind::FabricFirewallRule => &FabricFirewallRule,
    }
}

/// Decode a kind's option bag into its typed form.
pub(crate) fn parse_options<T: DeserializeOwned>(
    kind: ResourceKind,
    resource: &str,
    options: &Map<String, Value>,
) -> Result<T, ResourceError> {
    serde_json::from_value(Value::Object(options.clone())).map_err(|e| {
        ResourceError::InvalidOptions {
            kind,
            resource: resource.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Append `items` to `list`, skipping values already present.
pub(crate) fn merge_unique(list: &mut Vec<String>, items: impl IntoIterator<Item = String>) {
    for item in items {
        if !list.contains(&item) {
            list.push(item);
        }
    }
}

/// A resource created for the duration of one suite.
#[derive(Debug, Clone)]
pub struct TestResource {
    kind: ResourceKind,
    api: ResourceApi,
    cluster: String,
    access: AccessHandle,
    namespace: String,
    name: String,
    options: Map<String, Value>,
    body: Value,
    state: ResourceState,
}

impl TestResource {
    /// Resolve the target cluster and build the body.
    pub fn from_config(
        config: &ResourceConfig,
        context: &TopologyContext<'_>,
    ) -> Result<Self, ResourceError> {
        let cluster =
            context
                .cluster(&config.cluster)
                .ok_or_else(|| ResourceError::UnknownCluster {
                    resource: config.name.clone(),
                    cluster: config.cluster.clone(),
                })?;

        let builder = builder_for(config.kind);
        let target = BuildTarget {
            cluster,
            namespace: &config.namespace,
            name: &config.name,
        };
        let mut body = builder.build_body(target, &config.options, context)?;
        set_identity(&mut body, &config.namespace, &config.name);

        Ok(Self {
            kind: config.kind,
            api: builder.api(),
            cluster: cluster.name.clone(),
            access: cluster.access.clone(),
            namespace: config.namespace.clone(),
            name: config.name.clone(),
            options: config.options.clone(),
            body,
            state: ResourceState::Unprovisioned,
        })
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn api(&self) -> &ResourceApi {
        &self.api
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn access(&self) -> &AccessHandle {
        &self.access
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub fn mark_active(&mut self) -> Result<(), ResourceError> {
        self.transition(ResourceState::Unprovisioned, ResourceState::Active)
    }

    pub fn mark_removed(&mut self) -> Result<(), ResourceError> {
        self.transition(ResourceState::Active, ResourceState::Removed)
    }

    fn transition(&mut self, from: ResourceState, to: ResourceState) -> Result<(), ResourceError> {
        if self.state != from {
            return Err(ResourceError::InvalidTransition {
                resource: self.to_string(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

impl fmt::Display for TestResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{}/{}",
            self.kind, self.cluster, self.namespace, self.name
        )
    }
}

/// Stamp `metadata.namespace` and `metadata.name`, keeping other metadata.
fn set_identity(body: &mut Value, namespace: &str, name: &str) {
    let Some(object) = body.as_object_mut() else {
        return;
    };
    let metadata = object
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if !metadata.is_object() {
        *metadata = Value::Object(Map::new());
    }
    if let Some(metadata) = metadata.as_object_mut() {
        metadata.insert("namespace".to_string(), Value::String(namespace.to_string()));
        metadata.insert("name".to_string(), Value::String(name.to_string()));
    }
}

/// Build every resource of a suite, in declaration order.
pub fn build_suite_resources(
    suite: &SuiteConfig,
    context: &TopologyContext<'_>,
) -> Result<Vec<TestResource>, ResourceError> {
    suite
        .resources
        .iter()
        .map(|config| TestResource::from_config(config, context))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn registry() -> ClusterRegistry {
        let mut a = Cluster::new(
            "cluster-a",
            "44",
            AccessHandle::new("cluster-a", "/tmp/a"),
            vec!["default".to_string()],
        );
        a.remapped_cidrs
            .insert("cluster-b".to_string(), "10.71.0.0/16".to_string());
        let b = Cluster::new(
            "cluster-b",
            "45",
            AccessHandle::new("cluster-b", "/tmp/b"),
            vec!["default".to_string()],
        );
        ClusterRegistry::new(vec![a, b])
    }

    pub(crate) fn resource(kind: ResourceKind, cluster: &str, options: Value) -> ResourceConfig {
        ResourceConfig {
            kind,
            cluster: cluster.to_string(),
            namespace: "default".to_string(),
            name: "test-resource".to_string(),
            options: options.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_body_carries_namespace_and_name() {
        let registry = registry();
        let ctx = TopologyContext::new(&registry);
        let config = resource(ResourceKind::FabricFirewallRule, "cluster-a", json!({}));

        let res = TestResource::from_config(&config, &ctx).unwrap();
        assert_eq!(res.body()["metadata"]["namespace"], "default");
        assert_eq!(res.body()["metadata"]["name"], "test-resource");
        assert_eq!(res.body()["metadata"]["labels"]["liqo.io/managed"], "true");
        assert_eq!(res.state(), ResourceState::Unprovisioned);
        assert_eq!(res.api(), &ResourceApi::firewall_configuration());
        assert_eq!(
            res.to_string(),
            "fabric_firewall_rule cluster-a/default/test-resource"
        );
    }

    #[test]
    fn test_unknown_target_cluster_fails() {
        let registry = registry();
        let ctx = TopologyContext::new(&registry);
        let config = resource(ResourceKind::IsolationNetworkPolicy, "cluster-z", json!({}));

        assert_eq!(
            TestResource::from_config(&config, &ctx).unwrap_err(),
            ResourceError::UnknownCluster {
                resource: "test-resource".to_string(),
                cluster: "cluster-z".to_string(),
            }
        );
    }

    #[test]
    fn test_state_transitions() {
        let registry = registry();
        let ctx = TopologyContext::new(&registry);
        let config = resource(ResourceKind::IsolationNetworkPolicy, "cluster-a", json!({}));
        let mut res = TestResource::from_config(&config, &ctx).unwrap();

        assert!(res.mark_removed().is_err());
        res.mark_active().unwrap();
        assert!(res.mark_active().is_err());
        res.mark_removed().unwrap();
        assert_eq!(res.state(), ResourceState::Removed);
        assert!(matches!(
            res.mark_removed(),
            Err(ResourceError::InvalidTransition {
                from: ResourceState::Removed,
                to: ResourceState::Removed,
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_option_is_rejected() {
        let registry = registry();
        let ctx = TopologyContext::new(&registry);
        let config = resource(
            ResourceKind::IsolationNetworkPolicy,
            "cluster-a",
            json!({"allowed_pods": ["x"]}),
        );

        assert!(matches!(
            TestResource::from_config(&config, &ctx),
            Err(ResourceError::InvalidOptions { kind: ResourceKind::IsolationNetworkPolicy, .. })
        ));
    }

    #[test]
    fn test_build_suite_preserves_order() {
        let registry = registry();
        let ctx = TopologyContext::new(&registry);
        let mut first = resource(ResourceKind::FabricFirewallRule, "cluster-a", json!({}));
        first.name = "first".to_string();
        let mut second = resource(ResourceKind::IsolationNetworkPolicy, "cluster-b", json!({}));
        second.name = "second".to_string();
        let suite = SuiteConfig {
            name: "s".to_string(),
            resources: vec![first, second],
        };

        let built = build_suite_resources(&suite, &ctx).unwrap();
        let names: Vec<_> = built.iter().map(TestResource::name).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(built[1].access().cluster(), "cluster-b");
    }

    #[test]
    fn test_merge_unique() {
        let mut list = vec!["a".to_string()];
        merge_unique(&mut list, ["b".to_string(), "a".to_string(), "b".to_string()]);
        assert_eq!(list, vec!["a", "b"]);
    }
}
