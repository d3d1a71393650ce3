//! Common data types for Mesh Prober components.
//!
//! These are the descriptors that survive a run: they are written into the
//! serialized report document and read back for offline re-rendering, so
//! every type here is plain serde data.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named connectivity check executed from a source pod.
///
/// The derived ordering is only used for map keys; the order in which
/// indicators are rendered is declared explicitly in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// ICMP echo reachability.
    Ping,
    /// HTTP fetch against port 80.
    Curl,
    /// Name resolution.
    Nslookup,
}

impl ProbeKind {
    /// All probe kinds, in the default indicator order.
    pub const ALL: [ProbeKind; 3] = [ProbeKind::Ping, ProbeKind::Curl, ProbeKind::Nslookup];

    /// Lowercase name used in configuration and serialized documents.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProbeKind::Ping => "ping",
            ProbeKind::Curl => "curl",
            ProbeKind::Nslookup => "nslookup",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown probe kind name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown probe kind '{0}'")]
pub struct UnknownProbeKind(pub String);

impl FromStr for ProbeKind {
    type Err = UnknownProbeKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ping" => Ok(ProbeKind::Ping),
            "curl" => Ok(ProbeKind::Curl),
            "nslookup" => Ok(ProbeKind::Nslookup),
            other => Err(UnknownProbeKind(other.to_string())),
        }
    }
}

/// What a test entity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Pod,
    Service,
    External,
}

/// Identity of a test entity: `(cluster, namespace, name)`.
///
/// External endpoints have no cluster and an empty namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId {
    #[serde(rename = "cluster_name")]
    pub cluster: Option<String>,
    pub namespace: String,
    pub name: String,
}

impl EntityId {
    /// Identity of an entity living in a cluster.
    pub fn in_cluster(
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            cluster: Some(cluster.into()),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of an endpoint outside every cluster.
    pub fn external(name: impl Into<String>) -> Self {
        Self {
            cluster: None,
            namespace: String::new(),
            name: name.into(),
        }
    }

    /// Cluster name, if any.
    #[must_use]
    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cluster {
            Some(cluster) => write!(f, "{}/{}/{}", cluster, self.namespace, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A source or destination participating in the reachability matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestEntity {
    #[serde(flatten)]
    pub id: EntityId,

    #[serde(rename = "type")]
    pub kind: EntityKind,

    /// Address as seen from inside the entity's own cluster.
    pub address: String,

    /// Probe kinds this entity accepts as a destination.
    pub probes: Vec<ProbeKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// Hostname the workload reports about itself, checked by HTTP probes
    /// and resolved by name-resolution probes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl TestEntity {
    /// A pod entity. Its hostname defaults to the pod name.
    pub fn pod(
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        probes: Vec<ProbeKind>,
    ) -> Self {
        let id = EntityId::in_cluster(cluster, namespace, name);
        let hostname = Some(id.name.clone());
        Self {
            id,
            kind: EntityKind::Pod,
            address: address.into(),
            probes,
            color: None,
            hostname,
        }
    }

    /// A cluster-local service entity.
    pub fn service(
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        probes: Vec<ProbeKind>,
    ) -> Self {
        Self {
            id: EntityId::in_cluster(cluster, namespace, name),
            kind: EntityKind::Service,
            address: address.into(),
            probes,
            color: None,
            hostname: None,
        }
    }

    /// An endpoint outside every cluster.
    pub fn external(
        name: impl Into<String>,
        address: impl Into<String>,
        probes: Vec<ProbeKind>,
    ) -> Self {
        Self {
            id: EntityId::external(name),
            kind: EntityKind::External,
            address: address.into(),
            probes,
            color: None,
            hostname: None,
        }
    }

    #[must_use]
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Whether this entity accepts the given probe kind.
    #[must_use]
    pub fn supports(&self, probe: ProbeKind) -> bool {
        self.probes.contains(&probe)
    }
}

/// Flattened cluster description carried in report documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    pub name: String,
    pub color: String,
    pub kubeconfig_location: String,
    pub namespaces: Vec<String>,
}
