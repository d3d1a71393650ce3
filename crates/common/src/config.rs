//! Test plan configuration document.
//!
//! The document is YAML. Parsing is strict (`deny_unknown_fields`) and is
//! followed by a semantic validation pass; both must succeed before any
//! cluster is contacted.

use crate::types::ProbeKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default ANSI background color code for cluster headers.
pub const DEFAULT_CLUSTER_COLOR: &str = "44";

/// Default number of probes executed in parallel.
pub const DEFAULT_WORKERS: usize = 10;

/// Default delay between resource creation and the first probe, giving
/// policy agents time to program the dataplane.
pub const DEFAULT_SETTLE_SECONDS: u64 = 1;

/// Name of the suite run when the document declares none.
pub const BASELINE_SUITE_NAME: &str = "baseline";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Configuration must declare at least one cluster")]
    NoClusters,

    #[error("Cluster '{0}' is declared more than once")]
    DuplicateCluster(String),

    #[error("Field '{0}' must not be empty")]
    EmptyField(String),

    #[error("Resource '{resource}' in suite '{suite}' targets undeclared cluster '{cluster}'")]
    UnknownCluster {
        suite: String,
        resource: String,
        cluster: String,
    },

    #[error("Test suite '{0}' is declared more than once")]
    DuplicateSuite(String),

    #[error("External endpoint '{0}' is declared more than once")]
    DuplicateExternal(String),

    #[error("Invalid address '{address}' for external endpoint '{name}'")]
    InvalidExternalAddress { name: String, address: String },

    #[error("Invalid worker count: {0}")]
    InvalidWorkers(String),

    #[error("Invalid probe order: {0}")]
    InvalidProbeOrder(String),

    #[error("Kubeconfig file '{path}' for cluster '{cluster}' not found")]
    KubeconfigNotFound { cluster: String, path: PathBuf },
}

/// Root of the configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigDocument {
    pub clusters: Vec<ClusterConfig>,

    #[serde(default)]
    pub tests: Vec<SuiteConfig>,

    #[serde(default)]
    pub probes: ProbeConfig,

    #[serde(default = "default_externals")]
    pub externals: Vec<ExternalConfig>,

    #[serde(default)]
    pub run: RunConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    pub name: String,

    #[serde(default = "default_color")]
    pub color: String,

    pub kubeconfig_location: PathBuf,

    pub namespaces: Vec<NamespaceConfig>,
}

/// Kubeconfig locations are redacted in Debug output.
impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("name", &self.name)
            .field("color", &self.color)
            .field("kubeconfig_location", &"[REDACTED]")
            .field("namespaces", &self.namespaces)
            .finish()
    }
}

impl ClusterConfig {
    /// Names of the monitored namespaces.
    pub fn namespace_names(&self) -> impl Iterator<Item = &str> {
        self.namespaces.iter().map(|ns| ns.name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamespaceConfig {
    pub name: String,
}

/// A named batch of test-scoped resources provisioned around one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteConfig {
    pub name: String,

    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// Kind tag of a test-scoped resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    IsolationNetworkPolicy,
    TunnelFirewallRule,
    FabricFirewallRule,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::IsolationNetworkPolicy => "isolation_network_policy",
            ResourceKind::TunnelFirewallRule => "tunnel_firewall_rule",
            ResourceKind::FabricFirewallRule => "fabric_firewall_rule",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    #[serde(rename = "type")]
    pub kind: ResourceKind,

    pub cluster: String,

    pub namespace: String,

    pub name: String,

    /// Kind-specific option bag; validated when the resource body is built.
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

/// Which probe kinds each entity class accepts, and the order in which
/// their indicators are rendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    #[serde(default = "default_pod_probes")]
    pub pods: Vec<ProbeKind>,

    #[serde(default = "default_service_probes")]
    pub services: Vec<ProbeKind>,

    #[serde(default = "default_probe_order")]
    pub order: Vec<ProbeKind>,

    /// Names the pod behind a service when discovery finds no single
    /// backend.
    #[serde(default)]
    pub service_hostname: Option<ServiceHostnameRule>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            pods: default_pod_probes(),
            services: default_service_probes(),
            order: default_probe_order(),
            service_hostname: None,
        }
    }
}

/// Derives a backing pod's hostname by swapping a service name prefix,
/// e.g. `{ prefix: s, replacement: p }` maps `s1` to `p1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceHostnameRule {
    pub prefix: String,
    pub replacement: String,
}

impl ServiceHostnameRule {
    /// `None` when the service name does not carry the prefix.
    #[must_use]
    pub fn apply(&self, service: &str) -> Option<String> {
        service
            .strip_prefix(self.prefix.as_str())
            .map(|rest| format!("{}{rest}", self.replacement))
    }
}

/// An endpoint outside every cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalConfig {
    pub name: String,

    pub address: String,

    #[serde(default)]
    pub hostname: Option<String>,

    pub probes: Vec<ProbeKind>,
}

/// Execution tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_settle_seconds")]
    pub settle_seconds: u64,

    /// Treat "not found" on teardown as an error.
    #[serde(default)]
    pub strict_delete: bool,

    /// Optional upper bound on a single probe. Unset means a probe may block
    /// its worker for as long as its own command runs.
    #[serde(default)]
    pub probe_deadline_seconds: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            settle_seconds: DEFAULT_SETTLE_SECONDS,
            strict_delete: false,
            probe_deadline_seconds: None,
        }
    }
}

impl RunConfig {
    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_seconds)
    }

    #[must_use]
    pub fn probe_deadline(&self) -> Option<Duration> {
        self.probe_deadline_seconds.map(Duration::from_secs)
    }
}

fn default_color() -> String {
    DEFAULT_CLUSTER_COLOR.to_string()
}

fn default_pod_probes() -> Vec<ProbeKind> {
    vec![ProbeKind::Ping, ProbeKind::Curl]
}

fn default_service_probes() -> Vec<ProbeKind> {
    vec![ProbeKind::Curl]
}

fn default_probe_order() -> Vec<ProbeKind> {
    ProbeKind::ALL.to_vec()
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_settle_seconds() -> u64 {
    DEFAULT_SETTLE_SECONDS
}

fn default_externals() -> Vec<ExternalConfig> {
    vec![
        ExternalConfig {
            name: "internet".to_string(),
            address: "8.8.8.8".to_string(),
            hostname: None,
            probes: vec![ProbeKind::Ping],
        },
        ExternalConfig {
            name: "nameserver".to_string(),
            address: "8.8.8.8".to_string(),
            hostname: Some("example.com".to_string()),
            probes: vec![ProbeKind::Nslookup],
        },
    ]
}

impl ConfigDocument {
    /// Read, parse and validate a configuration file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Parse and validate a configuration document.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let document: ConfigDocument = serde_yaml::from_str(raw)?;
        document.validate()?;
        Ok(document)
    }

    /// Semantic checks that the schema alone cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clusters.is_empty() {
            return Err(ConfigError::NoClusters);
        }

        let mut cluster_names = BTreeSet::new();
        for cluster in &self.clusters {
            non_empty("clusters[].name", &cluster.name)?;
            if !cluster_names.insert(cluster.name.as_str()) {
                return Err(ConfigError::DuplicateCluster(cluster.name.clone()));
            }
            for ns in &cluster.namespaces {
                non_empty("clusters[].namespaces[].name", &ns.name)?;
            }
        }

        let mut suite_names = BTreeSet::new();
        for suite in &self.tests {
            non_empty("tests[].name", &suite.name)?;
            if !suite_names.insert(suite.name.as_str()) {
                return Err(ConfigError::DuplicateSuite(suite.name.clone()));
            }
            for resource in &suite.resources {
                non_empty("tests[].resources[].name", &resource.name)?;
                non_empty("tests[].resources[].namespace", &resource.namespace)?;
                if !cluster_names.contains(resource.cluster.as_str()) {
                    return Err(ConfigError::UnknownCluster {
                        suite: suite.name.clone(),
                        resource: resource.name.clone(),
                        cluster: resource.cluster.clone(),
                    });
                }
            }
        }

        let mut external_names = BTreeSet::new();
        for external in &self.externals {
            non_empty("externals[].name", &external.name)?;
            if !external_names.insert(external.name.as_str()) {
                return Err(ConfigError::DuplicateExternal(external.name.clone()));
            }
            if external.address.parse::<Ipv4Addr>().is_err() {
                return Err(ConfigError::InvalidExternalAddress {
                    name: external.name.clone(),
                    address: external.address.clone(),
                });
            }
        }

        if self.run.workers == 0 {
            return Err(ConfigError::InvalidWorkers(
                "run.workers must be greater than 0".to_string(),
            ));
        }

        self.validate_probe_order()
    }

    /// Every probe kind in use must have exactly one indicator slot.
    fn validate_probe_order(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for kind in &self.probes.order {
            if !seen.insert(*kind) {
                return Err(ConfigError::InvalidProbeOrder(format!(
                    "'{}' appears more than once",
                    kind
                )));
            }
        }

        let in_use = self
            .probes
            .pods
            .iter()
            .chain(&self.probes.services)
            .chain(self.externals.iter().flat_map(|e| &e.probes));
        for kind in in_use {
            if !seen.contains(kind) {
                return Err(ConfigError::InvalidProbeOrder(format!(
                    "'{}' is used but missing from probes.order",
                    kind
                )));
            }
        }

        Ok(())
    }

    /// Fail if any cluster's kubeconfig file is missing.
    pub fn check_kubeconfigs(&self) -> Result<(), ConfigError> {
        for cluster in &self.clusters {
            if !cluster.kubeconfig_location.exists() {
                return Err(ConfigError::KubeconfigNotFound {
                    cluster: cluster.name.clone(),
                    path: cluster.kubeconfig_location.clone(),
                });
            }
        }
        Ok(())
    }

    /// Suites to run. A document without suites runs one empty baseline.
    #[must_use]
    pub fn suites(&self) -> Vec<SuiteConfig> {
        if self.tests.is_empty() {
            vec![SuiteConfig {
                name: BASELINE_SUITE_NAME.to_string(),
                resources: Vec::new(),
            }]
        } else {
            self.tests.clone()
        }
    }

    #[must_use]
    pub fn cluster(&self, name: &str) -> Option<&ClusterConfig> {
        self.clusters.iter().find(|c| c.name == name)
    }
}

fn non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyField(field.to_string()));
    }
    Ok(())
}
