//! Resource provisioner collaborator.
//!
//! Creates and deletes declarative documents in a target cluster. Built-in
//! kinds are addressed by their native API, custom kinds by
//! group/version/plural.

mod kube_provisioner;

pub use kube_provisioner::KubeProvisioner;

use crate::models::AccessHandle;
use kube::discovery::ApiResource;
use std::fmt;
use thiserror::Error;

/// Errors returned by provisioning operations.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{api} '{namespace}/{name}' not found")]
    NotFound {
        api: String,
        namespace: String,
        name: String,
    },

    #[error("No client for cluster '{0}'")]
    UnknownCluster(String),

    #[error("Kubernetes API error on cluster '{cluster}': {source}")]
    Api {
        cluster: String,
        #[source]
        source: kube::Error,
    },

    #[error("Invalid resource body: {0}")]
    InvalidBody(#[from] serde_json::Error),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// What a delete call found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The resource was already absent. Only returned in non-strict mode.
    NotFound,
}

/// API a resource is addressed through.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceApi {
    /// Built-in `networking.k8s.io/v1` NetworkPolicy.
    NetworkPolicy,
    Custom {
        group: String,
        version: String,
        kind: String,
        plural: String,
    },
}

impl ResourceApi {
    /// Liqo firewall configuration.
    pub fn firewall_configuration() -> Self {
        Self::Custom {
            group: "networking.liqo.io".to_string(),
            version: "v1beta1".to_string(),
            kind: "FirewallConfiguration".to_string(),
            plural: "firewallconfigurations".to_string(),
        }
    }

    /// Liqo IPAM network, carrying remapped CIDRs in its status.
    pub fn network() -> Self {
        Self::Custom {
            group: "ipam.liqo.io".to_string(),
            version: "v1alpha1".to_string(),
            kind: "Network".to_string(),
            plural: "networks".to_string(),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::NetworkPolicy => "NetworkPolicy",
            Self::Custom { kind, .. } => kind,
        }
    }

    pub fn api_version(&self) -> String {
        match self {
            Self::NetworkPolicy => "networking.k8s.io/v1".to_string(),
            Self::Custom { group, version, .. } => format!("{group}/{version}"),
        }
    }

    pub fn api_resource(&self) -> ApiResource {
        match self {
            Self::NetworkPolicy => ApiResource {
                group: "networking.k8s.io".to_string(),
                version: "v1".to_string(),
                api_version: self.api_version(),
                kind: "NetworkPolicy".to_string(),
                plural: "networkpolicies".to_string(),
            },
            Self::Custom {
                group,
                version,
                kind,
                plural,
            } => ApiResource {
                group: group.clone(),
                version: version.clone(),
                api_version: self.api_version(),
                kind: kind.clone(),
                plural: plural.clone(),
            },
        }
    }
}

impl fmt::Display for ResourceApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind())
    }
}

/// Map a "not found" delete failure to its non-strict outcome.
pub fn resolve_not_found(
    api: &ResourceApi,
    namespace: &str,
    name: &str,
    strict: bool,
) -> Result<DeleteOutcome, ProvisionError> {
    if strict {
        Err(ProvisionError::NotFound {
            api: api.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    } else {
        Ok(DeleteOutcome::NotFound)
    }
}

/// Create/delete/get/list of declarative resources.
#[async_trait::async_trait]
pub trait ResourceProvisioner: Send + Sync {
    async fn create(
        &self,
        api: &ResourceApi,
        handle: &AccessHandle,
        namespace: &str,
        name: &str,
        body: &serde_json::Value,
    ) -> Result<(), ProvisionError>;

    /// Delete a resource. An absent resource is `Ok(DeleteOutcome::NotFound)`
    /// unless `strict`, in which case it is `Err(ProvisionError::NotFound)`.
    async fn delete(
        &self,
        api: &ResourceApi,
        handle: &AccessHandle,
        namespace: &str,
        name: &str,
        strict: bool,
    ) -> Result<DeleteOutcome, ProvisionError>;

    async fn get(
        &self,
        api: &ResourceApi,
        handle: &AccessHandle,
        namespace: &str,
        name: &str,
    ) -> Result<serde_json::Value, ProvisionError>;

    /// List resources in `namespace`, or in every namespace when `None`.
    async fn list(
        &self,
        api: &ResourceApi,
        handle: &AccessHandle,
        namespace: Option<&str>,
    ) -> Result<Vec<serde_json::Value>, ProvisionError>;
}

/// Mock provisioner module for testing.
///
/// Keeps created documents in memory and records every call.
pub mod mock {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::{Mutex, PoisonError};

    /// A recorded provisioner call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ProvisionCall {
        Create { cluster: String, name: String },
        Delete { cluster: String, name: String },
    }

    type ObjectKey = (String, String, String, String);

    #[derive(Default)]
    pub struct MockProvisioner {
        objects: Mutex<BTreeMap<ObjectKey, serde_json::Value>>,
        calls: Mutex<Vec<ProvisionCall>>,
        fail_create: BTreeSet<String>,
        fail_delete: BTreeSet<String>,
    }

    impl MockProvisioner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Reject creation of resources named `name`.
        #[must_use]
        pub fn failing_create(mut self, name: impl Into<String>) -> Self {
            self.fail_create.insert(name.into());
            self
        }

        /// Reject deletion of resources named `name`.
        #[must_use]
        pub fn failing_delete(mut self, name: impl Into<String>) -> Self {
            self.fail_delete.insert(name.into());
            self
        }

        pub fn calls(&self) -> Vec<ProvisionCall> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Names of deleted resources, in call order.
        pub fn deleted(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    ProvisionCall::Delete { name, .. } => Some(name),
                    ProvisionCall::Create { .. } => None,
                })
                .collect()
        }

        /// Names of created resources, in call order.
        pub fn created(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    ProvisionCall::Create { name, .. } => Some(name),
                    ProvisionCall::Delete { .. } => None,
                })
                .collect()
        }

        /// Number of documents currently stored.
        pub fn live_count(&self) -> usize {
            self.objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }

        fn record(&self, call: ProvisionCall) {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(call);
        }

        fn key(api: &ResourceApi, handle: &AccessHandle, namespace: &str, name: &str) -> ObjectKey {
            (
                handle.cluster().to_string(),
                api.to_string(),
                namespace.to_string(),
                name.to_string(),
            )
        }
    }

    #[async_trait::async_trait]
    impl ResourceProvisioner for MockProvisioner {
        async fn create(
            &self,
            api: &ResourceApi,
            handle: &AccessHandle,
            namespace: &str,
            name: &str,
            body: &serde_json::Value,
        ) -> Result<(), ProvisionError> {
            self.record(ProvisionCall::Create {
                cluster: handle.cluster().to_string(),
                name: name.to_string(),
            });
            if self.fail_create.contains(name) {
                return Err(ProvisionError::Rejected(format!("create of '{name}'")));
            }
            self.objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(Self::key(api, handle, namespace, name), body.clone());
            Ok(())
        }

        async fn delete(
            &self,
            api: &ResourceApi,
            handle: &AccessHandle,
            namespace: &str,
            name: &str,
            strict: bool,
        ) -> Result<DeleteOutcome, ProvisionError> {
            self.record(ProvisionCall::Delete {
                cluster: handle.cluster().to_string(),
                name: name.to_string(),
            });
            if self.fail_delete.contains(name) {
                return Err(ProvisionError::Rejected(format!("delete of '{name}'")));
            }
            let removed = self
                .objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&Self::key(api, handle, namespace, name));
            match removed {
                Some(_) => Ok(DeleteOutcome::Deleted),
                None => resolve_not_found(api, namespace, name, strict),
            }
        }

        async fn get(
            &self,
            api: &ResourceApi,
            handle: &AccessHandle,
            namespace: &str,
            name: &str,
        ) -> Result<serde_json::Value, ProvisionError> {
            self.objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&Self::key(api, handle, namespace, name))
                .cloned()
                .ok_or_else(|| ProvisionError::NotFound {
                    api: api.to_string(),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
        }

        async fn list(
            &self,
            api: &ResourceApi,
            handle: &AccessHandle,
            namespace: Option<&str>,
        ) -> Result<Vec<serde_json::Value>, ProvisionError> {
            let api = api.to_string();
            Ok(self
                .objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|((cluster, kind, ns, _), _)| {
                    cluster == handle.cluster()
                        && *kind == api
                        && namespace.map_or(true, |wanted| ns == wanted)
                })
                .map(|(_, body)| body.clone())
                .collect())
        }
    }
}
