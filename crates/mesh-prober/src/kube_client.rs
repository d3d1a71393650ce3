//! Kubernetes client pool.
//!
//! One client per cluster, built from the cluster's kubeconfig before any
//! parallel work starts. The pool is read-only afterwards and shared by
//! every probe worker.

use crate::models::{AccessHandle, ClusterRegistry};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// Connect timeout for control-plane requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read timeout for control-plane requests. Pod exec streams are long-lived,
/// so this stays generous.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum KubeClientError {
    #[error("Failed to read kubeconfig '{path}': {source}")]
    Kubeconfig {
        path: PathBuf,
        #[source]
        source: kube::config::KubeconfigError,
    },

    #[error("Failed to build client for cluster '{cluster}': {source}")]
    Client {
        cluster: String,
        #[source]
        source: kube::Error,
    },

    #[error("No client for cluster '{0}'")]
    UnknownCluster(String),
}

/// Clients keyed by cluster name.
#[derive(Clone, Default)]
pub struct ClientPool {
    clients: HashMap<String, Client>,
}

impl ClientPool {
    /// Build one client per cluster of the registry.
    #[instrument(skip_all, name = "mp.kube.connect")]
    pub async fn connect(registry: &ClusterRegistry) -> Result<Self, KubeClientError> {
        let mut clients = HashMap::new();
        for cluster in registry.iter() {
            let client = client_for(&cluster.access).await?;
            clients.insert(cluster.name.clone(), client);
        }
        Ok(Self { clients })
    }

    /// Build clients for bare access handles, before any inventory exists.
    pub async fn connect_handles<'a, I>(handles: I) -> Result<Self, KubeClientError>
    where
        I: IntoIterator<Item = &'a AccessHandle>,
    {
        let mut clients = HashMap::new();
        for handle in handles {
            let client = client_for(handle).await?;
            clients.insert(handle.cluster().to_string(), client);
        }
        Ok(Self { clients })
    }

    /// Cheap clone of the client for `handle`'s cluster.
    pub fn client(&self, handle: &AccessHandle) -> Result<Client, KubeClientError> {
        self.clients
            .get(handle.cluster())
            .cloned()
            .ok_or_else(|| KubeClientError::UnknownCluster(handle.cluster().to_string()))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

async fn client_for(handle: &AccessHandle) -> Result<Client, KubeClientError> {
    debug!(
        target: "mp.kube",
        cluster = %handle.cluster(),
        "Building client from kubeconfig"
    );
    let mut config = load_config(handle.kubeconfig()).await?;
    config.connect_timeout = Some(CONNECT_TIMEOUT);
    config.read_timeout = Some(READ_TIMEOUT);
    Client::try_from(config).map_err(|source| KubeClientError::Client {
        cluster: handle.cluster().to_string(),
        source,
    })
}

async fn load_config(path: &Path) -> Result<Config, KubeClientError> {
    let kubeconfig = Kubeconfig::read_from(path).map_err(|source| KubeClientError::Kubeconfig {
        path: path.to_path_buf(),
        source,
    })?;
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|source| KubeClientError::Kubeconfig {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_kubeconfig_is_reported_with_path() {
        let handle = AccessHandle::new("a", "/nonexistent/mesh-prober/a.kubeconfig");
        let err = ClientPool::connect_handles([&handle]).await.err().unwrap();
        match err {
            KubeClientError::Kubeconfig { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/mesh-prober/a.kubeconfig"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_pool_has_no_clients() {
        let pool = ClientPool::default();
        assert!(pool.is_empty());
        assert!(matches!(
            pool.client(&AccessHandle::new("a", "/tmp/a")),
            Err(KubeClientError::UnknownCluster(name)) if name == "a"
        ));
    }
}
