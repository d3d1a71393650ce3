//! Connection to the clusters under test.
//!
//! [`MeshEnvironment`] loads the configuration document named by
//! `MESH_PROBER_CONFIG`, checks its kubeconfigs and connects the Kubernetes
//! collaborators once per test.

use common::config::{ConfigDocument, ConfigError};
use mesh_prober::discovery::load_clusters;
use mesh_prober::errors::ProberError;
use mesh_prober::models::ClusterRegistry;
use mesh_prober::runner::{Collaborators, Runner};
use std::path::PathBuf;
use thiserror::Error;

/// Environment variable naming the configuration document.
pub const CONFIG_ENV_VAR: &str = "MESH_PROBER_CONFIG";

/// Environment setup errors.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("MESH_PROBER_CONFIG is not set. Point it at the configuration document of the clusters under test")]
    ConfigNotSet,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to reach the clusters: {0}")]
    Prober(#[from] ProberError),
}

/// Configuration document path taken from the environment.
pub fn config_path() -> Result<PathBuf, EnvError> {
    std::env::var_os(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .ok_or(EnvError::ConfigNotSet)
}

/// Live clusters described by one configuration document.
pub struct MeshEnvironment {
    config: ConfigDocument,
    collaborators: Collaborators,
}

impl MeshEnvironment {
    /// Load the document named by [`CONFIG_ENV_VAR`] and connect to every cluster.
    pub async fn from_env() -> Result<Self, EnvError> {
        let config = ConfigDocument::from_path(&config_path()?)?;
        Self::connect(config).await
    }

    /// Connect to every cluster of an already loaded document.
    pub async fn connect(config: ConfigDocument) -> Result<Self, EnvError> {
        config.check_kubeconfigs()?;
        let collaborators = Collaborators::kubernetes(&config).await?;
        tracing::info!(clusters = config.clusters.len(), "Connected to clusters under test");
        Ok(Self {
            config,
            collaborators,
        })
    }

    pub fn config(&self) -> &ConfigDocument {
        &self.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Discover every cluster without creating anything.
    pub async fn registry(&self) -> Result<ClusterRegistry, EnvError> {
        let registry =
            load_clusters(&self.config, self.collaborators.inventory.as_ref())
                .await
                .map_err(ProberError::from)?;
        Ok(registry)
    }

    /// A runner over a copy of the document, so tests can tweak it.
    pub fn runner(&self, config: ConfigDocument) -> Runner {
        Runner::new(config, self.collaborators.clone())
    }
}
