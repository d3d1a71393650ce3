//! Mesh Prober error types.
//!
//! Each subsystem owns a narrow error enum; [`ProberError`] aggregates them
//! for the run orchestration and the binary.

use crate::inventory::InventoryError;
use crate::kube_client::KubeClientError;
use crate::lifecycle::TeardownFailure;
use crate::matrix::MatrixError;
use crate::provisioner::ProvisionError;
use crate::report::ReportError;
use crate::resources::ResourceError;
use common::config::ConfigError;
use thiserror::Error;

/// Top-level Mesh Prober error.
#[derive(Debug, Error)]
pub enum ProberError {
    /// Configuration document is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Cluster clients could not be built.
    #[error("Client error: {0}")]
    Client(#[from] KubeClientError),

    /// Cluster inventory could not be read.
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// Test matrix could not be built.
    #[error("Matrix error: {0}")]
    Matrix(#[from] MatrixError),

    /// A resource declaration could not be turned into a body.
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Report document could not be read or written.
    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    /// Creating a suite resource failed; already created resources were
    /// rolled back.
    #[error("Suite '{suite}': failed to create {resource}: {source}")]
    Setup {
        suite: String,
        resource: String,
        #[source]
        source: ProvisionError,
    },

    /// Some suite resources could not be removed.
    #[error("Suite '{suite}': {} resource(s) could not be removed", failures.len())]
    Teardown {
        suite: String,
        failures: Vec<TeardownFailure>,
    },

    /// Shutdown was requested; the suite's resources were torn down.
    #[error("Suite '{suite}': cancelled by shutdown")]
    Cancelled { suite: String },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_error_keeps_source() {
        let err = ProberError::Setup {
            suite: "isolate".to_string(),
            resource: "isolation_network_policy a/default/np".to_string(),
            source: ProvisionError::Rejected("quota".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Suite 'isolate': failed to create isolation_network_policy a/default/np: Request rejected: quota"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_teardown_error_counts_failures() {
        let err = ProberError::Teardown {
            suite: "isolate".to_string(),
            failures: vec![TeardownFailure {
                resource: "np".to_string(),
                error: ProvisionError::Rejected("busy".to_string()),
            }],
        };
        assert_eq!(
            err.to_string(),
            "Suite 'isolate': 1 resource(s) could not be removed"
        );
    }

    #[test]
    fn test_cancelled_names_suite() {
        let err = ProberError::Cancelled {
            suite: "isolate".to_string(),
        };
        assert_eq!(err.to_string(), "Suite 'isolate': cancelled by shutdown");
    }
}
