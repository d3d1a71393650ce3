//! Suite resource lifecycle.
//!
//! [`SuiteManager::run`] is a scoped acquisition: create every resource of
//! the suite, wait for policy agents to pick them up, run the protected
//! block, then delete whatever became active. Deletion happens on every
//! exit path, including errors and panics raised by the block and a
//! cancelled shutdown token. A manager dropped with live resources (an
//! aborted task) hands them to a background teardown on the runtime.

use crate::errors::ProberError;
use crate::provisioner::{DeleteOutcome, ProvisionError, ResourceProvisioner};
use crate::resources::{ResourceState, TestResource};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// A resource that could not be removed.
#[derive(Debug)]
pub struct TeardownFailure {
    /// Display form of the resource (`kind cluster/namespace/name`).
    pub resource: String,
    pub error: ProvisionError,
}

impl std::fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.resource, self.error)
    }
}

pub struct SuiteManager {
    name: String,
    resources: Vec<TestResource>,
    provisioner: Arc<dyn ResourceProvisioner>,
    settle: Duration,
    strict_delete: bool,
    shutdown: CancellationToken,
    /// Set once a create is attempted, cleared when teardown completes.
    release_pending: bool,
}

impl SuiteManager {
    pub fn new(
        name: impl Into<String>,
        resources: Vec<TestResource>,
        provisioner: Arc<dyn ResourceProvisioner>,
    ) -> Self {
        Self {
            name: name.into(),
            resources,
            provisioner,
            settle: Duration::from_secs(common::config::DEFAULT_SETTLE_SECONDS),
            strict_delete: false,
            shutdown: CancellationToken::new(),
            release_pending: false,
        }
    }

    /// Cancelling `token` stops setup or the block and tears the suite down.
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Delay between the last create and the protected block.
    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Report resources that vanished before teardown.
    #[must_use]
    pub fn with_strict_delete(mut self, strict: bool) -> Self {
        self.strict_delete = strict;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resources(&self) -> &[TestResource] {
        &self.resources
    }

    /// Provision the suite, run `block`, and tear the suite down.
    ///
    /// # Errors
    ///
    /// - [`ProberError::Setup`] when a create fails (already created
    ///   resources are rolled back and `block` does not run)
    /// - the block's own error, with teardown failures only logged
    /// - [`ProberError::Teardown`] when the block succeeded but some
    ///   resources could not be removed
    /// - [`ProberError::Cancelled`] when the shutdown token fired; the
    ///   block is dropped and the suite torn down first
    ///
    /// A panic in `block` is resumed after teardown.
    pub async fn run<F, Fut, T>(&mut self, block: F) -> Result<T, ProberError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProberError>>,
    {
        self.setup().await?;

        let shutdown = self.shutdown.clone();
        let outcome = tokio::select! {
            caught = AssertUnwindSafe(block()).catch_unwind() => Some(caught),
            () = shutdown.cancelled() => None,
        };
        let failures = self.teardown().await;

        let Some(outcome) = outcome else {
            warn!(
                target: "mp.lifecycle",
                suite = %self.name,
                teardown_failures = failures.len(),
                "Suite cancelled, resources torn down"
            );
            return Err(self.cancelled());
        };

        match outcome {
            Ok(Ok(value)) if failures.is_empty() => Ok(value),
            Ok(Ok(_)) => Err(ProberError::Teardown {
                suite: self.name.clone(),
                failures,
            }),
            Ok(Err(e)) => {
                if !failures.is_empty() {
                    error!(
                        target: "mp.lifecycle",
                        suite = %self.name,
                        failed = failures.len(),
                        "Suite failed and left resources behind"
                    );
                }
                Err(e)
            }
            Err(payload) => {
                error!(
                    target: "mp.lifecycle",
                    suite = %self.name,
                    teardown_failures = failures.len(),
                    "Suite block panicked, resources torn down"
                );
                std::panic::resume_unwind(payload)
            }
        }
    }

    /// Create every resource in order, then wait the settle interval.
    #[instrument(skip_all, name = "mp.lifecycle.setup", fields(suite = %self.name))]
    pub async fn setup(&mut self) -> Result<(), ProberError> {
        info!(
            target: "mp.lifecycle",
            suite = %self.name,
            resources = self.resources.len(),
            "Setting up suite"
        );
        if self.shutdown.is_cancelled() {
            return Err(self.cancelled());
        }

        let provisioner = Arc::clone(&self.provisioner);
        self.release_pending = true;
        let mut failed = None;
        for resource in &mut self.resources {
            if resource.state() != ResourceState::Unprovisioned {
                continue;
            }
            let created = provisioner
                .create(
                    resource.api(),
                    resource.access(),
                    resource.namespace(),
                    resource.name(),
                    resource.body(),
                )
                .await;
            match created {
                Ok(()) => {
                    resource.mark_active()?;
                    info!(target: "mp.lifecycle", resource = %resource, "Resource created");
                }
                Err(source) => {
                    error!(
                        target: "mp.lifecycle",
                        resource = %resource,
                        error = %source,
                        "Resource creation failed"
                    );
                    failed = Some((resource.to_string(), source));
                    break;
                }
            }
        }

        if let Some((resource, source)) = failed {
            let leftovers = self.teardown().await;
            for failure in &leftovers {
                error!(
                    target: "mp.lifecycle",
                    resource = %failure.resource,
                    error = %failure.error,
                    "Rollback could not remove resource"
                );
            }
            return Err(ProberError::Setup {
                suite: self.name.clone(),
                resource,
                source,
            });
        }

        if !self.resources.is_empty() && !self.settle.is_zero() {
            info!(
                target: "mp.lifecycle",
                settle_ms = u64::try_from(self.settle.as_millis()).unwrap_or(u64::MAX),
                "Waiting for resources to settle"
            );
            let shutdown = self.shutdown.clone();
            tokio::select! {
                () = tokio::time::sleep(self.settle) => {}
                () = shutdown.cancelled() => {
                    let failures = self.teardown().await;
                    warn!(
                        target: "mp.lifecycle",
                        suite = %self.name,
                        teardown_failures = failures.len(),
                        "Suite cancelled while settling, resources torn down"
                    );
                    return Err(self.cancelled());
                }
            }
        }
        Ok(())
    }

    fn cancelled(&self) -> ProberError {
        ProberError::Cancelled {
            suite: self.name.clone(),
        }
    }

    /// Delete every active resource. One failure never stops the others.
    #[instrument(skip_all, name = "mp.lifecycle.teardown", fields(suite = %self.name))]
    pub async fn teardown(&mut self) -> Vec<TeardownFailure> {
        let failures = release(
            self.provisioner.as_ref(),
            &mut self.resources,
            self.strict_delete,
        )
        .await;
        self.release_pending = false;

        if failures.is_empty() {
            info!(target: "mp.lifecycle", suite = %self.name, "Suite torn down");
        }
        failures
    }
}

impl Drop for SuiteManager {
    fn drop(&mut self) {
        let live = self
            .resources
            .iter()
            .any(|r| r.state() == ResourceState::Active);
        if !self.release_pending || !live {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(
                target: "mp.lifecycle",
                suite = %self.name,
                "Suite dropped outside a runtime, resources left behind"
            );
            return;
        };

        warn!(
            target: "mp.lifecycle",
            suite = %self.name,
            "Suite dropped mid-run, removing resources in the background"
        );
        let name = std::mem::take(&mut self.name);
        let mut resources = std::mem::take(&mut self.resources);
        let provisioner = Arc::clone(&self.provisioner);
        let strict = self.strict_delete;
        runtime.spawn(async move {
            let failures = release(provisioner.as_ref(), &mut resources, strict).await;
            if failures.is_empty() {
                info!(target: "mp.lifecycle", suite = %name, "Dropped suite torn down");
            }
        });
    }
}

/// Delete every active resource of `resources` in declaration order.
async fn release(
    provisioner: &dyn ResourceProvisioner,
    resources: &mut [TestResource],
    strict: bool,
) -> Vec<TeardownFailure> {
    let mut failures = Vec::new();

    for resource in resources
        .iter_mut()
        .filter(|r| r.state() == ResourceState::Active)
    {
        let deleted = provisioner
            .delete(
                resource.api(),
                resource.access(),
                resource.namespace(),
                resource.name(),
                strict,
            )
            .await;
        match deleted {
            Ok(outcome) => {
                if outcome == DeleteOutcome::NotFound {
                    warn!(target: "mp.lifecycle", resource = %resource, "Resource already absent");
                } else {
                    info!(target: "mp.lifecycle", resource = %resource, "Resource deleted");
                }
                if let Err(e) = resource.mark_removed() {
                    warn!(target: "mp.lifecycle", error = %e, "Unexpected resource state");
                }
            }
            Err(error) => {
                error!(
                    target: "mp.lifecycle",
                    resource = %resource,
                    error = %error,
                    "Resource deletion failed"
                );
                failures.push(TeardownFailure {
                    resource: resource.to_string(),
                    error,
                });
            }
        }
    }
    failures
}
