//! Probe executor collaborator.
//!
//! A probe runs a short command inside a source pod and reports whether the
//! target answered. Each command carries its own one-second guard; the
//! executor adds no timeout of its own.

mod kube_executor;

pub use kube_executor::KubeProbeExecutor;

use crate::models::AccessHandle;
use common::types::ProbeKind;
use thiserror::Error;

/// HTTP port probed by curl.
pub const HTTP_PORT: u16 = 80;

/// Errors raised while running a probe. Any of these counts as a failed
/// result; none of them aborts a run.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("No client for cluster '{0}'")]
    UnknownCluster(String),

    #[error("Failed to exec into pod '{namespace}/{pod}': {source}")]
    Exec {
        namespace: String,
        pod: String,
        #[source]
        source: kube::Error,
    },

    #[error("Failed to read probe output from '{pod}': {reason}")]
    Stream { pod: String, reason: String },

    #[error("Name resolution probe against '{0}' requires a hostname")]
    MissingHostname(String),

    #[error("Probe transport failed: {0}")]
    Transport(String),
}

/// Everything a probe needs to know about one attempt.
#[derive(Debug, Clone, Copy)]
pub struct ProbeRequest<'a> {
    /// Cluster the source pod lives in.
    pub handle: &'a AccessHandle,
    pub namespace: &'a str,
    pub pod: &'a str,
    /// Destination address, already remapped for the source's cluster.
    pub target_address: &'a str,
    pub target_hostname: Option<&'a str>,
}

/// One function per probe kind.
#[async_trait::async_trait]
pub trait ProbeExecutor: Send + Sync {
    async fn ping(&self, request: &ProbeRequest<'_>) -> Result<bool, ProbeError>;

    async fn curl(&self, request: &ProbeRequest<'_>) -> Result<bool, ProbeError>;

    async fn nslookup(&self, request: &ProbeRequest<'_>) -> Result<bool, ProbeError>;

    async fn probe(&self, kind: ProbeKind, request: &ProbeRequest<'_>) -> Result<bool, ProbeError> {
        match kind {
            ProbeKind::Ping => self.ping(request).await,
            ProbeKind::Curl => self.curl(request).await,
            ProbeKind::Nslookup => self.nslookup(request).await,
        }
    }
}

pub fn ping_command(target_address: &str) -> Vec<String> {
    ["ping", "-c", "1", "-W", "1", target_address]
        .iter()
        .map(ToString::to_string)
        .collect()
}

/// The source pod's name travels as a query parameter so the target can
/// log who called.
pub fn curl_command(target_address: &str, source_pod: &str) -> Vec<String> {
    vec![
        "curl".to_string(),
        "-m".to_string(),
        "1".to_string(),
        "-s".to_string(),
        "-w".to_string(),
        "\n%{http_code}".to_string(),
        format!("http://{target_address}:{HTTP_PORT}?source={source_pod}"),
    ]
}

/// Resolve `hostname` through the server at `server`.
pub fn nslookup_command(hostname: &str, server: Option<&str>) -> Vec<String> {
    let mut command = vec!["nslookup".to_string(), hostname.to_string()];
    if let Some(server) = server {
        command.push(server.to_string());
    }
    command
}

pub fn ping_succeeded(output: &str) -> bool {
    output.contains("1 received")
}

/// The last output line is the status code and at least one body line
/// precedes it; when a hostname is expected, the body must report it on a
/// `Hostname: ` line.
pub fn curl_succeeded(output: &str, expected_hostname: Option<&str>) -> bool {
    let lines: Vec<&str> = output.trim().lines().map(str::trim_end).collect();
    let [_, .., status] = lines.as_slice() else {
        return false;
    };
    if *status != "200" {
        return false;
    }
    match expected_hostname {
        None => true,
        Some(hostname) => {
            let received = lines.iter().find(|line| line.starts_with("Hostname: "));
            received.is_some_and(|line| *line == format!("Hostname: {hostname}"))
        }
    }
}

/// Mock probe executor module for testing.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};

    /// Scripted behavior for a target.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MockOutcome {
        Reachable,
        Unreachable,
        /// Raise a transport error.
        Error,
        /// Panic inside the probe.
        Panic,
        /// Never complete.
        Hang,
        /// Answer as a web server reporting this hostname; HTTP probes
        /// check it against the expected one.
        ServesHostname(&'static str),
    }

    /// A recorded probe attempt.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ProbeCall {
        pub kind: ProbeKind,
        pub cluster: String,
        pub pod: String,
        pub target_address: String,
        pub target_hostname: Option<String>,
    }

    /// Mock executor answering by target address, optionally per kind.
    pub struct MockProbeExecutor {
        default: MockOutcome,
        by_target: HashMap<String, MockOutcome>,
        by_target_kind: HashMap<(String, ProbeKind), MockOutcome>,
        calls: Mutex<Vec<ProbeCall>>,
        call_count: AtomicUsize,
    }

    impl MockProbeExecutor {
        /// Every target answers.
        pub fn reachable() -> Self {
            Self::with_default(MockOutcome::Reachable)
        }

        /// No target answers.
        pub fn unreachable() -> Self {
            Self::with_default(MockOutcome::Unreachable)
        }

        pub fn with_default(default: MockOutcome) -> Self {
            Self {
                default,
                by_target: HashMap::new(),
                by_target_kind: HashMap::new(),
                calls: Mutex::new(Vec::new()),
                call_count: AtomicUsize::new(0),
            }
        }

        /// Script every probe against `address`.
        #[must_use]
        pub fn with_target(mut self, address: impl Into<String>, outcome: MockOutcome) -> Self {
            self.by_target.insert(address.into(), outcome);
            self
        }

        /// Script one probe kind against `address`.
        #[must_use]
        pub fn with_target_kind(
            mut self,
            address: impl Into<String>,
            kind: ProbeKind,
            outcome: MockOutcome,
        ) -> Self {
            self.by_target_kind.insert((address.into(), kind), outcome);
            self
        }

        /// Get the number of calls made.
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        pub fn calls(&self) -> Vec<ProbeCall> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        fn outcome(&self, kind: ProbeKind, address: &str) -> MockOutcome {
            self.by_target_kind
                .get(&(address.to_string(), kind))
                .or_else(|| self.by_target.get(address))
                .copied()
                .unwrap_or(self.default)
        }

        #[allow(clippy::panic)]
        async fn run(&self, kind: ProbeKind, request: &ProbeRequest<'_>) -> Result<bool, ProbeError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(ProbeCall {
                    kind,
                    cluster: request.handle.cluster().to_string(),
                    pod: request.pod.to_string(),
                    target_address: request.target_address.to_string(),
                    target_hostname: request.target_hostname.map(ToString::to_string),
                });

            match self.outcome(kind, request.target_address) {
                MockOutcome::Reachable => Ok(true),
                MockOutcome::Unreachable => Ok(false),
                MockOutcome::Error => Err(ProbeError::Transport(format!(
                    "mock {kind} to {}",
                    request.target_address
                ))),
                MockOutcome::Panic => panic!("mock probe panicked"),
                MockOutcome::Hang => std::future::pending().await,
                MockOutcome::ServesHostname(hostname) => match kind {
                    ProbeKind::Curl => {
                        let output = format!(
                            "Hostname: {hostname}\nIP: {}\n200",
                            request.target_address
                        );
                        Ok(curl_succeeded(&output, request.target_hostname))
                    }
                    ProbeKind::Ping | ProbeKind::Nslookup => Ok(true),
                },
            }
        }
    }

    #[async_trait::async_trait]
    impl ProbeExecutor for MockProbeExecutor {
        async fn ping(&self, request: &ProbeRequest<'_>) -> Result<bool, ProbeError> {
            self.run(ProbeKind::Ping, request).await
        }

        async fn curl(&self, request: &ProbeRequest<'_>) -> Result<bool, ProbeError> {
            self.run(ProbeKind::Curl, request).await
        }

        async fn nslookup(&self, request: &ProbeRequest<'_>) -> Result<bool, ProbeError> {
            self.run(ProbeKind::Nslookup, request).await
        }
    }
}
