//! Probes executed inside the source pod through the exec subresource.

use super::{
    curl_command, curl_succeeded, nslookup_command, ping_command, ping_succeeded, ProbeError,
    ProbeExecutor, ProbeRequest,
};
use crate::kube_client::ClientPool;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, instrument};

/// Captured result of a command run in a pod.
#[derive(Debug, Default)]
struct ExecOutput {
    stdout: String,
    stderr: String,
    /// Whether the exec status reported `Success` (exit code 0).
    success: bool,
}

#[derive(Clone)]
pub struct KubeProbeExecutor {
    pool: ClientPool,
}

impl KubeProbeExecutor {
    pub fn new(pool: ClientPool) -> Self {
        Self { pool }
    }

    async fn exec(
        &self,
        request: &ProbeRequest<'_>,
        command: Vec<String>,
    ) -> Result<ExecOutput, ProbeError> {
        let client = self
            .pool
            .client(request.handle)
            .map_err(|_| ProbeError::UnknownCluster(request.handle.cluster().to_string()))?;
        let pods: Api<Pod> = Api::namespaced(client, request.namespace);

        let params = AttachParams {
            stdin: false,
            stdout: true,
            stderr: true,
            tty: false,
            ..Default::default()
        };

        let mut attached =
            pods.exec(request.pod, command, &params)
                .await
                .map_err(|source| ProbeError::Exec {
                    namespace: request.namespace.to_string(),
                    pod: request.pod.to_string(),
                    source,
                })?;

        let stdout_stream = attached.stdout();
        let stderr_stream = attached.stderr();
        let (stdout, stderr) = tokio::join!(
            read_all(stdout_stream, request.pod),
            read_all(stderr_stream, request.pod)
        );
        let (stdout, stderr) = (stdout?, stderr?);

        let success = match attached.take_status() {
            Some(status) => status
                .await
                .and_then(|s| s.status)
                .is_some_and(|s| s == "Success"),
            None => false,
        };

        attached.join().await.map_err(|e| ProbeError::Stream {
            pod: request.pod.to_string(),
            reason: e.to_string(),
        })?;

        Ok(ExecOutput {
            stdout,
            stderr,
            success,
        })
    }
}

async fn read_all<R>(stream: Option<R>, pod: &str) -> Result<String, ProbeError>
where
    R: AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return Ok(String::new());
    };
    let mut buf = Vec::new();
    stream
        .read_to_end(&mut buf)
        .await
        .map_err(|e| ProbeError::Stream {
            pod: pod.to_string(),
            reason: e.to_string(),
        })?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[async_trait::async_trait]
impl ProbeExecutor for KubeProbeExecutor {
    #[instrument(skip_all, name = "mp.probe.ping", fields(pod = %request.pod, target = %request.target_address))]
    async fn ping(&self, request: &ProbeRequest<'_>) -> Result<bool, ProbeError> {
        let output = self
            .exec(request, ping_command(request.target_address))
            .await?;
        Ok(ping_succeeded(&output.stdout))
    }

    #[instrument(skip_all, name = "mp.probe.curl", fields(pod = %request.pod, target = %request.target_address))]
    async fn curl(&self, request: &ProbeRequest<'_>) -> Result<bool, ProbeError> {
        let output = self
            .exec(request, curl_command(request.target_address, request.pod))
            .await?;
        let ok = curl_succeeded(&output.stdout, request.target_hostname);
        if !ok {
            debug!(
                target: "mp.probe",
                expected_hostname = ?request.target_hostname,
                stdout = %output.stdout.trim(),
                "HTTP probe did not match"
            );
        }
        Ok(ok)
    }

    #[instrument(skip_all, name = "mp.probe.nslookup", fields(pod = %request.pod, target = %request.target_address))]
    async fn nslookup(&self, request: &ProbeRequest<'_>) -> Result<bool, ProbeError> {
        let hostname = request
            .target_hostname
            .ok_or_else(|| ProbeError::MissingHostname(request.target_address.to_string()))?;
        let output = self
            .exec(
                request,
                nslookup_command(hostname, Some(request.target_address)),
            )
            .await?;
        if !output.success {
            debug!(
                target: "mp.probe",
                stderr = %output.stderr.trim(),
                "Name resolution failed"
            );
        }
        Ok(output.success)
    }
}
