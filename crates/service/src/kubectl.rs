//! [`PodBackend`] that drives the cluster through the `kubectl` binary.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use configs::KubeConfig;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::pod::{pod_exit_status, pod_ip, pod_manifest, pvc_manifest, PodBackend, PodLaunchParams};
use crate::spawner::SpawnError;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct KubectlBackend {
    kubectl: String,
    namespace: String,
    start_timeout: Duration,
}

impl KubectlBackend {
    pub fn new(kubectl: impl Into<String>, namespace: impl Into<String>, start_timeout: Duration) -> Self {
        Self { kubectl: kubectl.into(), namespace: namespace.into(), start_timeout }
    }

    pub fn from_config(cfg: &KubeConfig) -> Self {
        Self::new(cfg.kubectl.clone(), cfg.namespace.clone(), Duration::from_secs(cfg.start_timeout_secs))
    }

    async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<String, SpawnError> {
        let verb = args.first().copied().unwrap_or_default().to_string();
        let mut cmd = Command::new(&self.kubectl);
        cmd.arg("--namespace")
            .arg(&self.namespace)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| SpawnError::Launch { command: self.kubectl.clone(), source })?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            // Dropping the pipe closes stdin so kubectl sees EOF.
            drop(pipe);
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(SpawnError::Kubectl {
                verb,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn apply(&self, manifest: &Value) -> Result<(), SpawnError> {
        let body = serde_json::to_vec(manifest).map_err(|e| SpawnError::Decode(e.to_string()))?;
        self.run(&["apply", "-f", "-"], Some(&body)).await?;
        Ok(())
    }

    async fn get_pod(&self, pod_name: &str) -> Result<Option<Value>, SpawnError> {
        let out = self.run(&["get", "pod", pod_name, "--ignore-not-found", "-o", "json"], None).await?;
        if out.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&out).map(Some).map_err(|e| SpawnError::Decode(e.to_string()))
    }

    async fn wait_running(&self, pod_name: &str) -> Result<String, SpawnError> {
        loop {
            match self.get_pod(pod_name).await? {
                Some(pod) => {
                    if let Some(status) = pod_exit_status(&pod) {
                        return Err(SpawnError::PodExited { pod: pod_name.to_string(), status });
                    }
                    if let Some(ip) = pod_ip(&pod) {
                        return Ok(ip);
                    }
                }
                None => debug!(pod = %pod_name, "pod not visible yet"),
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl PodBackend for KubectlBackend {
    async fn ensure_pvc(&self, params: &PodLaunchParams) -> Result<(), SpawnError> {
        let existing = self
            .run(&["get", "pvc", &params.pvc_name, "--ignore-not-found", "-o", "name"], None)
            .await?;
        if existing.trim().is_empty() {
            self.apply(&pvc_manifest(params, &self.namespace)).await?;
        }
        Ok(())
    }

    async fn create_pod(&self, params: &PodLaunchParams) -> Result<String, SpawnError> {
        if self.get_pod(&params.pod_name).await?.is_some() {
            warn!(pod = %params.pod_name, "replacing existing pod");
            self.delete_pod(&params.pod_name).await?;
        }
        self.apply(&pod_manifest(params, &self.namespace)).await?;
        tokio::time::timeout(self.start_timeout, self.wait_running(&params.pod_name))
            .await
            .map_err(|_| SpawnError::Timeout(self.start_timeout, format!("pod {}", params.pod_name)))?
    }

    async fn delete_pod(&self, pod_name: &str) -> Result<(), SpawnError> {
        self.run(&["delete", "pod", pod_name, "--ignore-not-found", "--wait=true"], None).await?;
        Ok(())
    }

    async fn pod_status(&self, pod_name: &str) -> Result<Option<i32>, SpawnError> {
        Ok(match self.get_pod(pod_name).await? {
            None => Some(1),
            Some(pod) => pod_exit_status(&pod),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_kubectl_binary_reports_launch_error() {
        let backend = KubectlBackend::new("/nonexistent/kubectl-for-test", "default", Duration::from_secs(1));
        let err = backend.pod_status("jupyter-service-x").await.unwrap_err();
        assert!(matches!(err, SpawnError::Launch { .. }));
    }

    #[tokio::test]
    async fn failing_kubectl_reports_stderr() {
        // `false` ignores its arguments and exits 1.
        let backend = KubectlBackend::new("false", "default", Duration::from_secs(1));
        let err = backend.delete_pod("x").await.unwrap_err();
        assert!(matches!(err, SpawnError::Kubectl { ref verb, .. } if verb == "delete"));
    }

    #[test]
    fn from_config_uses_kube_section() {
        let cfg = KubeConfig { namespace: "hub".into(), start_timeout_secs: 5, ..KubeConfig::default() };
        let backend = KubectlBackend::from_config(&cfg);
        assert_eq!(backend.namespace, "hub");
        assert_eq!(backend.kubectl, "kubectl");
        assert_eq!(backend.start_timeout, Duration::from_secs(5));
    }
}
