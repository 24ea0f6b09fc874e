//! Pod-backed services: launch parameters, manifests and the spawner that
//! drives a [`PodBackend`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::spawner::{SpawnError, Spawner};

pub const ANNOTATION_SERVICE_NAME: &str = "hub.jupyter.org/servicename";
pub const ANNOTATION_SERVER_NAME: &str = "hub.jupyter.org/servername";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodLaunchParams {
    pub service_name: String,
    pub pod_name: String,
    pub pvc_name: String,
    pub volume_name: String,
    pub mount_path: String,
    pub storage_capacity: String,
    pub ensure_pvc: bool,
    pub image: String,
    pub port: Option<u16>,
    pub cmd: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

pub fn pvc_manifest(params: &PodLaunchParams, namespace: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": {
            "name": params.pvc_name,
            "namespace": namespace,
            "labels": params.labels,
            "annotations": params.annotations,
        },
        "spec": {
            "accessModes": ["ReadWriteOnce"],
            "resources": { "requests": { "storage": params.storage_capacity } },
        },
    })
}

pub fn pod_manifest(params: &PodLaunchParams, namespace: &str) -> Value {
    let env: Vec<Value> = params.env.iter().map(|(k, v)| json!({ "name": k, "value": v })).collect();
    let mut container = json!({
        "name": "service",
        "image": params.image,
        "env": env,
        "volumeMounts": [{ "name": params.volume_name, "mountPath": params.mount_path }],
    });
    if !params.cmd.is_empty() {
        container["args"] = json!(params.cmd);
    }
    if let Some(port) = params.port {
        container["ports"] = json!([{ "name": "service", "containerPort": port }]);
    }
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": params.pod_name,
            "namespace": namespace,
            "labels": params.labels,
            "annotations": params.annotations,
        },
        "spec": {
            "restartPolicy": "OnFailure",
            "containers": [container],
            "volumes": [{
                "name": params.volume_name,
                "persistentVolumeClaim": { "claimName": params.pvc_name },
            }],
        },
    })
}

/// Exit status of a pod object, `None` while it is still running.
pub fn pod_exit_status(pod: &Value) -> Option<i32> {
    let terminated_code = || {
        pod.pointer("/status/containerStatuses")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find_map(|c| c.pointer("/state/terminated/exitCode").and_then(Value::as_i64))
            .map(|code| code as i32)
    };
    match pod.pointer("/status/phase").and_then(Value::as_str) {
        Some("Succeeded") => Some(0),
        Some("Failed") => Some(terminated_code().unwrap_or(1)),
        _ => terminated_code(),
    }
}

/// Pod IP once the pod is running.
pub fn pod_ip(pod: &Value) -> Option<String> {
    let running = pod.pointer("/status/phase").and_then(Value::as_str) == Some("Running");
    let ip = pod.pointer("/status/podIP").and_then(Value::as_str).filter(|ip| !ip.is_empty());
    ip.filter(|_| running).map(str::to_string)
}

/// Cluster operations a pod-backed service needs.
#[async_trait]
pub trait PodBackend: Send + Sync {
    async fn ensure_pvc(&self, params: &PodLaunchParams) -> Result<(), SpawnError>;

    /// Create the pod and wait until it runs; returns its IP.
    async fn create_pod(&self, params: &PodLaunchParams) -> Result<String, SpawnError>;

    async fn delete_pod(&self, pod_name: &str) -> Result<(), SpawnError>;

    /// `None` while running; a missing pod reports status 1.
    async fn pod_status(&self, pod_name: &str) -> Result<Option<i32>, SpawnError>;
}

pub struct PodSpawner {
    backend: Arc<dyn PodBackend>,
    params: PodLaunchParams,
}

impl PodSpawner {
    pub fn new(backend: Arc<dyn PodBackend>, params: PodLaunchParams) -> Self { Self { backend, params } }

    pub fn params(&self) -> &PodLaunchParams { &self.params }
}

#[async_trait]
impl Spawner for PodSpawner {
    async fn start(&mut self) -> Result<Option<String>, SpawnError> {
        if self.params.ensure_pvc {
            self.backend.ensure_pvc(&self.params).await?;
        }
        let ip = self.backend.create_pod(&self.params).await?;
        info!(service = %self.params.service_name, pod = %self.params.pod_name, ip = %ip, "service pod running");
        Ok(Some(ip))
    }

    async fn stop(&mut self) -> Result<(), SpawnError> {
        self.backend.delete_pod(&self.params.pod_name).await
    }

    async fn poll(&mut self) -> Result<Option<i32>, SpawnError> {
        self.backend.pod_status(&self.params.pod_name).await
    }
}

/// In-memory pod backend recording every call.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct MockPodBackend {
        pub ip: String,
        pub calls: Mutex<Vec<String>>,
        pub launched: Mutex<Vec<PodLaunchParams>>,
        pub exit_status: Mutex<Option<i32>>,
    }

    impl MockPodBackend {
        pub fn with_ip(ip: &str) -> Self { Self { ip: ip.to_string(), ..Self::default() } }

        pub fn calls(&self) -> Vec<String> { self.calls.lock().unwrap().clone() }
    }

    #[async_trait]
    impl PodBackend for MockPodBackend {
        async fn ensure_pvc(&self, params: &PodLaunchParams) -> Result<(), SpawnError> {
            self.calls.lock().unwrap().push(format!("pvc {}", params.pvc_name));
            Ok(())
        }

        async fn create_pod(&self, params: &PodLaunchParams) -> Result<String, SpawnError> {
            self.calls.lock().unwrap().push(format!("create {}", params.pod_name));
            self.launched.lock().unwrap().push(params.clone());
            Ok(self.ip.clone())
        }

        async fn delete_pod(&self, pod_name: &str) -> Result<(), SpawnError> {
            self.calls.lock().unwrap().push(format!("delete {pod_name}"));
            Ok(())
        }

        async fn pod_status(&self, _pod_name: &str) -> Result<Option<i32>, SpawnError> {
            Ok(*self.exit_status.lock().unwrap())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> PodLaunchParams {
        PodLaunchParams {
            service_name: "dash".into(),
            pod_name: "jupyter-service-dash".into(),
            pvc_name: "claim-service-dash".into(),
            volume_name: "volume-service-dash".into(),
            mount_path: "/srv/dash".into(),
            storage_capacity: "1G".into(),
            ensure_pvc: true,
            image: "dash:latest".into(),
            port: Some(9000),
            env: BTreeMap::from([("A".to_string(), "b".to_string())]),
            ..PodLaunchParams::default()
        }
    }

    #[test]
    fn pod_manifest_mounts_claim() {
        let pod = pod_manifest(&params(), "hub");
        assert_eq!(pod["metadata"]["namespace"], "hub");
        assert_eq!(pod["spec"]["volumes"][0]["persistentVolumeClaim"]["claimName"], "claim-service-dash");
        let container = &pod["spec"]["containers"][0];
        assert_eq!(container["volumeMounts"][0]["mountPath"], "/srv/dash");
        assert_eq!(container["ports"][0]["containerPort"], 9000);
        assert_eq!(container["env"][0]["name"], "A");
        assert!(container.get("args").is_none());

        let pvc = pvc_manifest(&params(), "hub");
        assert_eq!(pvc["spec"]["resources"]["requests"]["storage"], "1G");
    }

    #[test]
    fn exit_status_from_pod_object() {
        assert_eq!(pod_exit_status(&json!({"status": {"phase": "Running"}})), None);
        assert_eq!(pod_exit_status(&json!({"status": {"phase": "Succeeded"}})), Some(0));
        assert_eq!(pod_exit_status(&json!({"status": {"phase": "Failed"}})), Some(1));
        let crashed = json!({"status": {"phase": "Running", "containerStatuses": [
            {"state": {"terminated": {"exitCode": 137}}}
        ]}});
        assert_eq!(pod_exit_status(&crashed), Some(137));
    }

    #[test]
    fn ip_only_when_running() {
        assert_eq!(pod_ip(&json!({"status": {"phase": "Pending", "podIP": "10.0.0.3"}})), None);
        assert_eq!(pod_ip(&json!({"status": {"phase": "Running", "podIP": "10.0.0.3"}})).as_deref(), Some("10.0.0.3"));
    }

    #[tokio::test]
    async fn spawner_ensures_claim_before_pod() {
        let backend = Arc::new(mock::MockPodBackend::with_ip("10.1.2.3"));
        let mut spawner = PodSpawner::new(backend.clone(), params());
        assert_eq!(spawner.start().await.expect("start").as_deref(), Some("10.1.2.3"));
        assert_eq!(spawner.poll().await.expect("poll"), None);
        spawner.stop().await.expect("stop");
        assert_eq!(backend.calls(), vec![
            "pvc claim-service-dash".to_string(),
            "create jupyter-service-dash".to_string(),
            "delete jupyter-service-dash".to_string(),
        ]);
    }
}
