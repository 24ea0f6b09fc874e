//! Lifecycle adapter for managed services.
//!
//! A [`ManagedService`] wraps one registry record and the backend that runs
//! it: a pod for image-based services, a child process for command-based
//! ones. Starting a pod rewrites the endpoint host to the pod address, both
//! in the returned record and in the database.

use std::collections::BTreeMap;
use std::sync::Arc;

use configs::{HubConfig, KubeConfig};
use reqwest::Url;
use tracing::{debug, info};

use crate::endpoint::EndpointDescriptor;
use crate::errors::{ConfigError, ServiceError};
use crate::escape::expand_template;
use crate::pod::{PodBackend, PodLaunchParams, PodSpawner, ANNOTATION_SERVER_NAME, ANNOTATION_SERVICE_NAME};
use crate::record::{ServiceKind, ServiceRecord};
use crate::repository::ServiceRepository;
use crate::spawner::{ProcessLaunch, SpawnError, Spawner, SubprocessSpawner};

/// Hub-wide facts every managed service needs to launch.
pub struct AdapterContext {
    pub base_url: String,
    /// Hub API as seen from the hub host.
    pub hub_api_url: String,
    /// Hub API as seen from inside the cluster.
    pub pod_hub_api_url: String,
    pub public_host: String,
    pub kube: KubeConfig,
    pub pod_backend: Option<Arc<dyn PodBackend>>,
    pub repo: Arc<dyn ServiceRepository>,
}

impl AdapterContext {
    pub fn from_config(
        hub: &HubConfig,
        kube: &KubeConfig,
        pod_backend: Option<Arc<dyn PodBackend>>,
        repo: Arc<dyn ServiceRepository>,
    ) -> Result<Self, ConfigError> {
        let bind = Url::parse(&hub.bind_url).map_err(|e| ConfigError::InvalidUrl {
            service: "hub".into(),
            url: hub.bind_url.clone(),
            reason: e.to_string(),
        })?;
        let port = bind.port_or_known_default().unwrap_or(8081);
        let host = match bind.host_str() {
            None | Some("0.0.0.0") | Some("[::]") | Some("") => "127.0.0.1",
            Some(h) => h,
        };
        let hub_api_url = format!("{}://{}:{}{}hub/api", bind.scheme(), host, port, hub.base_url);
        let pod_hub_api_url = match &hub.connect_host {
            Some(connect) => format!("{}://{}:{}{}hub/api", bind.scheme(), connect, port, hub.base_url),
            None => hub_api_url.clone(),
        };
        Ok(Self {
            base_url: hub.base_url.clone(),
            hub_api_url,
            pod_hub_api_url,
            public_host: hub.subdomain_host.clone(),
            kube: kube.clone(),
            pod_backend,
            repo,
        })
    }
}

pub struct ManagedService {
    record: ServiceRecord,
    ctx: Arc<AdapterContext>,
    spawner: Option<Box<dyn Spawner>>,
}

impl ManagedService {
    pub fn new(record: ServiceRecord, ctx: Arc<AdapterContext>) -> Self {
        Self { record, ctx, spawner: None }
    }

    /// Use a prepared spawner instead of building one from the record.
    pub fn with_spawner(record: ServiceRecord, ctx: Arc<AdapterContext>, spawner: Box<dyn Spawner>) -> Self {
        Self { record, ctx, spawner: Some(spawner) }
    }

    pub fn record(&self) -> &ServiceRecord { &self.record }

    pub fn name(&self) -> &str { self.record.name() }

    pub fn environment(&self) -> BTreeMap<String, String> {
        let rec = &self.record;
        let kube = rec.kube_managed();
        let mut env: BTreeMap<String, String> = self
            .ctx
            .kube
            .env_keep
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| (key.clone(), v)))
            .collect();
        env.extend(rec.spec.environment.clone());

        let token = rec.api_token.clone().unwrap_or_default();
        env.insert("JUPYTERHUB_API_TOKEN".into(), token.clone());
        env.insert("JPY_API_TOKEN".into(), token);
        if rec.spec.admin {
            env.insert("JUPYTERHUB_ADMIN_ACCESS".into(), "1".into());
        }
        env.insert("JUPYTERHUB_CLIENT_ID".into(), rec.oauth_client_id());
        env.insert("JUPYTERHUB_HOST".into(), self.ctx.public_host.clone());
        env.insert("JUPYTERHUB_SERVER_NAME".into(), rec.name().to_string());
        let api_url = if kube { &self.ctx.pod_hub_api_url } else { &self.ctx.hub_api_url };
        env.insert("JUPYTERHUB_API_URL".into(), api_url.clone());
        env.insert("JUPYTERHUB_BASE_URL".into(), self.ctx.base_url.clone());
        env.insert("JUPYTERHUB_SERVICE_NAME".into(), rec.name().to_string());
        env.insert("JUPYTERHUB_SERVICE_URL".into(), rec.url.clone().unwrap_or_default());
        let prefix = rec.endpoint.as_ref().map(|e| e.base_url.clone()).unwrap_or_else(|| rec.prefix.clone());
        env.insert("JUPYTERHUB_SERVICE_PREFIX".into(), prefix);
        if let Some(image) = rec.spec.image.as_ref().filter(|_| kube) {
            env.insert("JUPYTER_IMAGE_SPEC".into(), image.clone());
            env.insert("JUPYTER_IMAGE".into(), image.clone());
        }
        env
    }

    pub fn pod_params(&self) -> PodLaunchParams {
        let name = self.record.name();
        let kube = &self.ctx.kube;
        PodLaunchParams {
            service_name: name.to_string(),
            pod_name: expand_template(&kube.pod_name_template, name),
            pvc_name: expand_template(&kube.pvc_name_template, name),
            volume_name: expand_template(&kube.volume_name_template, name),
            mount_path: format!("/srv/{name}"),
            storage_capacity: kube.storage_capacity.clone(),
            ensure_pvc: true,
            image: self.record.spec.image.clone().unwrap_or_default(),
            port: self.record.spec.port,
            cmd: self.record.spec.command.clone(),
            env: self.environment(),
            annotations: BTreeMap::from([
                (ANNOTATION_SERVICE_NAME.to_string(), name.to_string()),
                (ANNOTATION_SERVER_NAME.to_string(), name.to_string()),
            ]),
            labels: BTreeMap::from([
                ("app".to_string(), "jupyterhub".to_string()),
                ("component".to_string(), "service".to_string()),
            ]),
        }
    }

    fn process_launch(&self) -> ProcessLaunch {
        ProcessLaunch {
            name: self.record.name().to_string(),
            command: self.record.spec.command.clone(),
            cwd: self.record.spec.cwd.clone(),
            env: self.environment(),
            user: self.record.spec.user.clone(),
        }
    }

    fn build_spawner(&self) -> Result<Box<dyn Spawner>, ServiceError> {
        match self.record.kind() {
            ServiceKind::KubeManaged => {
                let backend = self
                    .ctx
                    .pod_backend
                    .clone()
                    .ok_or_else(|| SpawnError::NoBackend(self.record.name().to_string()))?;
                Ok(Box::new(PodSpawner::new(backend, self.pod_params())))
            }
            ServiceKind::SubprocessManaged => Ok(Box::new(SubprocessSpawner::new(self.process_launch()))),
            ServiceKind::External => Err(ServiceError::not_found("managed backend")),
        }
    }

    /// Start the backing process; returns the record as it now stands.
    pub async fn start(&mut self) -> Result<ServiceRecord, ServiceError> {
        if self.record.kube_managed() {
            info!(service = %self.record.name(), image = ?self.record.spec.image, "starting kubernetes pod for service");
            if let Some(port) = self.record.spec.port {
                let url = format!("http://0.0.0.0:{port}/");
                let base_url = self.record.endpoint.as_ref().map(|e| e.base_url.clone()).unwrap_or_else(|| self.record.prefix.clone());
                self.record.endpoint = Some(EndpointDescriptor::from_url(self.record.name(), &url, &base_url)?);
                self.record.url = Some(url);
            }
        } else {
            info!(service = %self.record.name(), command = ?self.record.spec.command, "starting service");
        }

        let mut spawner = match self.spawner.take() {
            Some(s) => s,
            None => self.build_spawner()?,
        };
        let started = spawner.start().await;
        self.spawner = Some(spawner);

        if let Some(ip) = started? {
            if self.record.endpoint.is_some() {
                self.record = self.record.with_endpoint_ip(&ip);
                self.ctx.repo.set_endpoint_ip(self.record.id, &ip).await?;
                debug!(service = %self.record.name(), ip = %ip, "endpoint host updated");
            }
        }
        Ok(self.record.clone())
    }

    pub async fn stop(&mut self) -> Result<(), ServiceError> {
        debug!(service = %self.record.name(), "stopping service");
        if self.record.kube_managed() && self.record.endpoint.is_some() {
            self.ctx.repo.delete_endpoint(self.record.id).await?;
            self.record.endpoint = None;
        }
        if let Some(spawner) = self.spawner.as_mut() {
            spawner.stop().await?;
        }
        Ok(())
    }

    /// `None` while running; a service that was never started reports 0.
    pub async fn poll(&mut self) -> Result<Option<i32>, ServiceError> {
        match self.spawner.as_mut() {
            Some(spawner) => Ok(spawner.poll().await?),
            None => Ok(Some(0)),
        }
    }
}
