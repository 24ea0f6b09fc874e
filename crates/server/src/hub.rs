//! The hub orchestrator: owns every piece of process-wide state and drives
//! the init → start → shutdown lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use configs::AppConfig;
use service::adapter::{AdapterContext, ManagedService};
use service::credentials::CredentialRegistry;
use service::periodic::{check_services_health, spawn_periodic, update_last_activity};
use service::pod::PodBackend;
use service::probe::Prober;
use service::reconciler::Reconciler;
use service::record::HostContext;
use service::registry::{ServiceRegistry, SharedRegistry};
use service::repository::ServiceRepository;
use service::routing::{HubRoute, Proxy, UserRoute};
use service::sequencer::{ReachabilityPolicy, StartupReport, StartupSequencer};

use crate::auth::ApiState;
use crate::errors::StartupError;
use crate::routes;

/// Collaborators the hub is built from.
pub struct HubParts {
    pub repo: Arc<dyn ServiceRepository>,
    pub proxy: Arc<dyn Proxy>,
    pub prober: Arc<dyn Prober>,
    pub pod_backend: Option<Arc<dyn PodBackend>>,
}

pub struct Hub {
    cfg: AppConfig,
    repo: Arc<dyn ServiceRepository>,
    proxy: Arc<dyn Proxy>,
    prober: Arc<dyn Prober>,
    adapter: Arc<AdapterContext>,
    registry: Arc<SharedRegistry>,
    credentials: Arc<CredentialRegistry>,
    hosts: HostContext,
    users: Vec<UserRoute>,
    running: Vec<ManagedService>,
    tasks: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    local_addr: Option<SocketAddr>,
}

fn bind_addr(bind_url: &str) -> Result<(Url, String), StartupError> {
    let url = Url::parse(bind_url).map_err(|e| StartupError::InvalidConfig(format!("hub.bind_url {bind_url}: {e}")))?;
    let host = url.host_str().unwrap_or("127.0.0.1").to_string();
    let port = url.port_or_known_default().unwrap_or(80);
    let addr = if host.contains(':') && !host.starts_with('[') { format!("[{host}]:{port}") } else { format!("{host}:{port}") };
    Ok((url, addr))
}

impl Hub {
    pub fn new(cfg: AppConfig, parts: HubParts) -> Result<Self, StartupError> {
        let adapter = AdapterContext::from_config(&cfg.hub, &cfg.kube, parts.pod_backend, parts.repo.clone())
            .map_err(|e| StartupError::InvalidConfig(e.to_string()))?;
        let hosts = HostContext::new(&cfg.hub.base_url, &cfg.hub.subdomain_host);
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            repo: parts.repo,
            proxy: parts.proxy,
            prober: parts.prober,
            adapter: Arc::new(adapter),
            registry: Arc::new(SharedRegistry::default()),
            credentials: Arc::new(CredentialRegistry::new()),
            hosts,
            users: Vec::new(),
            running: Vec::new(),
            tasks: Vec::new(),
            shutdown_tx,
            local_addr: None,
            cfg,
        })
    }

    pub fn registry(&self) -> Arc<SharedRegistry> { self.registry.clone() }

    pub fn credentials(&self) -> Arc<CredentialRegistry> { self.credentials.clone() }

    pub fn local_addr(&self) -> Option<SocketAddr> { self.local_addr }

    pub fn running_services(&self) -> usize { self.running.len() }

    /// User servers that must keep their routes.
    pub fn set_user_routes(&mut self, users: Vec<UserRoute>) { self.users = users; }

    pub fn api_state(&self) -> ApiState {
        ApiState { registry: self.registry.clone(), credentials: self.credentials.clone(), repo: self.repo.clone() }
    }

    pub fn hub_route(&self) -> HubRoute {
        let target = Url::parse(&self.cfg.hub.bind_url)
            .ok()
            .map(|url| {
                let host = match url.host_str() {
                    None | Some("0.0.0.0") | Some("[::]") => "127.0.0.1".to_string(),
                    Some(h) => h.to_string(),
                };
                format!("{}://{}:{}", url.scheme(), host, url.port_or_known_default().unwrap_or(80))
            })
            .unwrap_or_default();
        HubRoute { routespec: self.cfg.hub.base_url.clone(), target }
    }

    /// Reconcile the declared services with the database and publish the registry.
    pub async fn init_services(&self) -> Result<Arc<ServiceRegistry>, StartupError> {
        let reconciler = Reconciler::new(self.repo.clone(), self.credentials.clone(), self.registry.clone(), self.hosts.clone());
        Ok(reconciler.reconcile(&self.cfg.services).await?)
    }

    /// Bring up proxy, listener and services, then schedule periodic jobs.
    pub async fn start(&mut self) -> Result<StartupReport, StartupError> {
        if self.proxy.should_start() {
            self.proxy.start().await.map_err(|e| StartupError::Proxy(e.to_string()))?;
        }
        self.proxy.get_all_routes().await.map_err(|e| StartupError::Proxy(e.to_string()))?;

        let (url, addr) = bind_addr(&self.cfg.hub.bind_url)?;
        let listener = TcpListener::bind(&addr).await.map_err(|source| StartupError::Bind { addr: addr.clone(), source })?;
        self.local_addr = listener.local_addr().ok();
        let app = routes::build_router(self.api_state(), &self.cfg.hub.base_url);
        let mut stop = self.shutdown_tx.subscribe();
        self.tasks.push(tokio::spawn(async move {
            let graceful = async move {
                while stop.changed().await.is_ok() {
                    if *stop.borrow() {
                        break;
                    }
                }
            };
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(graceful).await {
                error!(error = %e, "hub api server failed");
            }
        }));
        info!(event = "listener_ready", addr = ?self.local_addr, "hub api listening");

        let sequencer = StartupSequencer::new(
            self.prober.clone(),
            self.proxy.clone(),
            ReachabilityPolicy::from(&self.cfg.hub.reachability),
        );
        let hub_route = self.hub_route();
        let ctx = self.adapter.clone();
        let report = sequencer
            .run(&self.registry, |rec| ManagedService::new(rec, ctx.clone()), &mut self.running, &hub_route, &self.users)
            .await?;

        self.schedule_periodic();
        info!(event = "hub_started", url = %url, "JupyterHub is now running at {}", url);
        Ok(report)
    }

    fn schedule_periodic(&mut self) {
        let check_every = self.cfg.hub.service_check_interval_secs;
        if check_every > 0 && self.registry.load().any_url() {
            let registry = self.registry.clone();
            let prober = self.prober.clone();
            let timeout = Duration::from_millis(self.cfg.hub.reachability.per_try_timeout_ms);
            self.tasks.push(spawn_periodic("service_check", Duration::from_secs(check_every), self.shutdown_tx.subscribe(), move || {
                let registry = registry.clone();
                let prober = prober.clone();
                async move {
                    check_services_health(&registry, prober.as_ref(), timeout).await;
                }
            }));
        }

        let activity_every = self.cfg.hub.last_activity_interval_secs;
        if activity_every > 0 {
            let proxy = self.proxy.clone();
            let repo = self.repo.clone();
            self.tasks.push(spawn_periodic("last_activity", Duration::from_secs(activity_every), self.shutdown_tx.subscribe(), move || {
                let proxy = proxy.clone();
                let repo = repo.clone();
                async move {
                    if let Err(e) = update_last_activity(proxy.as_ref(), repo.as_ref()).await {
                        warn!(error = %e, "failed to update last activity");
                    }
                }
            }));
        }
    }

    /// Stop services, background tasks and an owned proxy; drop credentials.
    pub async fn shutdown(&mut self) {
        info!(event = "hub_shutdown", services = self.running.len(), "shutting down");
        let _ = self.shutdown_tx.send(true);
        while let Some(mut svc) = self.running.pop() {
            if let Err(e) = svc.stop().await {
                warn!(service = %svc.name(), error = %e, "failed to stop service");
            }
        }
        if self.proxy.should_start() {
            if let Err(e) = self.proxy.stop().await {
                warn!(error = %e, "failed to stop proxy");
            }
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.credentials.clear().await;
        self.registry.clear();
    }
}
