use std::sync::Arc;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{error, info};

use configs::AppConfig;
use service::chp::ChpProxy;
use service::kubectl::KubectlBackend;
use service::pod::PodBackend;
use service::probe::HttpProber;
use service::repo::SeaOrmServiceRepository;

use crate::errors::StartupError;
use crate::hub::{Hub, HubParts};

/// Wire the production collaborators from configuration.
pub async fn build_hub(cfg: AppConfig) -> Result<Hub, StartupError> {
    let db = models::db::connect_and_migrate(&cfg.database).await?;
    let proxy = ChpProxy::from_config(&cfg.proxy).map_err(|e| StartupError::Proxy(e.to_string()))?;
    let prober = HttpProber::new(&cfg.hub.tls).map_err(|e| StartupError::InvalidConfig(e.to_string()))?;
    let pod_backend: Arc<dyn PodBackend> = Arc::new(KubectlBackend::from_config(&cfg.kube));
    let parts = HubParts {
        repo: Arc::new(SeaOrmServiceRepository::new(db)),
        proxy: Arc::new(proxy),
        prober: Arc::new(prober),
        pod_backend: Some(pod_backend),
    };
    Hub::new(cfg, parts)
}

/// Process shutdown signals: SIGTERM (kubelet, systemd) and SIGINT (Ctrl+C).
pub struct ShutdownSignals {
    sigterm: Signal,
    sigint: Signal,
}

impl ShutdownSignals {
    /// Installs the handlers; signals arriving after this call are queued.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self { sigterm: signal(SignalKind::terminate())?, sigint: signal(SignalKind::interrupt())? })
    }

    /// Resolves on the next SIGTERM or SIGINT and names it.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        }
    }
}

/// Public entry: reconcile, start, serve until SIGINT/SIGTERM, shut down.
///
/// A fatal startup failure still stops whatever already started before the
/// error is returned.
pub async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    let mut signals = ShutdownSignals::install()?;
    let mut hub = build_hub(cfg).await?;
    let registry = hub.init_services().await?;
    info!(event = "services_loaded", services = registry.len(), "services reconciled");

    let started = tokio::select! {
        res = hub.start() => Ok(res),
        sig = signals.recv() => Err(sig),
    };
    match started {
        Err(sig) => {
            info!(event = "shutdown_signal", signal = sig, "interrupted during startup");
            hub.shutdown().await;
            return Ok(());
        }
        Ok(Err(e)) => {
            error!(event = "startup_failed", error = %e, "hub startup failed");
            hub.shutdown().await;
            return Err(e.into());
        }
        Ok(Ok(report)) => {
            info!(
                started = report.started.len(),
                external = report.external.len(),
                unreachable = report.failures.len(),
                "startup report"
            );
        }
    }

    let sig = signals.recv().await;
    info!(event = "shutdown_signal", signal = sig, "received signal, shutting down");
    hub.shutdown().await;
    Ok(())
}
