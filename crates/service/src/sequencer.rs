//! Service startup sequencing.
//!
//! Runs after the proxy and the hub listener are confirmed. Managed services
//! start one at a time in registry order; any start failure aborts startup.
//! Every service with a URL is then probed a bounded number of times, and
//! reachability failures are reported per service without stopping the rest.

use std::sync::Arc;
use std::time::Duration;

use configs::ReachabilityConfig;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::adapter::ManagedService;
use crate::errors::ServiceError;
use crate::observability;
use crate::probe::Prober;
use crate::record::{ServiceKind, ServiceRecord};
use crate::registry::SharedRegistry;
use crate::routing::{check_routes, HubRoute, Proxy, RouteSync, UserRoute};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReachabilityPolicy {
    pub managed_tries: u32,
    pub external_tries: u32,
    pub per_try_timeout: Duration,
}

impl Default for ReachabilityPolicy {
    fn default() -> Self {
        Self { managed_tries: 10, external_tries: 1, per_try_timeout: Duration::from_secs(1) }
    }
}

impl From<&ReachabilityConfig> for ReachabilityPolicy {
    fn from(cfg: &ReachabilityConfig) -> Self {
        Self {
            managed_tries: cfg.managed_tries,
            external_tries: cfg.external_tries,
            per_try_timeout: Duration::from_millis(cfg.per_try_timeout_ms),
        }
    }
}

impl ReachabilityPolicy {
    pub fn tries_for(&self, kind: ServiceKind) -> u32 {
        if kind.is_managed() { self.managed_tries } else { self.external_tries }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReachabilityFailure {
    #[error("Service {name} exited with status {status}")]
    Exited { name: String, status: i32, tries: u32 },
    #[error("Cannot connect to {kind} service {name} at {url}. Is it running?")]
    Unreachable { name: String, kind: ServiceKind, url: String, tries: u32 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartupReport {
    pub started: Vec<String>,
    pub external: Vec<String>,
    pub reachable: Vec<String>,
    pub failures: Vec<ReachabilityFailure>,
    pub routes: RouteSync,
}

pub struct StartupSequencer {
    prober: Arc<dyn Prober>,
    proxy: Arc<dyn Proxy>,
    policy: ReachabilityPolicy,
}

impl StartupSequencer {
    pub fn new(prober: Arc<dyn Prober>, proxy: Arc<dyn Proxy>, policy: ReachabilityPolicy) -> Self {
        Self { prober, proxy, policy }
    }

    /// Start managed services and verify reachability.
    ///
    /// `launch` turns a managed record into its adapter; started adapters are
    /// pushed to `running` even when startup fails later, so the caller can
    /// stop them.
    pub async fn run<F>(
        &self,
        registry: &SharedRegistry,
        mut launch: F,
        running: &mut Vec<ManagedService>,
        hub: &HubRoute,
        users: &[UserRoute],
    ) -> Result<StartupReport, ServiceError>
    where
        F: FnMut(ServiceRecord) -> ManagedService,
    {
        let mut report = StartupReport::default();
        let snapshot = registry.load();

        for entry in snapshot.iter() {
            let name = entry.name().to_string();
            let kind = entry.kind();
            let mut record = (**entry).clone();
            let mut service = None;

            if kind.is_managed() {
                let mut svc = launch(record.clone());
                match svc.start().await {
                    Ok(started) => {
                        record = started;
                        registry.replace_record(record.clone());
                        observability::SERVICE_STARTS_TOTAL.with_label_values(&[&kind.to_string()]).inc();
                        info!(service = %name, kind = %kind, "service started");
                        report.started.push(name.clone());
                        service = Some(svc);
                    }
                    Err(e) => {
                        error!(service = %name, error = %e, "Failed to start service");
                        running.push(svc);
                        return Err(ServiceError::Launch { name, source: Box::new(e) });
                    }
                }
            } else {
                info!(service = %name, url = ?record.url, "Adding external service");
                report.external.push(name.clone());
            }

            if let Some(endpoint) = record.endpoint.as_ref().filter(|_| record.url.is_some()) {
                let url = endpoint.host();
                match self.wait_reachable(&name, kind, &url, service.as_mut()).await {
                    Ok(()) => {
                        observability::set_service_up(&name, true);
                        report.reachable.push(name.clone());
                    }
                    Err(failure) => {
                        error!(service = %name, kind = %kind, url = %url, "{failure}");
                        observability::set_service_up(&name, false);
                        observability::REACHABILITY_FAILURES_TOTAL.with_label_values(&[&name]).inc();
                        report.failures.push(failure);
                    }
                }
            }

            if let Some(svc) = service {
                running.push(svc);
            }
        }

        report.routes = check_routes(self.proxy.as_ref(), hub, users, &registry.load()).await?;
        info!(
            event = "services_started",
            started = report.started.len(),
            external = report.external.len(),
            failures = report.failures.len(),
            "service startup complete"
        );
        Ok(report)
    }

    async fn wait_reachable(
        &self,
        name: &str,
        kind: ServiceKind,
        url: &str,
        mut service: Option<&mut ManagedService>,
    ) -> Result<(), ReachabilityFailure> {
        let tries = self.policy.tries_for(kind);
        for attempt in 1..=tries {
            match self.prober.wait_up(url, self.policy.per_try_timeout).await {
                Ok(()) => {
                    debug!(service = %name, attempt, "service reachable");
                    return Ok(());
                }
                Err(e) => debug!(service = %name, attempt, error = %e, "service not reachable yet"),
            }
            if let Some(svc) = service.as_deref_mut() {
                match svc.poll().await {
                    Ok(Some(status)) => {
                        return Err(ReachabilityFailure::Exited { name: name.to_string(), status, tries: attempt });
                    }
                    Ok(None) => {}
                    Err(e) => warn!(service = %name, error = %e, "failed to poll service"),
                }
            }
        }
        Err(ReachabilityFailure::Unreachable {
            name: name.to_string(),
            kind,
            url: url.to_string(),
            tries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterContext;
    use crate::endpoint::EndpointDescriptor;
    use crate::probe::mock::ScriptedProber;
    use crate::record::HostContext;
    use crate::registry::ServiceRegistry;
    use crate::repository::mock::MockServiceRepository;
    use crate::routing::mock::InMemoryProxy;
    use crate::spawner::mock::ScriptedSpawner;
    use crate::spec::ServiceSpec;
    use configs::{HubConfig, KubeConfig};
    use uuid::Uuid;

    fn ctx() -> Arc<AdapterContext> {
        let repo = Arc::new(MockServiceRepository::default());
        Arc::new(AdapterContext::from_config(&HubConfig::default(), &KubeConfig::default(), None, repo).expect("ctx"))
    }

    fn record(name: &str, command: &[&str], url: Option<&str>) -> ServiceRecord {
        let spec = ServiceSpec {
            name: name.into(),
            command: command.iter().map(|s| s.to_string()).collect(),
            url: url.map(str::to_string),
            ..ServiceSpec::default()
        };
        let mut rec = ServiceRecord::new(Uuid::new_v4(), spec, &HostContext::new("/", ""));
        rec.endpoint = url.and_then(|u| EndpointDescriptor::from_url(name, u, &rec.prefix).ok());
        rec
    }

    fn hub() -> HubRoute {
        HubRoute { routespec: "/".into(), target: "http://127.0.0.1:8081".into() }
    }

    fn fast_policy() -> ReachabilityPolicy {
        ReachabilityPolicy { per_try_timeout: Duration::from_millis(1), ..ReachabilityPolicy::default() }
    }

    #[tokio::test]
    async fn unreachable_managed_service_fails_after_all_tries() {
        let registry = SharedRegistry::default();
        registry.publish(ServiceRegistry::from_records(vec![record("cull", &["cull"], Some("http://127.0.0.1:9100"))]));
        let prober = Arc::new(ScriptedProber::always_down());
        let proxy = Arc::new(InMemoryProxy::default());
        let spawner = ScriptedSpawner::with_polls(vec![None; 10]);
        let seq = StartupSequencer::new(prober.clone(), proxy, fast_policy());

        let ctx = ctx();
        let mut running = Vec::new();
        let report = seq
            .run(&registry, |rec| ManagedService::with_spawner(rec, ctx.clone(), Box::new(spawner.clone())), &mut running, &hub(), &[])
            .await
            .expect("startup continues past reachability failures");

        assert_eq!(prober.probes(), 10);
        assert_eq!(spawner.calls().iter().filter(|c| **c == "poll").count(), 10);
        assert_eq!(report.failures, vec![ReachabilityFailure::Unreachable {
            name: "cull".into(),
            kind: ServiceKind::SubprocessManaged,
            url: "http://127.0.0.1:9100".into(),
            tries: 10,
        }]);
        assert_eq!(
            report.failures[0].to_string(),
            "Cannot connect to subprocess managed service cull at http://127.0.0.1:9100. Is it running?"
        );
        assert_eq!(running.len(), 1);
    }

    #[tokio::test]
    async fn exit_status_stops_retrying() {
        let registry = SharedRegistry::default();
        registry.publish(ServiceRegistry::from_records(vec![record("cull", &["cull"], Some("http://127.0.0.1:9100"))]));
        let prober = Arc::new(ScriptedProber::always_down());
        let spawner = ScriptedSpawner::with_polls([None, None, Some(2)]);
        let seq = StartupSequencer::new(prober.clone(), Arc::new(InMemoryProxy::default()), fast_policy());

        let ctx = ctx();
        let mut running = Vec::new();
        let report = seq
            .run(&registry, |rec| ManagedService::with_spawner(rec, ctx.clone(), Box::new(spawner.clone())), &mut running, &hub(), &[])
            .await
            .expect("startup");

        assert_eq!(prober.probes(), 3);
        assert_eq!(report.failures, vec![ReachabilityFailure::Exited { name: "cull".into(), status: 2, tries: 3 }]);
    }

    #[tokio::test]
    async fn external_services_get_one_try_and_routes_are_synced() {
        let registry = SharedRegistry::default();
        registry.publish(ServiceRegistry::from_records(vec![
            record("up", &[], Some("http://10.0.0.1:80")),
            record("down", &[], Some("http://10.0.0.2:80")),
            record("nourl", &[], None),
        ]));
        let prober = Arc::new(ScriptedProber::with_answers([true, false]));
        let proxy = Arc::new(InMemoryProxy::default());
        let seq = StartupSequencer::new(prober.clone(), proxy.clone(), fast_policy());

        let ctx = ctx();
        let mut running = Vec::new();
        let report = seq
            .run(&registry, |rec| ManagedService::new(rec, ctx.clone()), &mut running, &hub(), &[])
            .await
            .expect("startup");

        assert_eq!(prober.probes(), 2);
        assert_eq!(report.external, vec!["up", "down", "nourl"]);
        assert_eq!(report.reachable, vec!["up"]);
        assert_eq!(report.failures.len(), 1);
        assert!(running.is_empty());
        let routes = proxy.snapshot();
        assert!(routes.contains_key("/"));
        assert!(routes.contains_key("/services/up/"));
        assert!(routes.contains_key("/services/down/"));
    }

    #[tokio::test]
    async fn start_failure_is_fatal_and_stops_the_sequence() {
        let registry = SharedRegistry::default();
        registry.publish(ServiceRegistry::from_records(vec![
            record("broken", &["broken"], None),
            record("later", &["later"], None),
        ]));
        let spawner = ScriptedSpawner { fail_start: true, ..ScriptedSpawner::default() };
        let seq = StartupSequencer::new(
            Arc::new(ScriptedProber::always_down()),
            Arc::new(InMemoryProxy::default()),
            fast_policy(),
        );

        let ctx = ctx();
        let mut running = Vec::new();
        let err = seq
            .run(&registry, |rec| ManagedService::with_spawner(rec, ctx.clone(), Box::new(spawner.clone())), &mut running, &hub(), &[])
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(matches!(err, ServiceError::Launch { ref name, .. } if name == "broken"));
        assert_eq!(spawner.calls(), vec!["start"]);
    }

    #[test]
    fn policy_from_config() {
        let cfg = ReachabilityConfig { managed_tries: 5, external_tries: 2, per_try_timeout_ms: 250 };
        let policy = ReachabilityPolicy::from(&cfg);
        assert_eq!(policy.tries_for(ServiceKind::KubeManaged), 5);
        assert_eq!(policy.tries_for(ServiceKind::External), 2);
        assert_eq!(policy.per_try_timeout, Duration::from_millis(250));
    }
}
