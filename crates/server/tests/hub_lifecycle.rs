use std::sync::Arc;

use serde_json::json;

use configs::{AppConfig, ServiceSpecMap};
use server::errors::StartupError;
use server::hub::{Hub, HubParts};
use service::pod::mock::MockPodBackend;
use service::probe::mock::ScriptedProber;
use service::repository::mock::MockServiceRepository;
use service::routing::mock::InMemoryProxy;
use service::routing::RouteEntry;

fn config(services: serde_json::Value) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.database.url = "sqlite::memory:".into();
    cfg.hub.bind_url = "http://127.0.0.1:0/".into();
    cfg.hub.reachability.per_try_timeout_ms = 5;
    cfg.services = services
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect::<Vec<ServiceSpecMap>>();
    cfg
}

struct Doubles {
    repo: Arc<MockServiceRepository>,
    proxy: Arc<InMemoryProxy>,
    prober: Arc<ScriptedProber>,
    pods: Arc<MockPodBackend>,
}

fn hub(cfg: AppConfig, proxy: InMemoryProxy, prober: ScriptedProber) -> (Hub, Doubles) {
    let doubles = Doubles {
        repo: Arc::new(MockServiceRepository::default()),
        proxy: Arc::new(proxy),
        prober: Arc::new(prober),
        pods: Arc::new(MockPodBackend::with_ip("10.8.0.12")),
    };
    let parts = HubParts {
        repo: doubles.repo.clone(),
        proxy: doubles.proxy.clone(),
        prober: doubles.prober.clone(),
        pod_backend: Some(doubles.pods.clone()),
    };
    (Hub::new(cfg, parts).expect("hub"), doubles)
}

#[tokio::test]
async fn full_lifecycle_with_pod_and_external_service() -> anyhow::Result<()> {
    let cfg = config(json!([
        {"name": "dashboard", "image": "dash:latest", "port": 9000},
        {"name": "announcer", "url": "http://10.0.0.5:8888", "api_token": "secret"}
    ]));
    let stale = RouteEntry { routespec: "/services/old/".into(), target: "http://10.9.9.9:80".into(), data: json!({"service": "old"}) };
    let (mut hub, d) = hub(cfg, InMemoryProxy::with_routes([stale]), ScriptedProber::with_answers([true, true]));

    let registry = hub.init_services().await?;
    assert_eq!(registry.names(), vec!["dashboard", "announcer"]);

    let report = hub.start().await?;
    assert_eq!(report.started, vec!["dashboard"]);
    assert_eq!(report.external, vec!["announcer"]);
    assert_eq!(report.reachable, vec!["dashboard", "announcer"]);
    assert!(report.failures.is_empty());
    assert_eq!(hub.running_services(), 1);

    // the pod address replaced the wildcard host everywhere
    assert_eq!(d.repo.endpoint_of("dashboard").map(|e| e.ip), Some("10.8.0.12".to_string()));
    let routes = d.proxy.snapshot();
    assert_eq!(routes["/services/dashboard/"].target, "http://10.8.0.12:9000");
    assert!(routes.contains_key("/"));
    assert!(!routes.contains_key("/services/old/"));

    let addr = hub.local_addr().expect("listener bound");
    let health: serde_json::Value = reqwest::get(format!("http://{addr}/hub/health")).await?.json().await?;
    assert_eq!(health["status"], "ok");

    hub.shutdown().await;
    assert_eq!(hub.running_services(), 0);
    assert!(d.repo.endpoint_of("dashboard").is_none());
    assert!(d.pods.calls().contains(&"delete jupyter-service-dashboard".to_string()));
    assert!(hub.registry().load().is_empty());
    assert_eq!(hub.credentials().token_count().await, 0);
    assert!(reqwest::get(format!("http://{addr}/hub/health")).await.is_err());
    Ok(())
}

#[tokio::test]
async fn unreachable_proxy_aborts_before_any_service_start() -> anyhow::Result<()> {
    let cfg = config(json!([{"name": "dashboard", "image": "dash:latest", "port": 9000}]));
    let proxy = InMemoryProxy { unreachable: true, ..InMemoryProxy::default() };
    let (mut hub, d) = hub(cfg, proxy, ScriptedProber::always_down());
    hub.init_services().await?;

    let err = hub.start().await.unwrap_err();
    assert!(matches!(err, StartupError::Proxy(_)));
    assert!(d.pods.calls().is_empty());
    assert_eq!(d.prober.probes(), 0);
    Ok(())
}

#[tokio::test]
async fn invalid_service_list_fails_init() {
    let cfg = config(json!([{"name": "x", "unknown_field": true}]));
    let (hub, d) = hub(cfg, InMemoryProxy::default(), ScriptedProber::always_down());
    let err = hub.init_services().await.unwrap_err();
    assert!(matches!(err, StartupError::Service(ref e) if e.is_fatal()));
    assert_eq!(d.repo.snapshot().commits, 0);
}

#[tokio::test]
async fn owned_proxy_is_started_and_stopped() -> anyhow::Result<()> {
    let proxy = InMemoryProxy { owned: true, ..InMemoryProxy::default() };
    let (mut hub, d) = hub(config(json!([])), proxy, ScriptedProber::always_down());
    hub.init_services().await?;
    hub.start().await?;
    assert!(d.proxy.is_started());
    hub.shutdown().await;
    assert!(!d.proxy.is_started());
    Ok(())
}
