//! Routing-table collaborator and route reconciliation.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::registry::ServiceRegistry;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy request failed: {0}")]
    Http(String),
    #[error("proxy answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to launch proxy: {0}")]
    Launch(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub routespec: String,
    pub target: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HubRoute {
    pub routespec: String,
    pub target: String,
}

/// A running user server that must stay routed.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRoute {
    pub name: String,
    pub routespec: String,
    pub target: String,
}

#[async_trait]
pub trait Proxy: Send + Sync {
    /// Whether the hub owns the proxy process.
    fn should_start(&self) -> bool { false }

    async fn start(&self) -> Result<(), ProxyError> { Ok(()) }

    async fn stop(&self) -> Result<(), ProxyError> { Ok(()) }

    async fn get_all_routes(&self) -> Result<BTreeMap<String, RouteEntry>, ProxyError>;

    async fn add_route(&self, routespec: &str, target: &str, data: &Value) -> Result<(), ProxyError>;

    async fn delete_route(&self, routespec: &str) -> Result<(), ProxyError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteSync {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Make the routing table match the hub, the users and the registry:
/// add missing or retargeted routes, delete everything else.
pub async fn check_routes(
    proxy: &dyn Proxy,
    hub: &HubRoute,
    users: &[UserRoute],
    registry: &ServiceRegistry,
) -> Result<RouteSync, ProxyError> {
    let routes = proxy.get_all_routes().await?;
    let mut wanted: Vec<(String, String, Value)> = Vec::new();
    wanted.push((hub.routespec.clone(), hub.target.clone(), json!({ "hub": true })));
    for user in users {
        wanted.push((user.routespec.clone(), user.target.clone(), json!({ "user": user.name })));
    }
    for record in registry.iter() {
        let (Some(spec), Some(endpoint)) = (record.routespec(), record.endpoint.as_ref()) else {
            continue;
        };
        wanted.push((spec, endpoint.host(), json!({ "service": record.name() })));
    }

    let mut sync = RouteSync::default();
    let mut good = BTreeSet::new();
    for (spec, target, data) in wanted {
        let current = routes.get(&spec).map(|r| r.target.as_str());
        if current != Some(target.as_str()) {
            match current {
                None => info!(route = %spec, target = %target, "adding missing route"),
                Some(old) => warn!(route = %spec, old = %old, target = %target, "updating route target"),
            }
            proxy.add_route(&spec, &target, &data).await?;
            sync.added.push(spec.clone());
        }
        good.insert(spec);
    }

    for spec in routes.keys().filter(|spec| !good.contains(*spec)) {
        info!(route = %spec, "deleting stale route");
        proxy.delete_route(spec).await?;
        sync.removed.push(spec.clone());
    }
    Ok(sync)
}

/// Routing table kept in memory.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct InMemoryProxy {
        pub routes: Mutex<BTreeMap<String, RouteEntry>>,
        pub owned: bool,
        pub started: AtomicBool,
        pub unreachable: bool,
    }

    impl InMemoryProxy {
        pub fn with_routes(routes: impl IntoIterator<Item = RouteEntry>) -> Self {
            let map = routes.into_iter().map(|r| (r.routespec.clone(), r)).collect();
            Self { routes: Mutex::new(map), ..Self::default() }
        }

        pub fn snapshot(&self) -> BTreeMap<String, RouteEntry> { self.routes.lock().unwrap().clone() }

        pub fn is_started(&self) -> bool { self.started.load(Ordering::SeqCst) }
    }

    #[async_trait]
    impl Proxy for InMemoryProxy {
        fn should_start(&self) -> bool { self.owned }

        async fn start(&self) -> Result<(), ProxyError> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<(), ProxyError> {
            self.started.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn get_all_routes(&self) -> Result<BTreeMap<String, RouteEntry>, ProxyError> {
            if self.unreachable {
                return Err(ProxyError::Http("connection refused".into()));
            }
            Ok(self.snapshot())
        }

        async fn add_route(&self, routespec: &str, target: &str, data: &Value) -> Result<(), ProxyError> {
            self.routes.lock().unwrap().insert(routespec.to_string(), RouteEntry {
                routespec: routespec.to_string(),
                target: target.to_string(),
                data: data.clone(),
            });
            Ok(())
        }

        async fn delete_route(&self, routespec: &str) -> Result<(), ProxyError> {
            self.routes.lock().unwrap().remove(routespec);
            Ok(())
        }
    }
}
