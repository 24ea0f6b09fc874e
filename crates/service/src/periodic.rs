//! Recurring background jobs: service health checks and last-activity refresh.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::errors::ServiceError;
use crate::observability;
use crate::probe::Prober;
use crate::registry::SharedRegistry;
use crate::repository::ServiceRepository;
use crate::routing::Proxy;

/// Run `job` every `every` until `shutdown` flips to true or its sender drops.
/// The first run happens one period after spawning.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => job().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(job = name, "periodic job stopped");
    })
}

/// Probe every service with a URL once; returns how many were down.
pub async fn check_services_health(registry: &SharedRegistry, prober: &dyn Prober, timeout: Duration) -> usize {
    let snapshot = registry.load();
    let mut down = 0;
    for record in snapshot.iter() {
        let Some(endpoint) = record.endpoint.as_ref().filter(|_| record.url.is_some()) else {
            continue;
        };
        let url = endpoint.host();
        match prober.wait_up(&url, timeout).await {
            Ok(()) => observability::set_service_up(record.name(), true),
            Err(e) => {
                warn!(service = %record.name(), kind = %record.kind(), url = %url, error = %e, "Cannot connect to {} service {} at {}", record.kind(), record.name(), url);
                observability::set_service_up(record.name(), false);
                down += 1;
            }
        }
    }
    down
}

/// Copy route activity timestamps reported by the proxy onto service rows.
pub async fn update_last_activity(proxy: &dyn Proxy, repo: &dyn ServiceRepository) -> Result<usize, ServiceError> {
    let routes = proxy.get_all_routes().await?;
    let mut touched = 0;
    for route in routes.values() {
        let Some(service) = route.data.get("service").and_then(Value::as_str) else {
            continue;
        };
        let Some(raw) = route.data.get("last_activity").and_then(Value::as_str) else {
            continue;
        };
        let at = match DateTime::parse_from_rfc3339(raw) {
            Ok(at) => at.with_timezone(&Utc),
            Err(e) => {
                warn!(service = %service, value = %raw, error = %e, "unparseable last_activity");
                continue;
            }
        };
        if repo.touch_service(service, at).await? {
            touched += 1;
        }
    }
    debug!(touched, "last activity updated");
    Ok(touched)
}
