use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::endpoint::EndpointDescriptor;
use crate::errors::ServiceError;

/// A persisted service as the reconciler sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredService {
    pub id: Uuid,
    pub name: String,
    pub admin: bool,
    pub endpoint: Option<EndpointDescriptor>,
}

/// Desired state of one service after a reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedService {
    pub id: Uuid,
    pub name: String,
    pub admin: bool,
    /// No row exists yet for this service.
    pub create: bool,
    pub endpoint: Option<EndpointDescriptor>,
    /// Freshly generated token to persist; replaces older generated tokens.
    pub new_token: Option<String>,
}

/// Everything a reconciliation pass writes. Services not listed are deleted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub services: Vec<PlannedService>,
}

impl ReconcilePlan {
    pub fn names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
}

/// Persistence for services, their endpoints and tokens.
#[async_trait]
pub trait ServiceRepository: Send + Sync {
    async fn list_services(&self) -> Result<Vec<StoredService>, ServiceError>;

    /// Apply a whole plan in one transaction: all of it or none of it.
    async fn apply_plan(&self, plan: &ReconcilePlan) -> Result<ApplyOutcome, ServiceError>;

    async fn set_endpoint_ip(&self, service_id: Uuid, ip: &str) -> Result<(), ServiceError>;

    async fn delete_endpoint(&self, service_id: Uuid) -> Result<(), ServiceError>;

    /// Name of the service owning a persisted token.
    async fn find_service_by_token(&self, token: &str) -> Result<Option<String>, ServiceError>;

    async fn touch_service(&self, name: &str, at: DateTime<Utc>) -> Result<bool, ServiceError>;
}

/// Simple in-memory mock repository for tests and doc examples
pub mod mock {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Default)]
    pub struct MockState {
        pub services: BTreeMap<String, StoredService>,
        pub tokens: Vec<(String, String)>, // (service name, token)
        pub last_activity: BTreeMap<String, DateTime<Utc>>,
        pub commits: u32,
    }

    #[derive(Default)]
    pub struct MockServiceRepository {
        pub state: Mutex<MockState>,
    }

    impl MockServiceRepository {
        pub fn snapshot(&self) -> MockState { self.state.lock().unwrap().clone() }

        pub fn endpoint_of(&self, name: &str) -> Option<EndpointDescriptor> {
            self.state.lock().unwrap().services.get(name).and_then(|s| s.endpoint.clone())
        }
    }

    #[async_trait]
    impl ServiceRepository for MockServiceRepository {
        async fn list_services(&self) -> Result<Vec<StoredService>, ServiceError> {
            Ok(self.state.lock().unwrap().services.values().cloned().collect())
        }

        async fn apply_plan(&self, plan: &ReconcilePlan) -> Result<ApplyOutcome, ServiceError> {
            // Work on a copy so a failure leaves the state untouched.
            let mut state = self.state.lock().unwrap();
            let mut next = state.clone();
            let mut outcome = ApplyOutcome::default();
            for planned in &plan.services {
                if planned.create { outcome.created += 1 } else { outcome.updated += 1 }
                next.services.insert(planned.name.clone(), StoredService {
                    id: planned.id,
                    name: planned.name.clone(),
                    admin: planned.admin,
                    endpoint: planned.endpoint.clone(),
                });
                if let Some(token) = &planned.new_token {
                    next.tokens.retain(|(svc, _)| svc != &planned.name);
                    next.tokens.push((planned.name.clone(), token.clone()));
                }
            }
            let keep = plan.names();
            let before = next.services.len();
            next.services.retain(|name, _| keep.contains(name));
            next.tokens.retain(|(svc, _)| keep.contains(svc));
            outcome.deleted = (before - next.services.len()) as u64;
            next.commits += 1;
            *state = next;
            Ok(outcome)
        }

        async fn set_endpoint_ip(&self, service_id: Uuid, ip: &str) -> Result<(), ServiceError> {
            let mut state = self.state.lock().unwrap();
            let svc = state
                .services
                .values_mut()
                .find(|s| s.id == service_id)
                .ok_or_else(|| ServiceError::not_found("service"))?;
            if let Some(ep) = svc.endpoint.as_mut() {
                ep.ip = ip.to_string();
            }
            Ok(())
        }

        async fn delete_endpoint(&self, service_id: Uuid) -> Result<(), ServiceError> {
            let mut state = self.state.lock().unwrap();
            if let Some(svc) = state.services.values_mut().find(|s| s.id == service_id) {
                svc.endpoint = None;
            }
            Ok(())
        }

        async fn find_service_by_token(&self, token: &str) -> Result<Option<String>, ServiceError> {
            let state = self.state.lock().unwrap();
            Ok(state.tokens.iter().find(|(_, t)| t == token).map(|(svc, _)| svc.clone()))
        }

        async fn touch_service(&self, name: &str, at: DateTime<Utc>) -> Result<bool, ServiceError> {
            let mut state = self.state.lock().unwrap();
            if !state.services.contains_key(name) {
                return Ok(false);
            }
            state.last_activity.insert(name.to_string(), at);
            Ok(true)
        }
    }
}
