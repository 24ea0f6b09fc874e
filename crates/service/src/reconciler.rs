//! Reconciliation of the declared service list against persisted state.
//!
//! A pass validates every spec first, then derives one plan covering all
//! writes and commits it in a single transaction. Only after the commit are
//! the credential tables replaced and the new registry published.

use std::collections::HashMap;
use std::sync::Arc;

use configs::ServiceSpecMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::credentials::{CredentialRegistry, OAuthClient};
use crate::endpoint::EndpointDescriptor;
use crate::errors::ServiceError;
use crate::record::{HostContext, ServiceRecord};
use crate::registry::{ServiceRegistry, SharedRegistry};
use crate::repository::{PlannedService, ReconcilePlan, ServiceRepository, StoredService};
use crate::spec::parse_specs;
use crate::tokens;

pub struct Reconciler {
    repo: Arc<dyn ServiceRepository>,
    credentials: Arc<CredentialRegistry>,
    registry: Arc<SharedRegistry>,
    hosts: HostContext,
}

impl Reconciler {
    pub fn new(
        repo: Arc<dyn ServiceRepository>,
        credentials: Arc<CredentialRegistry>,
        registry: Arc<SharedRegistry>,
        hosts: HostContext,
    ) -> Self {
        Self { repo, credentials, registry, hosts }
    }

    pub async fn reconcile(&self, maps: &[ServiceSpecMap]) -> Result<Arc<ServiceRegistry>, ServiceError> {
        let specs = parse_specs(maps)?;
        let stored: HashMap<String, StoredService> =
            self.repo.list_services().await?.into_iter().map(|s| (s.name.clone(), s)).collect();
        let previous = self.registry.load();

        let mut plan = ReconcilePlan::default();
        let mut records = Vec::with_capacity(specs.len());
        let mut service_tokens = HashMap::new();
        let mut clients = Vec::new();

        for spec in specs {
            let name = spec.name.clone();
            let existing = stored.get(&name);
            let id = existing.map(|s| s.id).unwrap_or_else(Uuid::new_v4);
            let mut record = ServiceRecord::new(id, spec, &self.hosts);

            let mut new_token = None;
            match record.api_token.clone() {
                Some(token) => {
                    service_tokens.insert(token, name.clone());
                }
                None if record.managed() => {
                    // Keep a token generated earlier in this process while its row survives.
                    let reused = previous
                        .get(&name)
                        .filter(|prev| prev.token_generated && existing.is_some())
                        .and_then(|prev| prev.api_token.clone());
                    let token = match reused {
                        Some(token) => token,
                        None => {
                            let token = tokens::new_token();
                            new_token = Some(token.clone());
                            token
                        }
                    };
                    record.api_token = Some(token.clone());
                    record.token_generated = true;
                    service_tokens.insert(token, name.clone());
                }
                None => {}
            }

            if let (true, Some(port)) = (record.kube_managed(), record.spec.port) {
                record.url = Some(format!("http://0.0.0.0:{port}/"));
            }
            if let Some(url) = record.url.clone() {
                record.endpoint = Some(EndpointDescriptor::from_url(&name, &url, &record.prefix)?);
            }

            if record.oauth_available() {
                clients.push(OAuthClient {
                    client_id: record.oauth_client_id(),
                    client_secret: record.api_token.clone().unwrap_or_default(),
                    redirect_uri: record.oauth_redirect_uri(),
                    description: format!("JupyterHub service {name}"),
                });
            }

            debug!(service = %name, kind = %record.kind(), url = ?record.url, "service planned");
            plan.services.push(PlannedService {
                id,
                name,
                admin: record.spec.admin,
                create: existing.is_none(),
                endpoint: record.endpoint.clone(),
                new_token,
            });
            records.push(record);
        }

        let outcome = self.repo.apply_plan(&plan).await?;
        info!(
            event = "services_reconciled",
            services = records.len(),
            created = outcome.created,
            deleted = outcome.deleted,
            "service registry reconciled"
        );

        self.credentials.replace(service_tokens, clients).await;
        self.registry.publish(ServiceRegistry::from_records(records));
        Ok(self.registry.load())
    }
}
