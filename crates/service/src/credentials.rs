//! In-memory credential state owned by the hub: which token belongs to which
//! service, and which OAuth clients are registered.

use std::collections::HashMap;

use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub description: String,
}

#[derive(Debug, Default)]
pub struct CredentialRegistry {
    service_tokens: RwLock<HashMap<String, String>>,
    oauth_clients: RwLock<HashMap<String, OAuthClient>>,
}

impl CredentialRegistry {
    pub fn new() -> Self { Self::default() }

    /// Service name owning `token`, if it was registered.
    pub async fn lookup(&self, token: &str) -> Option<String> {
        self.service_tokens.read().await.get(token).cloned()
    }

    pub async fn oauth_client(&self, client_id: &str) -> Option<OAuthClient> {
        self.oauth_clients.read().await.get(client_id).cloned()
    }

    /// Swap in the tokens and clients of a new reconciliation pass.
    pub async fn replace(&self, tokens: HashMap<String, String>, clients: Vec<OAuthClient>) {
        *self.service_tokens.write().await = tokens;
        let mut map = self.oauth_clients.write().await;
        map.clear();
        for client in clients {
            map.insert(client.client_id.clone(), client);
        }
    }

    pub async fn clear(&self) {
        self.service_tokens.write().await.clear();
        self.oauth_clients.write().await.clear();
    }

    pub async fn token_count(&self) -> usize { self.service_tokens.read().await.len() }
}
