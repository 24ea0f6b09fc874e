use thiserror::Error;

use crate::routing::ProxyError;
use crate::spawner::SpawnError;

/// Problems in the declared service list. Raised before anything is committed.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("service spec must have a name: {0}")]
    MissingName(String),
    #[error("No such service field: {field} (service {service}); recognised fields: {known}")]
    UnknownField { service: String, field: String, known: String },
    #[error("invalid value for field {field} of service {service}: expected {expected}")]
    InvalidValue { service: String, field: String, expected: &'static str },
    #[error("duplicate service name: {0}")]
    DuplicateName(String),
    #[error("invalid url for service {service}: {url} ({reason})")]
    InvalidUrl { service: String, url: String, reason: String },
    #[error("cannot determine port for service {service} from url {url}")]
    NoPort { service: String, url: String },
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Db(String),
    #[error("model error: {0}")]
    Model(#[from] models::errors::ModelError),
    #[error("token error: {0}")]
    Token(String),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error("failed to start service {name}: {source}")]
    Launch { name: String, #[source] source: Box<ServiceError> },
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

impl ServiceError {
    pub fn not_found(entity: &str) -> Self { Self::NotFound(format!("{} not found", entity)) }

    /// Failures that must stop the hub instead of being logged per service.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServiceError::Config(_) | ServiceError::Launch { .. })
    }
}

impl From<sea_orm::DbErr> for ServiceError {
    fn from(e: sea_orm::DbErr) -> Self { ServiceError::Db(e.to_string()) }
}
