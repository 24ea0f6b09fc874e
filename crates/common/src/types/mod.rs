use serde::{Deserialize, Serialize};

/// Body of the hub health endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Health {
    pub status: String,
    pub version: String,
    /// Services in the current registry snapshot.
    pub services: usize,
}

impl Health {
    pub fn ok(services: usize) -> Self {
        Self { status: "ok".into(), version: env!("CARGO_PKG_VERSION").into(), services }
    }
}
