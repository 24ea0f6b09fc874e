//! Service registry, lifecycle and routing for hub-managed services.
//! - Validates declared service specs and reconciles them with the database.
//! - Starts managed services (pods or child processes) and checks reachability.
//! - Keeps the proxy's routing table in line with the registry.

pub mod errors;
pub mod spec;
pub mod endpoint;
pub mod record;
pub mod registry;
pub mod credentials;
pub mod tokens;
pub mod repository;
pub mod repo;
pub mod reconciler;
pub mod escape;
pub mod spawner;
pub mod pod;
pub mod kubectl;
pub mod adapter;
pub mod probe;
pub mod routing;
pub mod chp;
pub mod sequencer;
pub mod periodic;
pub mod observability;
