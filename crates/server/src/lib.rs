pub mod auth;
pub mod errors;
pub mod hub;
pub mod routes;
pub mod startup;

pub use startup::run;
