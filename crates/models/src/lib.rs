pub mod errors;
pub mod db;
pub mod service;
pub mod server;
pub mod api_token;

#[cfg(test)]
mod tests;
