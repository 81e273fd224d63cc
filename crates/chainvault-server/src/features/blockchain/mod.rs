//! Anchoring encrypted payloads on chain and reading them back

pub mod commands;
pub mod queries;
pub mod routes;

pub use routes::blockchain_routes;
