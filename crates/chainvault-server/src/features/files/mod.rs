//! Upload, conversion status, listing, download and deletion of files

pub mod commands;
pub mod queries;
pub mod routes;

pub use routes::files_routes;
