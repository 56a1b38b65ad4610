pub mod config;
pub mod cors;
pub mod error;
pub mod logger;
pub mod routes;
pub mod state;
