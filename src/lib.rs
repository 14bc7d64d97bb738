pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod models;
pub mod otp;
pub mod password;
pub mod rate_limit; // in-memory rate limiting
pub mod repo;
pub mod routes;
pub mod secrets;
pub mod security;
pub mod seed;
pub mod startup;

// Re-export commonly used items for tests / external users
pub use routes::{config, configure, AppState, AuthSettings};
pub use security::InternalAccess;
