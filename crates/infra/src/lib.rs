//! Infrastructure layer: credential store back ends and process configuration.

pub mod config;
pub mod credential_store;


pub use config::{AppConfig, ConfigError};
pub use credential_store::{InMemoryCredentialStore, PgCredentialStore, SeedUser};
