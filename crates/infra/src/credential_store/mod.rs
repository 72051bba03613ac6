//! Credential store implementations.
//!
//! Both back ends implement the `calth-auth` store traits with identical
//! observable semantics; the in-memory one exists for tests and local runs.

pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryCredentialStore, SeedUser};
pub use postgres::PgCredentialStore;
