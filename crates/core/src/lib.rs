//! `calth-core` — shared domain primitives for the calth backend.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! strongly-typed identifiers for the multi-tenant model and the domain error.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{BusinessId, PermissionId, RoleId, UserId};
