//! `calth-auth` — authentication/authorization core (fail-closed).
//!
//! This crate is intentionally decoupled from HTTP and from any concrete
//! storage engine: the credential store is consumed through the traits in
//! [`store`], and every store call runs under a caller-supplied [`Deadline`].

pub mod authorize;
pub mod claims;
pub mod config;
pub mod deadline;
pub mod grants;
pub mod identity;
pub mod login;
pub mod password;
pub mod permissions;
pub mod session;
pub mod store;
pub mod token;

pub use authorize::{authorize, Decision};
pub use claims::{TokenClaims, TokenValidationError, validate_claims};
pub use config::{AuthConfig, ConfigError};
pub use deadline::Deadline;
pub use grants::{create_role, replace_grants, GrantError, GrantSet, NewRole, RoleFieldsUpdate};
pub use identity::{CredentialPair, Identity};
pub use login::{verify_credentials, LoginCredentials, LoginError};
pub use permissions::{ActionKey, CapabilityMode, RequiredCapabilities};
pub use session::{SessionError, SessionRegister};
pub use store::{
    CredentialStore, IdentityStore, PermissionLookup, RoleGrantStore, SessionStore, StoreError,
};
pub use token::{TokenError, TokenKind, TokenService};
