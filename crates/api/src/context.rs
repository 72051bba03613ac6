use calth_auth::Identity;
use calth_core::{BusinessId, RoleId, UserId};

/// Authenticated identity for a request.
///
/// Inserted into request extensions by the Auth Gate; immutable for the rest
/// of the request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IdentityContext {
    identity: Identity,
}

impl IdentityContext {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    pub fn business_id(&self) -> BusinessId {
        self.identity.business_id
    }

    pub fn role_id(&self) -> RoleId {
        self.identity.role_id
    }
}
