//! Credential store contracts.
//!
//! The auth core never talks to a database directly. Everything it needs from
//! persistence is expressed by the four traits in this module, which
//! `calth-infra` implements for Postgres (production) and for an in-memory map
//! (tests/dev).
//!
//! ## Error model
//!
//! Store failures are reported as [`StoreError`] and are always kept distinct
//! from "the answer is no". A permission lookup that fails is an error, never
//! a silent deny; a refresh-token swap that loses a race returns `Ok(false)`,
//! never an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use calth_core::{BusinessId, PermissionId, RoleId, UserId};

use crate::{ActionKey, GrantSet, Identity, NewRole, RoleFieldsUpdate};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The call did not complete before the request deadline.
    #[error("credential store timed out during {0}")]
    Timeout(&'static str),

    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A write referenced a row that does not exist (foreign key).
    #[error("missing reference: {0}")]
    MissingReference(String),

    #[error("credential store unavailable: {0}")]
    Backend(String),
}

/// Tenant lookup row used by login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessRecord {
    pub id: BusinessId,
    pub name: String,
}

/// Everything login needs to check a password and build an [`Identity`].
#[derive(Clone, PartialEq, Eq)]
pub struct UserCredentials {
    pub user_id: UserId,
    pub business_id: BusinessId,
    pub role_id: RoleId,
    pub password_hash: String,
}

impl UserCredentials {
    pub fn identity(&self) -> Identity {
        Identity::new(self.user_id, self.business_id, self.role_id)
    }
}

impl core::fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserCredentials")
            .field("user_id", &self.user_id)
            .field("business_id", &self.business_id)
            .field("role_id", &self.role_id)
            .field("password_hash", &"<redacted>")
            .finish()
    }
}

/// Session-relevant view of a user row.
#[derive(Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: UserId,
    pub business_id: BusinessId,
    pub role_id: RoleId,
    /// The single live refresh token, if the user has an open session.
    pub refresh_token: Option<String>,
}

impl UserRecord {
    pub fn identity(&self) -> Identity {
        Identity::new(self.user_id, self.business_id, self.role_id)
    }
}

impl core::fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserRecord")
            .field("user_id", &self.user_id)
            .field("business_id", &self.business_id)
            .field("role_id", &self.role_id)
            .field("has_session", &self.refresh_token.is_some())
            .finish()
    }
}

/// Public profile returned by `GET /auth/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub ic: String,
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub role_id: RoleId,
    pub business_id: BusinessId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRecord {
    pub id: RoleId,
    pub name: String,
    pub value: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRecord {
    pub id: PermissionId,
    pub name: String,
    pub category: Option<String>,
    pub action_key: ActionKey,
    pub description: Option<String>,
}

/// A role together with the full set of permissions it currently grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleGrants {
    pub role: RoleRecord,
    pub permissions: Vec<PermissionRecord>,
}

impl RoleGrants {
    pub fn permission_ids(&self) -> Vec<PermissionId> {
        self.permissions.iter().map(|p| p.id).collect()
    }
}

/// Users and tenants, read-only.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Resolve a live (not soft-deleted) tenant.
    async fn find_business(&self, id: BusinessId) -> Result<Option<BusinessRecord>, StoreError>;

    /// Look a user up by email within a tenant.
    async fn find_user_by_email(
        &self,
        business_id: BusinessId,
        email: &str,
    ) -> Result<Option<UserCredentials>, StoreError>;

    async fn find_user(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError>;

    /// Profile of the user behind `identity`, scoped to its tenant.
    async fn user_profile(&self, identity: &Identity) -> Result<Option<UserProfile>, StoreError>;
}

/// Per-user refresh token slot.
///
/// Every user has at most one live refresh token. Writers never read-then-write:
/// [`SessionStore::swap_refresh`] is a compare-and-swap so two concurrent
/// rotations presenting the same token cannot both succeed.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Unconditionally record `token` as the user's live refresh token
    /// (login). Any previous token is superseded.
    async fn record_refresh(&self, user_id: UserId, token: &str) -> Result<(), StoreError>;

    /// Replace the live token with `new` only if it currently equals
    /// `expected`.
    ///
    /// Returns `Ok(true)` when the swap happened and `Ok(false)` when the
    /// stored token no longer matches (or the user is gone).
    async fn swap_refresh(
        &self,
        user_id: UserId,
        expected: &str,
        new: &str,
    ) -> Result<bool, StoreError>;

    /// Unconditionally clear the user's refresh token.
    async fn clear_refresh(&self, user_id: UserId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PermissionLookup: Send + Sync {
    /// Whether `role_id` currently grants `key`.
    ///
    /// Soft-deleted roles and permissions grant nothing.
    async fn has_permission(&self, role_id: RoleId, key: &ActionKey) -> Result<bool, StoreError>;
}

/// Role and role-permission writes.
///
/// Both write operations are all-or-nothing: if any part fails, the role's
/// fields and grant set are left exactly as they were.
#[async_trait]
pub trait RoleGrantStore: Send + Sync {
    /// Create a role and its initial grants. Fails with
    /// [`StoreError::Conflict`] if `role.value` is already taken and with
    /// [`StoreError::MissingReference`] if a permission id does not exist.
    async fn create_role(&self, role: &NewRole, grants: &GrantSet) -> Result<RoleId, StoreError>;

    /// Optionally update role fields, then replace the role's whole grant set.
    ///
    /// Fails with [`StoreError::NotFound`] if the role does not exist.
    async fn replace_grants(
        &self,
        role_id: RoleId,
        fields: Option<&RoleFieldsUpdate>,
        grants: &GrantSet,
    ) -> Result<(), StoreError>;

    async fn role_with_grants(&self, role_id: RoleId) -> Result<Option<RoleGrants>, StoreError>;
}

/// Everything the HTTP layer needs, as one object-safe trait.
pub trait CredentialStore: IdentityStore + SessionStore + PermissionLookup + RoleGrantStore {}

impl<T> CredentialStore for T where
    T: IdentityStore + SessionStore + PermissionLookup + RoleGrantStore + ?Sized
{
}
