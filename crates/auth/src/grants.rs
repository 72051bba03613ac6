//! Role-Grant Transaction.
//!
//! A role's capability set is the full set of its permission edges. Writes
//! replace that set wholesale: after a successful call the stored edges are
//! exactly the submitted [`GrantSet`], and after a failed call they are
//! exactly what they were before.
//!
//! Input is validated here, before the store is touched. Malformed ids or
//! out-of-range role fields never open a transaction.

use thiserror::Error;
use tracing::instrument;

use calth_core::{PermissionId, RoleId};

use crate::store::RoleGrants;
use crate::{Deadline, RoleGrantStore, StoreError};

const FIELD_MIN: usize = 3;
const FIELD_MAX: usize = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GrantError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid permission id: {0}")]
    InvalidPermissionId(String),

    #[error("role not found")]
    RoleNotFound,

    #[error("role value already exists")]
    DuplicateRoleValue,

    #[error("permission not found")]
    UnknownPermission,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for GrantError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(_) => GrantError::RoleNotFound,
            StoreError::Conflict(_) => GrantError::DuplicateRoleValue,
            StoreError::MissingReference(_) => GrantError::UnknownPermission,
            other => GrantError::Store(other),
        }
    }
}

/// De-duplicated, insertion-ordered set of permission ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantSet {
    ids: Vec<PermissionId>,
}

impl GrantSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_ids(ids: impl IntoIterator<Item = PermissionId>) -> Self {
        let mut out = Vec::new();
        for id in ids {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        Self { ids: out }
    }

    /// Parse raw id strings, failing on the first one that is not a UUID.
    pub fn parse<'a>(raw: impl IntoIterator<Item = &'a str>) -> Result<Self, GrantError> {
        let mut ids = Vec::new();
        for s in raw {
            let id = s
                .parse::<PermissionId>()
                .map_err(|_| GrantError::InvalidPermissionId(s.to_string()))?;
            ids.push(id);
        }
        Ok(Self::from_ids(ids))
    }

    pub fn ids(&self) -> &[PermissionId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

fn check_field(field: &str, raw: &str) -> Result<String, GrantError> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if !(FIELD_MIN..=FIELD_MAX).contains(&len) {
        return Err(GrantError::Validation(format!(
            "{field} must be between {FIELD_MIN} and {FIELD_MAX} characters"
        )));
    }
    Ok(trimmed.to_owned())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRole {
    pub name: String,
    pub value: String,
    pub description: String,
}

impl NewRole {
    pub fn new(name: &str, value: &str, description: &str) -> Result<Self, GrantError> {
        Ok(Self {
            name: check_field("name", name)?,
            value: check_field("value", value)?,
            description: check_field("description", description)?,
        })
    }
}

/// Partial update of a role's own fields; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleFieldsUpdate {
    pub name: Option<String>,
    pub value: Option<String>,
    pub description: Option<String>,
}

impl RoleFieldsUpdate {
    pub fn new(
        name: Option<&str>,
        value: Option<&str>,
        description: Option<&str>,
    ) -> Result<Self, GrantError> {
        Ok(Self {
            name: name.map(|v| check_field("name", v)).transpose()?,
            value: value.map(|v| check_field("value", v)).transpose()?,
            description: description
                .map(|v| check_field("description", v))
                .transpose()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.value.is_none() && self.description.is_none()
    }
}

/// Create a role with its initial grant set and read it back.
#[instrument(skip(store, role, grants, deadline), fields(value = %role.value, grants = grants.len()), err)]
pub async fn create_role<S>(
    store: &S,
    role: &NewRole,
    grants: &GrantSet,
    deadline: Deadline,
) -> Result<RoleGrants, GrantError>
where
    S: RoleGrantStore + ?Sized,
{
    let role_id = deadline
        .run("create_role", store.create_role(role, grants))
        .await?;
    tracing::info!(%role_id, "role created");
    read_back(store, role_id, deadline).await
}

/// Apply `fields` (if any) and replace the role's grant set with `grants`,
/// then read the role back.
#[instrument(skip(store, fields, grants, deadline), fields(grants = grants.len()), err)]
pub async fn replace_grants<S>(
    store: &S,
    role_id: RoleId,
    fields: Option<&RoleFieldsUpdate>,
    grants: &GrantSet,
    deadline: Deadline,
) -> Result<RoleGrants, GrantError>
where
    S: RoleGrantStore + ?Sized,
{
    let fields = fields.filter(|f| !f.is_empty());
    deadline
        .run("replace_grants", store.replace_grants(role_id, fields, grants))
        .await?;
    tracing::info!(%role_id, "role grants replaced");
    read_back(store, role_id, deadline).await
}

async fn read_back<S>(store: &S, role_id: RoleId, deadline: Deadline) -> Result<RoleGrants, GrantError>
where
    S: RoleGrantStore + ?Sized,
{
    deadline
        .run("role_with_grants", store.role_with_grants(role_id))
        .await?
        .ok_or(GrantError::RoleNotFound)
}
