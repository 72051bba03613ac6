use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use calth_auth::store::{PermissionRecord, RoleGrants, UserProfile};
use calth_auth::{ActionKey, GrantError, GrantSet};
use calth_core::{PermissionId, RoleId};

// -------------------------
// Envelope
// -------------------------

/// Uniform JSON body for every response, success or failure.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub status_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(status: StatusCode, message: impl Into<String>, data: T) -> Response {
        let body = Envelope {
            status_code: status.as_u16(),
            message: message.into(),
            data: Some(data),
            error: None,
        };
        (status, Json(body)).into_response()
    }
}

impl Envelope<()> {
    pub fn message(status: StatusCode, message: impl Into<String>) -> Response {
        let body = Envelope::<()> {
            status_code: status.as_u16(),
            message: message.into(),
            data: None,
            error: None,
        };
        (status, Json(body)).into_response()
    }

    pub fn failure(status: StatusCode, message: impl Into<String>, code: &str) -> Response {
        let body = Envelope::<()> {
            status_code: status.as_u16(),
            message: message.into(),
            data: None,
            error: Some(code.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

pub fn ok<T: Serialize>(message: &str, data: T) -> Response {
    Envelope::success(StatusCode::OK, message, data)
}

pub fn created<T: Serialize>(message: &str, data: T) -> Response {
    Envelope::success(StatusCode::CREATED, message, data)
}

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default, rename = "businessID", alias = "businessId")]
    pub business_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

/// One toggle in the permission matrix sent by the role editor.
#[derive(Debug, Deserialize)]
pub struct PermissionToggle {
    pub id: String,
    #[serde(default)]
    pub value: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct PermissionGroup {
    #[serde(default)]
    pub actions: Vec<PermissionToggle>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: Vec<PermissionGroup>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub name: Option<String>,
    pub value: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<PermissionGroup>,
}

/// Collect the ids of every toggle that is switched on.
pub fn grant_set(groups: &[PermissionGroup]) -> Result<GrantSet, GrantError> {
    GrantSet::parse(
        groups
            .iter()
            .flat_map(|g| g.actions.iter())
            .filter(|a| a.value)
            .map(|a| a.id.as_str()),
    )
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePermissionView<P> {
    pub role_id: RoleId,
    pub permission_id: PermissionId,
    pub permission: P,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleView {
    pub id: RoleId,
    pub name: String,
    pub value: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub role_permissions: Vec<RolePermissionView<PermissionRecord>>,
}

impl From<RoleGrants> for RoleView {
    fn from(grants: RoleGrants) -> Self {
        let role_id = grants.role.id;
        Self {
            id: role_id,
            name: grants.role.name,
            value: grants.role.value,
            description: grants.role.description,
            created_at: grants.role.created_at,
            updated_at: grants.role.updated_at,
            role_permissions: grants
                .permissions
                .into_iter()
                .map(|permission| RolePermissionView {
                    role_id,
                    permission_id: permission.id,
                    permission,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionKeyView {
    pub id: PermissionId,
    pub action_key: ActionKey,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeRoleView {
    pub id: RoleId,
    pub name: String,
    pub value: String,
    pub role_permissions: Vec<RolePermissionView<PermissionKeyView>>,
}

impl From<RoleGrants> for MeRoleView {
    fn from(grants: RoleGrants) -> Self {
        let role_id = grants.role.id;
        Self {
            id: role_id,
            name: grants.role.name,
            value: grants.role.value,
            role_permissions: grants
                .permissions
                .into_iter()
                .map(|p| RolePermissionView {
                    role_id,
                    permission_id: p.id,
                    permission: PermissionKeyView {
                        id: p.id,
                        action_key: p.action_key,
                    },
                })
                .collect(),
        }
    }
}

/// Body of `GET /auth/me`: the profile plus the caller's role and grants.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeView {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub role: MeRoleView,
}
