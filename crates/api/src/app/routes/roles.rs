//! Privileged role endpoints. Writes go through the role-grant transaction,
//! so a role's fields and grant set change together or not at all.

use std::str::FromStr;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Extension, Path, State,
    },
    middleware::from_fn_with_state,
    response::Response,
    routing::{get, patch, post},
    Json, Router,
};

use calth_auth::{
    create_role, replace_grants, ActionKey, Deadline, NewRole, RequiredCapabilities, RoleFieldsUpdate,
    RoleGrantStore,
};
use calth_core::RoleId;

use crate::app::dto::{self, CreateRoleRequest, RoleView, UpdateRoleRequest};
use crate::app::errors::ApiError;
use crate::app::AppState;
use crate::middleware::enforce;

pub const ROLES_CREATE: ActionKey = ActionKey::from_static("roles-create");
pub const ROLES_VIEW: ActionKey = ActionKey::from_static("roles-view");
pub const ROLES_UPDATE: ActionKey = ActionKey::from_static("roles-update");

pub fn router(state: &AppState) -> Router<AppState> {
    let guarded = |key: ActionKey| {
        from_fn_with_state(state.require(RequiredCapabilities::single(key)), enforce)
    };

    Router::new()
        .route("/roles", post(create).route_layer(guarded(ROLES_CREATE)))
        .route(
            "/roles/:id",
            get(show)
                .route_layer(guarded(ROLES_VIEW))
                .merge(patch(update).route_layer(guarded(ROLES_UPDATE))),
        )
}

/// POST /roles (`roles-create`)
pub async fn create(
    State(state): State<AppState>,
    Extension(deadline): Extension<Deadline>,
    body: Result<Json<CreateRoleRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let role = NewRole::new(&body.name, &body.value, &body.description)?;
    let grants = dto::grant_set(&body.permissions)?;

    let created = create_role(state.store.as_ref(), &role, &grants, deadline).await?;
    Ok(dto::created("role created", RoleView::from(created)))
}

/// GET /roles/:id (`roles-view`)
pub async fn show(
    State(state): State<AppState>,
    Extension(deadline): Extension<Deadline>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Response, ApiError> {
    let role_id = role_id(id?)?;

    let role = deadline
        .run("role_with_grants", state.store.role_with_grants(role_id))
        .await?
        .ok_or(ApiError::NotFound("role not found"))?;
    Ok(dto::ok("role retrieved", RoleView::from(role)))
}

/// PATCH /roles/:id (`roles-update`)
///
/// The submitted permission matrix replaces the role's grants in full; an
/// absent matrix leaves the role with no grants.
pub async fn update(
    State(state): State<AppState>,
    Extension(deadline): Extension<Deadline>,
    id: Result<Path<String>, PathRejection>,
    body: Result<Json<UpdateRoleRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let role_id = role_id(id?)?;
    let Json(body) = body?;

    let fields = RoleFieldsUpdate::new(
        body.name.as_deref(),
        body.value.as_deref(),
        body.description.as_deref(),
    )?;
    let grants = dto::grant_set(&body.permissions)?;

    let updated = replace_grants(
        state.store.as_ref(),
        role_id,
        Some(&fields),
        &grants,
        deadline,
    )
    .await?;
    Ok(dto::ok("role updated", RoleView::from(updated)))
}

fn role_id(Path(raw): Path<String>) -> Result<RoleId, ApiError> {
    Ok(RoleId::from_str(&raw)?)
}
