//! Session endpoints: login, refresh, logout, and the caller's own profile.
//!
//! The access token travels as `Authorization: Bearer <token>`; the refresh
//! token travels in the JSON body as `refreshToken`.

use axum::{
    extract::{rejection::JsonRejection, Extension, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::Response,
    routing::{get, post},
    Json, Router,
};

use calth_auth::{
    verify_credentials, Deadline, IdentityStore, LoginCredentials, RoleGrantStore,
};

use crate::app::dto::{self, Envelope, LoginRequest, MeView, RefreshRequest};
use crate::app::errors::ApiError;
use crate::app::AppState;
use crate::context::IdentityContext;
use crate::middleware::enforce;

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route(
            "/auth/me",
            get(me).route_layer(from_fn_with_state(state.authenticated(), enforce)),
        )
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Extension(deadline): Extension<Deadline>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let creds = LoginCredentials::parse(&body.business_id, &body.email, &body.password)?;

    let identity = verify_credentials(state.store.as_ref(), creds, deadline).await?;
    let pair = state.sessions.login(&identity, deadline).await?;

    tracing::info!(user_id = %identity.user_id, business_id = %identity.business_id, "login");
    Ok(dto::ok("login successful", pair))
}

/// POST /auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    Extension(deadline): Extension<Deadline>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let token = presented_refresh(body?)?;
    let pair = state.sessions.rotate(&token, deadline).await?;
    Ok(dto::ok("token refreshed", pair))
}

/// POST /auth/logout
///
/// Clears the user's session even if the presented token was already
/// superseded. Safe to repeat.
pub async fn logout(
    State(state): State<AppState>,
    Extension(deadline): Extension<Deadline>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let token = presented_refresh(body?)?;
    state.sessions.logout(&token, deadline).await?;
    Ok(Envelope::message(StatusCode::OK, "logout successful"))
}

/// GET /auth/me (Auth Gate)
pub async fn me(
    State(state): State<AppState>,
    Extension(ctx): Extension<IdentityContext>,
    Extension(deadline): Extension<Deadline>,
) -> Result<Response, ApiError> {
    let profile = deadline
        .run("user_profile", state.store.user_profile(ctx.identity()))
        .await?
        .ok_or(ApiError::NotFound("user not found"))?;
    let role = deadline
        .run("role_with_grants", state.store.role_with_grants(profile.role_id))
        .await?
        .ok_or(ApiError::NotFound("role not found"))?;

    Ok(dto::ok(
        "user retrieved",
        MeView {
            profile,
            role: role.into(),
        },
    ))
}

fn presented_refresh(Json(body): Json<RefreshRequest>) -> Result<String, ApiError> {
    let token = body.refresh_token.trim();
    if token.is_empty() {
        return Err(ApiError::validation("refreshToken is required"));
    }
    Ok(token.to_owned())
}
