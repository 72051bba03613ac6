use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};

use calth_auth::{TokenKind, TokenService};

use crate::app::errors::ApiError;
use crate::authz::{Guard, GuardChain};
use crate::context::IdentityContext;

/// Validates the bearer access token and publishes the caller's identity.
///
/// Never touches the credential store.
#[derive(Clone)]
pub struct AuthGate {
    tokens: Arc<TokenService>,
}

impl AuthGate {
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl Guard for AuthGate {
    async fn check(&self, req: &mut Request) -> Result<(), ApiError> {
        let token = extract_bearer(req.headers())?;
        let identity = self.tokens.validate(token, TokenKind::Access).map_err(|e| {
            tracing::debug!(error = %e, "rejected access token");
            ApiError::from(e)
        })?;

        req.extensions_mut().insert(IdentityContext::new(identity));
        Ok(())
    }
}

/// Run the route's guard chain; the inner handler only runs if every guard
/// allows the request.
pub async fn enforce(State(chain): State<GuardChain>, mut req: Request, next: Next) -> Response {
    if let Err(err) = chain.run(&mut req).await {
        return err.into_response();
    }
    next.run(req).await
}

pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(ApiError::missing_token)?;

    let header = header.to_str().map_err(|_| ApiError::missing_token())?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or_else(ApiError::missing_token)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(ApiError::missing_token());
    }

    Ok(token)
}
