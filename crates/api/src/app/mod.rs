//! HTTP API application wiring (Axum router + shared state).
//!
//! Layout:
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and the JSON envelope
//! - `errors.rs`: error taxonomy -> status code + envelope

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    middleware::{from_fn, from_fn_with_state, Next},
    response::Response,
    routing::get,
    Router,
};
use tower::ServiceBuilder;

use calth_auth::{
    AuthConfig, CredentialStore, Deadline, RequiredCapabilities, SessionRegister, TokenService,
};

use crate::authz::{require_capability, GuardChain};
use crate::middleware::AuthGate;

pub mod dto;
pub mod errors;
pub mod routes;

/// Shared, immutable state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub sessions: Arc<SessionRegister<dyn CredentialStore>>,
    pub store: Arc<dyn CredentialStore>,
    pub store_timeout: Duration,
}

impl AppState {
    pub fn new(config: &AuthConfig, store: Arc<dyn CredentialStore>) -> Self {
        let tokens = Arc::new(TokenService::new(config));
        let sessions = Arc::new(SessionRegister::new(tokens.clone(), store.clone()));
        Self {
            tokens,
            sessions,
            store,
            store_timeout: config.store_timeout(),
        }
    }

    /// Fresh store budget. Requests get theirs from [`start_deadline`].
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.store_timeout)
    }

    /// Guard chain for routes that only need a valid access token.
    pub fn authenticated(&self) -> GuardChain {
        GuardChain::new().then(AuthGate::new(self.tokens.clone()))
    }

    /// Auth Gate followed by a capability check.
    pub fn require(&self, required: RequiredCapabilities) -> GuardChain {
        self.authenticated().then(require_capability(self, required))
    }
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::auth::router(&state))
        .merge(routes::roles::router(&state))
        .fallback(routes::system::not_found)
        .layer(from_fn_with_state(state.clone(), start_deadline))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(from_fn(log_requests)))
}

/// Start the request's store budget. Guards and handlers read it from the
/// request extensions, so every store call of one request shares it.
async fn start_deadline(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    req.extensions_mut().insert(state.deadline());
    next.run(req).await
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let started = Instant::now();

    let response = next.run(req).await;

    tracing::info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}
