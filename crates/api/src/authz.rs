//! Request guards for protected routes.
//!
//! Each protected route declares, at registration time, an ordered
//! [`GuardChain`]: usually the Auth Gate followed by one
//! [`RequireCapability`]. Guards run in order and the first rejection ends the
//! request; the handler never runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Request;

use calth_auth::{authorize, CredentialStore, Deadline, Decision, RequiredCapabilities};

use crate::app::errors::ApiError;
use crate::app::AppState;
use crate::context::IdentityContext;

#[async_trait]
pub trait Guard: Send + Sync {
    /// Allow the request through (possibly enriching its extensions) or
    /// reject it.
    async fn check(&self, req: &mut Request) -> Result<(), ApiError>;
}

/// Ordered guards, evaluated with short-circuit on the first rejection.
#[derive(Clone, Default)]
pub struct GuardChain {
    guards: Vec<Arc<dyn Guard>>,
}

impl GuardChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, guard: impl Guard + 'static) -> Self {
        self.guards.push(Arc::new(guard));
        self
    }

    pub async fn run(&self, req: &mut Request) -> Result<(), ApiError> {
        for guard in &self.guards {
            guard.check(req).await?;
        }
        Ok(())
    }
}

/// Permission Engine check against the identity left by the Auth Gate.
///
/// Deny -> 403 with a generic message; lookup failure -> 500.
pub struct RequireCapability {
    store: Arc<dyn CredentialStore>,
    required: RequiredCapabilities,
    store_timeout: Duration,
}

impl RequireCapability {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        required: RequiredCapabilities,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            required,
            store_timeout,
        }
    }
}

/// Capability guard bound to the app's credential store and store budget.
pub fn require_capability(state: &AppState, required: RequiredCapabilities) -> RequireCapability {
    RequireCapability::new(state.store.clone(), required, state.store_timeout)
}

#[async_trait]
impl Guard for RequireCapability {
    async fn check(&self, req: &mut Request) -> Result<(), ApiError> {
        let Some(ctx) = req.extensions().get::<IdentityContext>().copied() else {
            return Err(ApiError::missing_token());
        };

        let deadline = req
            .extensions()
            .get::<Deadline>()
            .copied()
            .unwrap_or_else(|| Deadline::after(self.store_timeout));
        match authorize(self.store.as_ref(), ctx.identity(), &self.required, deadline).await? {
            Decision::Allow => Ok(()),
            Decision::Deny { .. } => Err(ApiError::Forbidden),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::body::Body;

    use super::*;

    struct Counting {
        calls: Arc<AtomicUsize>,
        reject: bool,
    }

    #[async_trait]
    impl Guard for Counting {
        async fn check(&self, _req: &mut Request) -> Result<(), ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                Err(ApiError::Forbidden)
            } else {
                Ok(())
            }
        }
    }

    fn counting(calls: &Arc<AtomicUsize>, reject: bool) -> Counting {
        Counting {
            calls: calls.clone(),
            reject,
        }
    }

    #[tokio::test]
    async fn chain_stops_at_first_rejection() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let chain = GuardChain::new()
            .then(counting(&first, true))
            .then(counting(&second, false));

        let mut req = Request::new(Body::empty());
        assert!(matches!(chain.run(&mut req).await, Err(ApiError::Forbidden)));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_chain_allows() {
        let chain = GuardChain::new();
        let mut req = Request::new(Body::empty());
        assert!(chain.run(&mut req).await.is_ok());
    }

    #[tokio::test]
    async fn capability_without_identity_is_unauthorized() {
        let store: Arc<dyn CredentialStore> =
            Arc::new(calth_infra::InMemoryCredentialStore::new());
        let guard = RequireCapability::new(
            store,
            RequiredCapabilities::single(calth_auth::ActionKey::from_static("roles-view")),
            Duration::from_secs(1),
        );

        let mut req = Request::new(Body::empty());
        let err = guard.check(&mut req).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    struct Slow(Duration);

    #[async_trait]
    impl Guard for Slow {
        async fn check(&self, _req: &mut Request) -> Result<(), ApiError> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    fn identified_request() -> Request {
        let mut req = Request::new(Body::empty());
        req.extensions_mut().insert(IdentityContext::new(calth_auth::Identity::new(
            calth_core::UserId::new(),
            calth_core::BusinessId::new(),
            calth_core::RoleId::new(),
        )));
        req
    }

    fn slow_then_capability() -> GuardChain {
        let store: Arc<dyn CredentialStore> =
            Arc::new(calth_infra::InMemoryCredentialStore::new());
        GuardChain::new().then(Slow(Duration::from_secs(2))).then(RequireCapability::new(
            store,
            RequiredCapabilities::single(calth_auth::ActionKey::from_static("roles-view")),
            Duration::from_secs(10),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn capability_check_spends_the_request_budget() {
        let mut req = identified_request();
        req.extensions_mut()
            .insert(Deadline::after(Duration::from_secs(1)));

        let err = slow_then_capability().run(&mut req).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test(start_paused = true)]
    async fn capability_check_without_request_budget_starts_its_own() {
        let mut req = identified_request();
        let err = slow_then_capability().run(&mut req).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);
    }
}
