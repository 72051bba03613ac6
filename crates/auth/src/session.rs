//! Session Register: the single live refresh token per user.
//!
//! Login records a freshly issued refresh token, rotation trades the live
//! token for a new pair, and logout kills the session. Issuance and recording
//! form one unit: if the store write fails the issued pair is dropped and the
//! caller sees the failure.

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use calth_core::UserId;

use crate::{
    CredentialPair, Deadline, Identity, IdentityStore, SessionStore, StoreError, TokenError,
    TokenKind, TokenService,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Token(#[from] TokenError),

    /// A well-formed, unexpired refresh token that is no longer the user's
    /// live token (superseded by rotation, a later login, or logout).
    #[error("refresh token is no longer current")]
    StaleCredential,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct SessionRegister<S: ?Sized> {
    tokens: Arc<TokenService>,
    store: Arc<S>,
}

impl<S: ?Sized> Clone for SessionRegister<S> {
    fn clone(&self) -> Self {
        Self {
            tokens: Arc::clone(&self.tokens),
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> SessionRegister<S>
where
    S: IdentityStore + SessionStore + ?Sized,
{
    pub fn new(tokens: Arc<TokenService>, store: Arc<S>) -> Self {
        Self { tokens, store }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Issue a pair for an authenticated identity and make its refresh token
    /// the user's live one. Any previous session is superseded.
    #[instrument(skip(self, identity, deadline), fields(user_id = %identity.user_id), err)]
    pub async fn login(
        &self,
        identity: &Identity,
        deadline: Deadline,
    ) -> Result<CredentialPair, SessionError> {
        let pair = self.tokens.issue(identity)?;
        self.record_refresh(identity.user_id, &pair.refresh_token, deadline)
            .await?;
        Ok(pair)
    }

    pub async fn record_refresh(
        &self,
        user_id: UserId,
        token: &str,
        deadline: Deadline,
    ) -> Result<(), SessionError> {
        deadline
            .run("record_refresh", self.store.record_refresh(user_id, token))
            .await?;
        Ok(())
    }

    /// Exchange the live refresh token for a new pair.
    ///
    /// The new pair carries the user's current business and role, so a role
    /// change takes effect at the next rotation. The final write is a
    /// compare-and-swap against `presented`: of two concurrent rotations
    /// with the same token exactly one succeeds, the other sees
    /// [`SessionError::StaleCredential`].
    #[instrument(skip_all, err)]
    pub async fn rotate(
        &self,
        presented: &str,
        deadline: Deadline,
    ) -> Result<CredentialPair, SessionError> {
        let claimed = self.tokens.validate(presented, TokenKind::Refresh)?;

        let user = deadline
            .run("find_user", self.store.find_user(claimed.user_id))
            .await?
            .ok_or(SessionError::StaleCredential)?;

        if user.refresh_token.as_deref() != Some(presented) {
            tracing::info!(user_id = %claimed.user_id, "rejected superseded refresh token");
            return Err(SessionError::StaleCredential);
        }

        let pair = self.tokens.issue(&user.identity())?;
        let swapped = deadline
            .run(
                "swap_refresh",
                self.store
                    .swap_refresh(user.user_id, presented, &pair.refresh_token),
            )
            .await?;
        if !swapped {
            tracing::info!(user_id = %claimed.user_id, "lost refresh rotation race");
            return Err(SessionError::StaleCredential);
        }

        Ok(pair)
    }

    /// End the session of the user named by `presented`.
    ///
    /// The token must validate, but it need not be the live one: any valid
    /// refresh token for the user kills the session.
    #[instrument(skip_all, err)]
    pub async fn logout(&self, presented: &str, deadline: Deadline) -> Result<(), SessionError> {
        let claimed = self.tokens.validate(presented, TokenKind::Refresh)?;
        self.clear(claimed.user_id, deadline).await
    }

    pub async fn clear(&self, user_id: UserId, deadline: Deadline) -> Result<(), SessionError> {
        deadline
            .run("clear_refresh", self.store.clear_refresh(user_id))
            .await?;
        tracing::info!(%user_id, "session cleared");
        Ok(())
    }
}
