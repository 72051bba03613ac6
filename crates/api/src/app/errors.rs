use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use calth_auth::{GrantError, LoginError, SessionError, StoreError, TokenError};
use calth_core::DomainError;

use crate::app::dto::Envelope;

/// Boundary error for every handler and guard.
///
/// | Variant | Status |
/// |---|---|
/// | `Validation` | 400 |
/// | `Unauthorized` | 401 |
/// | `Forbidden` | 403 |
/// | `NotFound` | 404 |
/// | `Internal` | 500 |
///
/// The `Internal` cause is logged and never sent to the client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    Unauthorized {
        code: &'static str,
        message: &'static str,
    },

    #[error("forbidden")]
    Forbidden,

    #[error("{0}")]
    NotFound(&'static str),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(cause: impl ToString) -> Self {
        Self::Internal(cause.to_string())
    }

    pub fn missing_token() -> Self {
        Self::Unauthorized {
            code: "missing_token",
            message: "missing bearer token",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code, sent as the envelope's `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::Unauthorized { code, .. } => *code,
            ApiError::Forbidden => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Internal(_) => "internal_error",
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Validation(msg) => msg.clone(),
            ApiError::Unauthorized { message, .. } => (*message).to_string(),
            ApiError::Forbidden => "insufficient permissions".to_string(),
            ApiError::NotFound(what) => (*what).to_string(),
            ApiError::Internal(_) => "internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(cause) = &self {
            tracing::error!(%cause, "request failed");
        }
        Envelope::failure(self.status(), self.public_message(), self.code())
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => ApiError::Unauthorized {
                code: "token_expired",
                message: "token has expired",
            },
            TokenError::Malformed => ApiError::Unauthorized {
                code: "malformed_token",
                message: "malformed token",
            },
            TokenError::SignatureMismatch => ApiError::Unauthorized {
                code: "invalid_signature",
                message: "invalid token",
            },
            TokenError::Signing(cause) => ApiError::Internal(cause),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Token(e) => e.into(),
            SessionError::StaleCredential => ApiError::Unauthorized {
                code: "stale_credential",
                message: "refresh token is no longer valid",
            },
            SessionError::Store(e) => e.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::internal(err)
    }
}

impl From<LoginError> for ApiError {
    fn from(err: LoginError) -> Self {
        match err {
            LoginError::Validation(msg) => ApiError::Validation(msg),
            LoginError::InvalidCredentials => ApiError::Unauthorized {
                code: "invalid_credentials",
                message: "invalid credentials",
            },
            LoginError::Store(e) => e.into(),
        }
    }
}

impl From<GrantError> for ApiError {
    fn from(err: GrantError) -> Self {
        match err {
            GrantError::Validation(_) | GrantError::InvalidPermissionId(_) => {
                ApiError::Validation(err.to_string())
            }
            GrantError::DuplicateRoleValue => ApiError::validation("role exists"),
            GrantError::RoleNotFound => ApiError::NotFound("role not found"),
            GrantError::UnknownPermission => ApiError::NotFound("permission not found"),
            GrantError::Store(e) => e.into(),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}
