//! Token Service: issues and validates signed credential pairs.
//!
//! Tokens are HS256 JWTs. Access and refresh tokens are signed with distinct
//! secrets and carry independent lifetimes. The service holds no mutable
//! state: output depends only on the configured secrets and the supplied
//! clock value.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use crate::claims::{validate_claims, TokenClaims, TokenValidationError};
use crate::{AuthConfig, CredentialPair, Identity};

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Which of the two token kinds (and therefore which secret) is expected.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,

    #[error("token signature does not verify")]
    SignatureMismatch,

    #[error("token has expired")]
    Expired,

    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<TokenValidationError> for TokenError {
    fn from(value: TokenValidationError) -> Self {
        match value {
            TokenValidationError::Expired => TokenError::Expired,
            TokenValidationError::NotYetValid | TokenValidationError::InvalidTimeWindow => {
                TokenError::Malformed
            }
        }
    }
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SigningKeys {
    fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }
}

pub struct TokenService {
    access: SigningKeys,
    refresh: SigningKeys,
    leeway_secs: i64,
    validation: Validation,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        // Expiry is checked by `validate_claims` against the caller's clock,
        // after the signature has been verified.
        let mut validation = Validation::new(ALGORITHM);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            access: SigningKeys::new(config.access_secret(), config.access_ttl()),
            refresh: SigningKeys::new(config.refresh_secret(), config.refresh_ttl()),
            leeway_secs: i64::try_from(config.leeway().as_secs()).unwrap_or(i64::MAX),
            validation,
        }
    }

    fn keys(&self, kind: TokenKind) -> &SigningKeys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    /// Issue a new pair for `identity`, stamped with the current time.
    pub fn issue(&self, identity: &Identity) -> Result<CredentialPair, TokenError> {
        self.issue_at(identity, Utc::now())
    }

    /// Issue a new pair as of `now`.
    pub fn issue_at(
        &self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<CredentialPair, TokenError> {
        Ok(CredentialPair {
            access_token: self.sign(identity, TokenKind::Access, now)?,
            refresh_token: self.sign(identity, TokenKind::Refresh, now)?,
        })
    }

    fn sign(
        &self,
        identity: &Identity,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let keys = self.keys(kind);
        let expires_at = chrono::Duration::from_std(keys.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| TokenError::Signing(format!("{} lifetime out of range", kind.as_str())))?;

        let claims = TokenClaims::new(identity, now, expires_at);
        jsonwebtoken::encode(&Header::new(ALGORITHM), &claims, &keys.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Validate `token` as a `kind` token against the current time.
    pub fn validate(&self, token: &str, kind: TokenKind) -> Result<Identity, TokenError> {
        self.validate_at(token, kind, Utc::now())
    }

    /// Validate `token` as a `kind` token as of `now`.
    ///
    /// The signature is checked before the time window, so a correctly signed
    /// token past its expiry always reports [`TokenError::Expired`].
    pub fn validate_at(
        &self,
        token: &str,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<Identity, TokenError> {
        let claims = self.verify_signature(token, kind)?;
        validate_claims(&claims, now, self.leeway_secs)?;
        Ok(claims.identity())
    }

    fn verify_signature(&self, token: &str, kind: TokenKind) -> Result<TokenClaims, TokenError> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| TokenError::Malformed)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::SignatureMismatch);
        }

        jsonwebtoken::decode::<TokenClaims>(token, &self.keys(kind).decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName
                | ErrorKind::MissingAlgorithm => TokenError::SignatureMismatch,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            })
    }
}

impl core::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenService")
            .field("access_ttl", &self.access.ttl)
            .field("refresh_ttl", &self.refresh.ttl)
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calth_core::{BusinessId, RoleId, UserId};
    use proptest::prelude::*;
    use uuid::Uuid;

    const ACCESS: &str = "access-secret-for-tests-0001";
    const REFRESH: &str = "refresh-secret-for-tests-0001";

    fn service() -> TokenService {
        TokenService::new(&AuthConfig::new(ACCESS, REFRESH).unwrap())
    }

    fn identity() -> Identity {
        Identity::new(UserId::new(), BusinessId::new(), RoleId::new())
    }

    #[test]
    fn issued_pair_validates_with_matching_kind() {
        let svc = service();
        let id = identity();
        let pair = svc.issue(&id).unwrap();

        assert_eq!(svc.validate(&pair.access_token, TokenKind::Access).unwrap(), id);
        assert_eq!(svc.validate(&pair.refresh_token, TokenKind::Refresh).unwrap(), id);
    }

    #[test]
    fn access_token_does_not_validate_as_refresh() {
        let svc = service();
        let pair = svc.issue(&identity()).unwrap();

        assert_eq!(
            svc.validate(&pair.access_token, TokenKind::Refresh),
            Err(TokenError::SignatureMismatch)
        );
        assert_eq!(
            svc.validate(&pair.refresh_token, TokenKind::Access),
            Err(TokenError::SignatureMismatch)
        );
    }

    #[test]
    fn expired_token_reports_expired_not_signature_mismatch() {
        let svc = service();
        let issued = Utc::now() - chrono::Duration::hours(2);
        let pair = svc.issue_at(&identity(), issued).unwrap();

        assert_eq!(
            svc.validate(&pair.access_token, TokenKind::Access),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn validity_tracks_configured_lifetimes() {
        let cfg = AuthConfig::new(ACCESS, REFRESH)
            .unwrap()
            .with_access_ttl(Duration::from_secs(60))
            .unwrap()
            .with_refresh_ttl(Duration::from_secs(3600))
            .unwrap();
        let svc = TokenService::new(&cfg);
        let now = Utc::now();
        let pair = svc.issue_at(&identity(), now).unwrap();
        let later = now + chrono::Duration::seconds(120);

        assert_eq!(
            svc.validate_at(&pair.access_token, TokenKind::Access, later),
            Err(TokenError::Expired)
        );
        assert!(svc.validate_at(&pair.refresh_token, TokenKind::Refresh, later).is_ok());
    }

    #[test]
    fn garbage_is_malformed() {
        let svc = service();
        assert_eq!(
            svc.validate("not-a-jwt", TokenKind::Access),
            Err(TokenError::Malformed)
        );
        assert_eq!(svc.validate("", TokenKind::Access), Err(TokenError::Malformed));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let svc = service();
        let pair = svc.issue(&identity()).unwrap();
        let other = svc.issue(&identity()).unwrap();

        // Splice the payload of one token onto the signature of another.
        let a: Vec<&str> = pair.access_token.split('.').collect();
        let b: Vec<&str> = other.access_token.split('.').collect();
        let forged = format!("{}.{}.{}", a[0], b[1], a[2]);

        assert_eq!(
            svc.validate(&forged, TokenKind::Access),
            Err(TokenError::SignatureMismatch)
        );
    }

    #[test]
    fn unexpected_algorithm_is_a_signature_mismatch() {
        let svc = service();
        let now = Utc::now();
        let claims = TokenClaims::new(&identity(), now, now + chrono::Duration::minutes(5));
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(ACCESS.as_bytes()),
        )
        .unwrap();

        assert_eq!(
            svc.validate(&token, TokenKind::Access),
            Err(TokenError::SignatureMismatch)
        );
    }

    #[test]
    fn token_signed_with_foreign_secret_is_rejected() {
        let svc = service();
        let other = TokenService::new(
            &AuthConfig::new("another-access-secret-xyz", "another-refresh-secret-xyz").unwrap(),
        );
        let pair = other.issue(&identity()).unwrap();

        assert_eq!(
            svc.validate(&pair.access_token, TokenKind::Access),
            Err(TokenError::SignatureMismatch)
        );
    }

    #[test]
    fn same_identity_same_second_yields_distinct_tokens() {
        let svc = service();
        let id = identity();
        let now = Utc::now();
        let a = svc.issue_at(&id, now).unwrap();
        let b = svc.issue_at(&id, now).unwrap();
        assert_ne!(a.refresh_token, b.refresh_token);
        assert_ne!(a.access_token, b.access_token);
    }

    proptest! {
        #[test]
        fn validate_inverts_issue(user in any::<u128>(), business in any::<u128>(), role in any::<u128>()) {
            let svc = service();
            let id = Identity::new(
                UserId::from_uuid(Uuid::from_u128(user)),
                BusinessId::from_uuid(Uuid::from_u128(business)),
                RoleId::from_uuid(Uuid::from_u128(role)),
            );
            let pair = svc.issue(&id).unwrap();
            prop_assert_eq!(svc.validate(&pair.access_token, TokenKind::Access).unwrap(), id);
            prop_assert_eq!(svc.validate(&pair.refresh_token, TokenKind::Refresh).unwrap(), id);
        }
    }
}
