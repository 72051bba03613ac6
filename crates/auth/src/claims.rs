use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use calth_core::{BusinessId, RoleId, UserId};

use crate::Identity;

/// JWT claims model shared by access and refresh tokens.
///
/// `iat`/`exp` are standard NumericDate values (seconds since the epoch).
/// `jti` is unique per token so two pairs issued within the same second for
/// the same identity still differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject / user identifier.
    pub sub: UserId,

    /// Tenant the session is bound to.
    pub business_id: BusinessId,

    /// Role granted to the user at issuance time.
    pub role_id: RoleId,

    /// Issued-at timestamp.
    pub iat: i64,

    /// Expiration timestamp.
    pub exp: i64,

    /// Token identifier.
    pub jti: Uuid,
}

impl TokenClaims {
    pub fn new(identity: &Identity, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            sub: identity.user_id,
            business_id: identity.business_id,
            role_id: identity.role_id,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::now_v7(),
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.sub, self.business_id, self.role_id)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (iat is in the future)")]
    NotYetValid,

    #[error("invalid token time window (exp <= iat)")]
    InvalidTimeWindow,
}

/// Deterministically validate the time window of already-verified claims.
///
/// `leeway_secs` widens both ends of the window; it is zero unless clock skew
/// tolerance has been configured explicitly.
///
/// Note: this validates the *claims* only. Signature verification happens in
/// [`crate::TokenService`] before this is called.
pub fn validate_claims(
    claims: &TokenClaims,
    now: DateTime<Utc>,
    leeway_secs: i64,
) -> Result<(), TokenValidationError> {
    if claims.exp <= claims.iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    let now = now.timestamp();
    if now.saturating_add(leeway_secs) < claims.iat {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.exp.saturating_add(leeway_secs) {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims_at(now: DateTime<Utc>, ttl: Duration) -> TokenClaims {
        let identity = Identity::new(UserId::new(), BusinessId::new(), RoleId::new());
        TokenClaims::new(&identity, now, now + ttl)
    }

    #[test]
    fn accepts_token_inside_window() {
        let now = Utc::now();
        let claims = claims_at(now, Duration::minutes(15));
        assert_eq!(validate_claims(&claims, now, 0), Ok(()));
    }

    #[test]
    fn rejects_exactly_at_expiry() {
        let now = Utc::now();
        let claims = claims_at(now, Duration::seconds(30));
        let at_expiry = now + Duration::seconds(30);
        assert_eq!(
            validate_claims(&claims, at_expiry, 0),
            Err(TokenValidationError::Expired)
        );
    }

    #[test]
    fn leeway_extends_expiry() {
        let now = Utc::now();
        let claims = claims_at(now, Duration::seconds(30));
        let late = now + Duration::seconds(40);
        assert_eq!(validate_claims(&claims, late, 0), Err(TokenValidationError::Expired));
        assert_eq!(validate_claims(&claims, late, 60), Ok(()));
    }

    #[test]
    fn extreme_timestamps_and_leeway_do_not_overflow() {
        let now = Utc::now();
        let claims = claims_at(now, Duration::seconds(30));
        assert_eq!(validate_claims(&claims, now, i64::MAX), Ok(()));

        let mut far = claims_at(now, Duration::seconds(30));
        far.exp = i64::MAX;
        assert_eq!(validate_claims(&far, now, 60), Ok(()));
    }

    #[test]
    fn rejects_future_issued_at() {
        let now = Utc::now();
        let claims = claims_at(now + Duration::minutes(5), Duration::minutes(15));
        assert_eq!(
            validate_claims(&claims, now, 0),
            Err(TokenValidationError::NotYetValid)
        );
    }

    #[test]
    fn rejects_inverted_window() {
        let now = Utc::now();
        let mut claims = claims_at(now, Duration::minutes(1));
        claims.exp = claims.iat;
        assert_eq!(
            validate_claims(&claims, now, 0),
            Err(TokenValidationError::InvalidTimeWindow)
        );
    }

    #[test]
    fn each_claim_set_gets_a_fresh_jti() {
        let now = Utc::now();
        let a = claims_at(now, Duration::minutes(1));
        let b = claims_at(now, Duration::minutes(1));
        assert_ne!(a.jti, b.jti);
    }
}
