use thiserror::Error;
use tracing::instrument;

use calth_core::BusinessId;

use crate::password::verify_password;
use crate::{Deadline, Identity, IdentityStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoginError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown business, unknown user and wrong password are
    /// indistinguishable to the caller.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Validated login input.
#[derive(Clone)]
pub struct LoginCredentials {
    business_id: BusinessId,
    email: String,
    password: String,
}

impl LoginCredentials {
    pub fn parse(business_id: &str, email: &str, password: &str) -> Result<Self, LoginError> {
        let business_id = business_id
            .parse::<BusinessId>()
            .map_err(|_| LoginError::Validation("businessID must be a valid UUID".into()))?;

        let email = email.trim();
        if email.is_empty() {
            return Err(LoginError::Validation("email is required".into()));
        }
        if !email.contains('@') {
            return Err(LoginError::Validation("email is not valid".into()));
        }
        if password.is_empty() {
            return Err(LoginError::Validation("password is required".into()));
        }

        Ok(Self {
            business_id,
            email: email.to_owned(),
            password: password.to_owned(),
        })
    }

    pub fn business_id(&self) -> BusinessId {
        self.business_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

impl core::fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("business_id", &self.business_id)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Resolve login input to an [`Identity`].
///
/// Does not touch session state; callers hand the identity to
/// [`crate::SessionRegister::login`] on success.
#[instrument(
    skip(store, creds, deadline),
    fields(business_id = %creds.business_id, email = %creds.email),
    err
)]
pub async fn verify_credentials<S>(
    store: &S,
    creds: LoginCredentials,
    deadline: Deadline,
) -> Result<Identity, LoginError>
where
    S: IdentityStore + ?Sized,
{
    let Some(business) = deadline
        .run("find_business", store.find_business(creds.business_id))
        .await?
    else {
        tracing::debug!("login for unknown business");
        return Err(LoginError::InvalidCredentials);
    };

    let Some(user) = deadline
        .run(
            "find_user_by_email",
            store.find_user_by_email(business.id, &creds.email),
        )
        .await?
    else {
        tracing::debug!("login for unknown user");
        return Err(LoginError::InvalidCredentials);
    };

    let identity = user.identity();
    if !verify_password(creds.password, user.password_hash).await {
        tracing::debug!(user_id = %identity.user_id, "login with wrong password");
        return Err(LoginError::InvalidCredentials);
    }

    Ok(identity)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use calth_core::{RoleId, UserId};

    use super::*;
    use crate::password::hash_password;
    use crate::store::{BusinessRecord, UserCredentials, UserProfile, UserRecord};

    struct OneUser {
        business: BusinessRecord,
        user: UserCredentials,
        email: String,
    }

    #[async_trait]
    impl IdentityStore for OneUser {
        async fn find_business(&self, id: BusinessId) -> Result<Option<BusinessRecord>, StoreError> {
            Ok((id == self.business.id).then(|| self.business.clone()))
        }

        async fn find_user_by_email(
            &self,
            business_id: BusinessId,
            email: &str,
        ) -> Result<Option<UserCredentials>, StoreError> {
            Ok((business_id == self.user.business_id && email == self.email)
                .then(|| self.user.clone()))
        }

        async fn find_user(&self, _: UserId) -> Result<Option<UserRecord>, StoreError> {
            Ok(None)
        }

        async fn user_profile(&self, _: &Identity) -> Result<Option<UserProfile>, StoreError> {
            Ok(None)
        }
    }

    fn store() -> OneUser {
        let business_id = BusinessId::new();
        OneUser {
            business: BusinessRecord {
                id: business_id,
                name: "Clinic".into(),
            },
            user: UserCredentials {
                user_id: UserId::new(),
                business_id,
                role_id: RoleId::new(),
                password_hash: hash_password("s3cret!", 4).unwrap(),
            },
            email: "ana@clinic.test".into(),
        }
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    #[test]
    fn parse_rejects_bad_input() {
        let b = BusinessId::new().to_string();
        assert!(matches!(
            LoginCredentials::parse("nope", "a@b.c", "pw"),
            Err(LoginError::Validation(_))
        ));
        assert!(matches!(
            LoginCredentials::parse(&b, "   ", "pw"),
            Err(LoginError::Validation(_))
        ));
        assert!(matches!(
            LoginCredentials::parse(&b, "no-at-sign", "pw"),
            Err(LoginError::Validation(_))
        ));
        assert!(matches!(
            LoginCredentials::parse(&b, "a@b.c", ""),
            Err(LoginError::Validation(_))
        ));
    }

    #[test]
    fn debug_redacts_password() {
        let creds =
            LoginCredentials::parse(&BusinessId::new().to_string(), "a@b.c", "hunter22").unwrap();
        assert!(!format!("{creds:?}").contains("hunter22"));
    }

    #[tokio::test]
    async fn correct_password_yields_identity() {
        let store = store();
        let creds = LoginCredentials::parse(
            &store.business.id.to_string(),
            "ana@clinic.test",
            "s3cret!",
        )
        .unwrap();

        let identity = verify_credentials(&store, creds, deadline()).await.unwrap();
        assert_eq!(identity, store.user.identity());
    }

    #[tokio::test]
    async fn every_miss_is_invalid_credentials() {
        let store = store();
        let business = store.business.id.to_string();

        let cases = [
            (BusinessId::new().to_string(), "ana@clinic.test", "s3cret!"),
            (business.clone(), "bob@clinic.test", "s3cret!"),
            (business.clone(), "ana@clinic.test", "wrong"),
        ];
        for (b, email, password) in cases {
            let creds = LoginCredentials::parse(&b, email, password).unwrap();
            assert_eq!(
                verify_credentials(&store, creds, deadline()).await.unwrap_err(),
                LoginError::InvalidCredentials
            );
        }
    }
}
