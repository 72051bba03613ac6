//! Auth core configuration.
//!
//! Constructed once at startup (see `calth-infra::config`) and injected into
//! [`crate::TokenService`], [`crate::SessionRegister`] and the HTTP guards.

use std::time::Duration;

use thiserror::Error;

/// Default lifetime of an access token.
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);

/// Default lifetime of a refresh token.
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default deadline applied to every credential-store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for every configured duration. Anything larger would overflow
/// token timestamps or the per-request deadline.
pub const MAX_DURATION: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Upper bound for clock-skew leeway.
pub const MAX_LEEWAY: Duration = Duration::from_secs(60 * 60);

/// Minimum accepted secret length (bytes) for HS256 signing keys.
pub const MIN_SECRET_LEN: usize = 16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} secret is too short (minimum {MIN_SECRET_LEN} bytes)")]
    SecretTooShort(&'static str),

    #[error("access and refresh secrets must differ")]
    SharedSecret,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("{name} exceeds the maximum of {max:?}")]
    DurationTooLarge { name: &'static str, max: Duration },
}

fn bounded(name: &'static str, value: Duration, max: Duration) -> Result<Duration, ConfigError> {
    if value > max {
        return Err(ConfigError::DurationTooLarge { name, max });
    }
    Ok(value)
}

#[derive(Clone)]
pub struct AuthConfig {
    access_secret: Vec<u8>,
    refresh_secret: Vec<u8>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    leeway: Duration,
    store_timeout: Duration,
}

impl AuthConfig {
    /// Build a configuration with default lifetimes.
    ///
    /// The two secrets must be distinct so a leaked access-token secret cannot
    /// be used to forge refresh tokens.
    pub fn new(
        access_secret: impl Into<Vec<u8>>,
        refresh_secret: impl Into<Vec<u8>>,
    ) -> Result<Self, ConfigError> {
        let access_secret = access_secret.into();
        let refresh_secret = refresh_secret.into();

        if access_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::SecretTooShort("access"));
        }
        if refresh_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::SecretTooShort("refresh"));
        }
        if access_secret == refresh_secret {
            return Err(ConfigError::SharedSecret);
        }

        Ok(Self {
            access_secret,
            refresh_secret,
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            leeway: Duration::ZERO,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        })
    }

    pub fn with_access_ttl(mut self, ttl: Duration) -> Result<Self, ConfigError> {
        if ttl.is_zero() {
            return Err(ConfigError::ZeroDuration("access token lifetime"));
        }
        self.access_ttl = bounded("access token lifetime", ttl, MAX_DURATION)?;
        Ok(self)
    }

    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Result<Self, ConfigError> {
        if ttl.is_zero() {
            return Err(ConfigError::ZeroDuration("refresh token lifetime"));
        }
        self.refresh_ttl = bounded("refresh token lifetime", ttl, MAX_DURATION)?;
        Ok(self)
    }

    /// Clock-skew tolerance applied when checking token time windows.
    pub fn with_leeway(mut self, leeway: Duration) -> Result<Self, ConfigError> {
        self.leeway = bounded("token leeway", leeway, MAX_LEEWAY)?;
        Ok(self)
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("store timeout"));
        }
        self.store_timeout = bounded("store timeout", timeout, MAX_DURATION)?;
        Ok(self)
    }

    pub fn access_secret(&self) -> &[u8] {
        &self.access_secret
    }

    pub fn refresh_secret(&self) -> &[u8] {
        &self.refresh_secret
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn leeway(&self) -> Duration {
        self.leeway
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }
}

impl core::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("leeway", &self.leeway)
            .field("store_timeout", &self.store_timeout)
            .finish()
    }
}
