//! Process configuration loaded from the environment.
//!
//! | Variable | Required | Default |
//! |---|---|---|
//! | `DATABASE_URL` | no (in-memory store when unset) | |
//! | `PORT` | no | `3000` |
//! | `JWT_SECRET` | yes | |
//! | `JWT_REFRESH_SECRET` | yes, must differ from `JWT_SECRET` | |
//! | `JWT_ACCESS_EXPIRY` | no | `15m` |
//! | `JWT_REFRESH_EXPIRY` | no | `168h` |
//! | `JWT_LEEWAY` | no | `0s` |
//! | `STORE_TIMEOUT` | no | `5s` |
//!
//! Durations use the compact `1h30m` / `250ms` notation.

use std::time::Duration;

use thiserror::Error;

use calth_auth::{AuthConfig, ConfigError as AuthConfigError};

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error(transparent)]
    Auth(#[from] AuthConfigError),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub port: u16,
    pub auth: AuthConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                var: "PORT",
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let access_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let refresh_secret =
            get("JWT_REFRESH_SECRET").ok_or(ConfigError::Missing("JWT_REFRESH_SECRET"))?;

        let mut auth = AuthConfig::new(access_secret, refresh_secret)?;
        if let Some(raw) = get("JWT_ACCESS_EXPIRY") {
            auth = auth.with_access_ttl(duration_var("JWT_ACCESS_EXPIRY", &raw)?)?;
        }
        if let Some(raw) = get("JWT_REFRESH_EXPIRY") {
            auth = auth.with_refresh_ttl(duration_var("JWT_REFRESH_EXPIRY", &raw)?)?;
        }
        if let Some(raw) = get("JWT_LEEWAY") {
            auth = auth.with_leeway(duration_var("JWT_LEEWAY", &raw)?)?;
        }
        if let Some(raw) = get("STORE_TIMEOUT") {
            auth = auth.with_store_timeout(duration_var("STORE_TIMEOUT", &raw)?)?;
        }

        Ok(Self {
            database_url: get("DATABASE_URL"),
            port,
            auth,
        })
    }
}

fn duration_var(var: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    parse_duration(raw).map_err(|reason| ConfigError::Invalid { var, reason })
}

/// Parse a duration such as `15m`, `168h`, `1h30m`, `1.5s` or `250ms`.
///
/// Each component is a decimal number followed by one of `ms`, `s`, `m`, `h`.
/// A bare `0` is accepted.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let s = raw.trim();
    if s.is_empty() {
        return Err("empty duration".into());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {s:?}"))?;
        if num_len == 0 {
            return Err(format!("expected a number in duration {s:?}"));
        }
        let value: f64 = rest[..num_len]
            .parse()
            .map_err(|_| format!("invalid number in duration {s:?}"))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            other => return Err(format!("unknown unit {other:?} in duration {s:?}")),
        };
        rest = &rest[unit_len..];

        let part = Duration::try_from_secs_f64(value * scale)
            .map_err(|e| format!("duration {s:?} out of range: {e}"))?;
        total = total
            .checked_add(part)
            .ok_or_else(|| format!("duration {s:?} out of range"))?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const SECRETS: [(&str, &str); 2] = [
        ("JWT_SECRET", "access-secret-0123456789"),
        ("JWT_REFRESH_SECRET", "refresh-secret-0123456789"),
    ];

    #[test]
    fn parses_compound_durations() {
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("168h").unwrap(), Duration::from_secs(168 * 3600));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn rejects_bad_durations() {
        for bad in ["", "15", "m", "10x", "1h-5m", "7d"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn overflowing_sum_is_an_error() {
        let err = parse_duration("18000000000000000000s18000000000000000000s").unwrap_err();
        assert!(err.contains("out of range"), "{err}");
    }

    #[test]
    fn oversized_leeway_and_timeout_are_config_errors() {
        for var in ["JWT_LEEWAY", "STORE_TIMEOUT"] {
            let mut pairs = SECRETS.to_vec();
            pairs.push((var, "18000000000000000000s"));
            let err = AppConfig::from_lookup(env(&pairs)).unwrap_err();
            assert!(
                matches!(err, ConfigError::Auth(AuthConfigError::DurationTooLarge { .. })),
                "{var}: {err:?}"
            );
        }
    }

    #[test]
    fn defaults_apply_with_only_secrets() {
        let cfg = AppConfig::from_lookup(env(&SECRETS)).unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.auth.access_ttl(), calth_auth::config::DEFAULT_ACCESS_TTL);
    }

    #[test]
    fn reads_every_variable() {
        let mut pairs = SECRETS.to_vec();
        pairs.extend([
            ("DATABASE_URL", "postgres://localhost/calth"),
            ("PORT", "8081"),
            ("JWT_ACCESS_EXPIRY", "5m"),
            ("JWT_REFRESH_EXPIRY", "24h"),
            ("JWT_LEEWAY", "2s"),
            ("STORE_TIMEOUT", "750ms"),
        ]);
        let cfg = AppConfig::from_lookup(env(&pairs)).unwrap();

        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/calth"));
        assert_eq!(cfg.port, 8081);
        assert_eq!(cfg.auth.access_ttl(), Duration::from_secs(300));
        assert_eq!(cfg.auth.refresh_ttl(), Duration::from_secs(86_400));
        assert_eq!(cfg.auth.leeway(), Duration::from_secs(2));
        assert_eq!(cfg.auth.store_timeout(), Duration::from_millis(750));
    }

    #[test]
    fn missing_secret_is_an_error() {
        let err = AppConfig::from_lookup(env(&SECRETS[..1])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("JWT_REFRESH_SECRET"));
    }

    #[test]
    fn identical_secrets_are_an_error() {
        let err = AppConfig::from_lookup(env(&[
            ("JWT_SECRET", "same-secret-0123456789"),
            ("JWT_REFRESH_SECRET", "same-secret-0123456789"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Auth(AuthConfigError::SharedSecret));
    }

    #[test]
    fn invalid_expiry_names_the_variable() {
        let mut pairs = SECRETS.to_vec();
        pairs.push(("JWT_ACCESS_EXPIRY", "soon"));
        let err = AppConfig::from_lookup(env(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "JWT_ACCESS_EXPIRY", .. }));
    }
}
