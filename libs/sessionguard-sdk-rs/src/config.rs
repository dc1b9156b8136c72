use std::time::Duration as StdDuration;

use env_helpers::get_env_default;
use sessionguard_types::NullHandling;
use time::Duration;

use crate::error::{SessionError, SessionResult};

/// Configuration for the session engine.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lifetime of each signed access token
    pub access_token_ttl: Duration,

    /// Lifetime of a refresh token (and so of an idle session)
    pub refresh_token_ttl: Duration,

    /// Clock skew tolerance applied to access token expiry
    pub clock_skew_seconds: u64,

    /// Whether access tokens carry an anti-CSRF token that requests must echo
    pub anti_csrf: bool,

    /// Default deadline for storage calls when the caller supplies none
    pub storage_timeout: StdDuration,

    /// How long a trusted key snapshot is served before it is re-fetched
    pub key_refresh_interval: StdDuration,

    /// Forces null handling instead of negotiating it from the backend API version
    pub null_handling: Option<NullHandling>,

    pub access_token_cookie: String,
    pub refresh_token_cookie: String,
    pub anti_csrf_header: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::hours(1),
            refresh_token_ttl: Duration::days(100),
            clock_skew_seconds: 0,
            anti_csrf: false,
            storage_timeout: StdDuration::from_secs(5),
            key_refresh_interval: StdDuration::from_secs(60),
            null_handling: None,
            access_token_cookie: "sAccessToken".to_string(),
            refresh_token_cookie: "sRefreshToken".to_string(),
            anti_csrf_header: "anti-csrf".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> SessionResult<Self> {
        let defaults = Self::default();

        let access_token_ttl_secs: i64 = get_env_default("SESSION_ACCESS_TOKEN_TTL_SECS", 3_600);
        let refresh_token_ttl_days: i64 = get_env_default("SESSION_REFRESH_TOKEN_TTL_DAYS", 100);
        let clock_skew_seconds: u64 = get_env_default("SESSION_CLOCK_SKEW_SECS", 0);
        let anti_csrf: bool = get_env_default("SESSION_ANTI_CSRF", false);
        let storage_timeout_ms: u64 = get_env_default("SESSION_STORAGE_TIMEOUT_MS", 5_000);
        let key_refresh_secs: u64 = get_env_default("SESSION_KEY_REFRESH_SECS", 60);
        let null_handling: String = get_env_default("SESSION_NULL_HANDLING", String::new());

        let null_handling = if null_handling.trim().is_empty() {
            None
        } else {
            Some(
                null_handling
                    .parse::<NullHandling>()
                    .map_err(SessionError::Config)?,
            )
        };

        let config = Self {
            access_token_ttl: Duration::seconds(access_token_ttl_secs),
            refresh_token_ttl: Duration::days(refresh_token_ttl_days),
            clock_skew_seconds,
            anti_csrf,
            storage_timeout: StdDuration::from_millis(storage_timeout_ms),
            key_refresh_interval: StdDuration::from_secs(key_refresh_secs),
            null_handling,
            access_token_cookie: get_env_default(
                "SESSION_ACCESS_TOKEN_COOKIE",
                defaults.access_token_cookie,
            ),
            refresh_token_cookie: get_env_default(
                "SESSION_REFRESH_TOKEN_COOKIE",
                defaults.refresh_token_cookie,
            ),
            anti_csrf_header: get_env_default("SESSION_ANTI_CSRF_HEADER", defaults.anti_csrf_header),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SessionResult<()> {
        if !self.access_token_ttl.is_positive() {
            return Err(SessionError::Config(
                "access token ttl must be positive".into(),
            ));
        }

        if self.refresh_token_ttl <= self.access_token_ttl {
            return Err(SessionError::Config(
                "refresh token ttl must exceed access token ttl".into(),
            ));
        }

        if self.storage_timeout.is_zero() {
            return Err(SessionError::Config("storage timeout must be non-zero".into()));
        }

        if self.access_token_cookie.is_empty()
            || self.refresh_token_cookie.is_empty()
            || self.anti_csrf_header.is_empty()
        {
            return Err(SessionError::Config(
                "cookie and header names must not be empty".into(),
            ));
        }

        Ok(())
    }
}
