use std::fmt;

use thiserror::Error;

/// Development-only signing secret. Anyone who knows it can forge session tokens.
pub const DEFAULT_DEV_SECRET: &str = "default-secret-key";

/// Session tokens are accepted for 24 hours after issuance.
pub const TOKEN_MAX_AGE_MS: i64 = 86_400_000;

/// Authorization codes must be exchanged within 10 minutes.
pub const AUTHORIZATION_CODE_MAX_AGE_MS: i64 = 10 * 60 * 1000;

/// Stored Slack tokens are retained for 30 days.
pub const CREDENTIAL_TTL_SECS: u64 = 86_400 * 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("OAUTH_SECRET_KEY must be set when APP_ENV=production")]
    MissingSecretInProduction,
}

/// Process-wide auth configuration, built once at startup and injected
/// into the token codec and the HTTP state.
#[derive(Clone)]
pub struct AuthConfig {
    secret_key: String,
    pub token_max_age_ms: i64,
    pub authorization_code_max_age_ms: i64,
    pub credential_ttl_secs: u64,
    pub using_default_secret: bool,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret_key", &"<redacted>")
            .field("token_max_age_ms", &self.token_max_age_ms)
            .field(
                "authorization_code_max_age_ms",
                &self.authorization_code_max_age_ms,
            )
            .field("credential_ttl_secs", &self.credential_ttl_secs)
            .field("using_default_secret", &self.using_default_secret)
            .finish()
    }
}

impl AuthConfig {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            token_max_age_ms: TOKEN_MAX_AGE_MS,
            authorization_code_max_age_ms: AUTHORIZATION_CODE_MAX_AGE_MS,
            credential_ttl_secs: CREDENTIAL_TTL_SECS,
            using_default_secret: false,
        }
    }

    /// Read `OAUTH_SECRET_KEY` and `APP_ENV` from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let production = std::env::var("APP_ENV")
            .map(|v| v.trim().eq_ignore_ascii_case("production"))
            .unwrap_or(false);
        Self::from_values(std::env::var("OAUTH_SECRET_KEY").ok(), production)
    }

    /// Resolve the signing secret. A missing or blank secret falls back to
    /// [`DEFAULT_DEV_SECRET`] outside production and is refused in production.
    pub fn from_values(secret_key: Option<String>, production: bool) -> Result<Self, ConfigError> {
        let secret_key = secret_key
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        match secret_key {
            Some(secret) => Ok(Self::new(secret)),
            None if production => Err(ConfigError::MissingSecretInProduction),
            None => {
                tracing::warn!(
                    event = "default_signing_secret",
                    "OAUTH_SECRET_KEY is not set; using the built-in development secret. \
                     Session tokens can be forged by anyone who knows it."
                );
                let mut config = Self::new(DEFAULT_DEV_SECRET);
                config.using_default_secret = true;
                Ok(config)
            }
        }
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}
