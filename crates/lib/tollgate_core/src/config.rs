//! Authentication core configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Duration;
use tracing::{info, warn};

use crate::ids::random_urlsafe;
use crate::rate_limit::{RateLimitPolicy, RateLimitRule};

/// Access token lifetime: 15 minutes.
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;

/// Refresh token lifetime: 30 days.
pub const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 30;

/// Hard cap on any session: 90 days.
pub const DEFAULT_SESSION_ABSOLUTE_TTL_DAYS: i64 = 90;

/// Longest lifetime a caller may request for a personal access token.
pub const DEFAULT_MAX_TOKEN_LIFETIME_DAYS: i64 = 366;

/// Clock skew tolerated when checking access token expiry.
pub const DEFAULT_LEEWAY_SECS: u64 = 30;

/// Upper bound on every store or key-value call.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;

/// Lifetime of an unexchanged OAuth authorization code: 10 minutes.
pub const DEFAULT_AUTHORIZATION_CODE_TTL_SECS: u64 = 600;

/// Configuration for the authentication core.
#[derive(Clone)]
pub struct AuthConfig {
    /// `iss` claim written into and required from access tokens.
    pub issuer: String,
    /// `aud` claim written into and required from access tokens.
    pub audience: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub session_absolute_ttl: Duration,
    pub max_token_lifetime: Duration,
    pub leeway_secs: u64,
    pub store_timeout: std::time::Duration,
    pub authorization_code_ttl: std::time::Duration,
    /// Key id stamped into new hash envelopes.
    pub token_hash_key_id: String,
    /// HMAC key for token secrets.
    pub token_hash_secret: String,
    /// Retired hashing keys still accepted for verification, as (kid, secret).
    pub previous_token_hash_keys: Vec<(String, String)>,
    /// URL-safe base64 of the 32-byte Ed25519 seed for the initial signing key.
    pub signing_key_seed: Option<String>,
    pub rate_limits: RateLimitPolicy,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("session_absolute_ttl", &self.session_absolute_ttl)
            .field("max_token_lifetime", &self.max_token_lifetime)
            .field("leeway_secs", &self.leeway_secs)
            .field("store_timeout", &self.store_timeout)
            .field("token_hash_key_id", &self.token_hash_key_id)
            .field("token_hash_secret", &"<redacted>")
            .field("signing_key_seed", &self.signing_key_seed.as_ref().map(|_| "<redacted>"))
            .field("rate_limits", &self.rate_limits)
            .finish()
    }
}

impl AuthConfig {
    /// Config with default lifetimes and budgets.
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        token_hash_secret: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            access_token_ttl: Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECS),
            refresh_token_ttl: Duration::days(DEFAULT_REFRESH_TOKEN_TTL_DAYS),
            session_absolute_ttl: Duration::days(DEFAULT_SESSION_ABSOLUTE_TTL_DAYS),
            max_token_lifetime: Duration::days(DEFAULT_MAX_TOKEN_LIFETIME_DAYS),
            leeway_secs: DEFAULT_LEEWAY_SECS,
            store_timeout: std::time::Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            authorization_code_ttl: std::time::Duration::from_secs(
                DEFAULT_AUTHORIZATION_CODE_TTL_SECS,
            ),
            token_hash_key_id: "h1".into(),
            token_hash_secret: token_hash_secret.into(),
            previous_token_hash_keys: Vec::new(),
            signing_key_seed: None,
            rate_limits: RateLimitPolicy::default(),
        }
    }

    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                     | Default                              |
    /// |------------------------------|--------------------------------------|
    /// | `AUTH_ISSUER`                | `https://auth.tollgate.local`        |
    /// | `AUTH_AUDIENCE`              | `tollgate-api`                       |
    /// | `ACCESS_TOKEN_TTL_SECS`      | `900`                                |
    /// | `REFRESH_TOKEN_TTL_DAYS`     | `30`                                 |
    /// | `SESSION_ABSOLUTE_TTL_DAYS`  | `90`                                 |
    /// | `STORE_TIMEOUT_MS`           | `5000`                               |
    /// | `TOKEN_HASH_KEY_ID`          | `h1`                                 |
    /// | `TOKEN_HASH_SECRET`          | generated & persisted to file        |
    /// | `TOKEN_HASH_PREVIOUS_KEYS`   | empty (`kid:secret,kid:secret`)      |
    /// | `SIGNING_KEY_SEED`           | generated & persisted to file        |
    /// | `RATE_LIMIT_TOKEN_CREATE`    | `10` per hour                        |
    /// | `RATE_LIMIT_FAILED_AUTH`     | `100` per hour                       |
    /// | `RATE_LIMIT_MAGIC_LINK`      | `3` per hour                         |
    pub fn from_env() -> Self {
        let data_dir = secrets_dir();
        let mut config = Self::new(
            env_or("AUTH_ISSUER", "https://auth.tollgate.local"),
            env_or("AUTH_AUDIENCE", "tollgate-api"),
            resolve_secret("TOKEN_HASH_SECRET", &data_dir.join("token-hash-secret")),
        );
        config.access_token_ttl =
            Duration::seconds(env_parse("ACCESS_TOKEN_TTL_SECS", DEFAULT_ACCESS_TOKEN_TTL_SECS));
        config.refresh_token_ttl =
            Duration::days(env_parse("REFRESH_TOKEN_TTL_DAYS", DEFAULT_REFRESH_TOKEN_TTL_DAYS));
        config.session_absolute_ttl = Duration::days(env_parse(
            "SESSION_ABSOLUTE_TTL_DAYS",
            DEFAULT_SESSION_ABSOLUTE_TTL_DAYS,
        ));
        config.store_timeout = std::time::Duration::from_millis(env_parse(
            "STORE_TIMEOUT_MS",
            DEFAULT_STORE_TIMEOUT_MS,
        ));
        config.token_hash_key_id = env_or("TOKEN_HASH_KEY_ID", "h1");
        config.previous_token_hash_keys = std::env::var("TOKEN_HASH_PREVIOUS_KEYS")
            .map(|raw| parse_key_list(&raw))
            .unwrap_or_default();
        config.signing_key_seed = Some(resolve_secret(
            "SIGNING_KEY_SEED",
            &data_dir.join("signing-key-seed"),
        ));
        config.rate_limits = RateLimitPolicy {
            token_create: RateLimitRule::per_hour(env_parse(
                "RATE_LIMIT_TOKEN_CREATE",
                config.rate_limits.token_create.limit,
            )),
            failed_auth: RateLimitRule::per_hour(env_parse(
                "RATE_LIMIT_FAILED_AUTH",
                config.rate_limits.failed_auth.limit,
            )),
            magic_link: RateLimitRule::per_hour(env_parse(
                "RATE_LIMIT_MAGIC_LINK",
                config.rate_limits.magic_link.limit,
            )),
        };
        config
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => raw.parse().unwrap_or_else(|_| {
            warn!(name, value = %raw, %default, "unparseable config value, using default");
            default
        }),
        _ => default,
    }
}

/// Parse `kid:secret,kid:secret`.
fn parse_key_list(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (kid, secret) = pair.trim().split_once(':')?;
            if kid.is_empty() || secret.is_empty() {
                return None;
            }
            Some((kid.to_string(), secret.to_string()))
        })
        .collect()
}

/// Resolve a secret: env var → persisted file → generated and persisted.
pub fn resolve_secret(env_var: &str, path: &Path) -> String {
    if let Ok(secret) = std::env::var(env_var)
        && !secret.is_empty()
    {
        return secret;
    }
    if let Ok(existing) = std::fs::read_to_string(path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret = random_urlsafe(32);
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = std::fs::write(path, &secret) {
        warn!(path = %path.display(), "could not persist generated secret: {e}");
    } else {
        info!(env_var, path = %path.display(), "generated new secret");
    }
    secret
}

/// Directory holding persisted secrets.
fn secrets_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tollgate")
}
