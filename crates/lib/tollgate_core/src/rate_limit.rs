//! Per-operation rate limiting.
//!
//! [`RateLimitBackend`] is the key-value contract (a shared counter store in
//! production). [`RateLimiter`] applies the named budgets on top of it and
//! turns exhausted budgets into [`AuthError::RateLimited`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::AuthError;
use crate::store::{StoreError, bounded};

/// Budget of `limit` hits per `window_seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub limit: u32,
    pub window_seconds: u64,
}

impl RateLimitRule {
    pub fn per_hour(limit: u32) -> Self {
        Self {
            limit,
            window_seconds: 3600,
        }
    }
}

/// Budgets for each rate-limited operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// `token-create:{userId}`
    pub token_create: RateLimitRule,
    /// `failed-auth:{ip}`
    pub failed_auth: RateLimitRule,
    /// `magic-link:{email}`
    pub magic_link: RateLimitRule,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            token_create: RateLimitRule::per_hour(10),
            failed_auth: RateLimitRule::per_hour(100),
            magic_link: RateLimitRule::per_hour(3),
        }
    }
}

/// Outcome of one counted hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_epoch_seconds: i64,
}

impl RateLimitDecision {
    /// Time until the window resets, never less than one second.
    pub fn retry_after(&self, now: DateTime<Utc>) -> std::time::Duration {
        let secs = (self.reset_epoch_seconds - now.timestamp()).max(1);
        std::time::Duration::from_secs(secs.unsigned_abs())
    }

    fn into_error(self, key: String, now: DateTime<Utc>) -> AuthError {
        AuthError::RateLimited {
            key,
            limit: self.limit,
            remaining: self.remaining,
            reset_epoch_seconds: self.reset_epoch_seconds,
            retry_after: self.retry_after(now),
        }
    }
}

/// Hits counted in the open window of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitUsage {
    pub count: u32,
    /// End of the open window; `None` when no window is open.
    pub reset_epoch_seconds: Option<i64>,
}

/// Counter store contract.
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    /// Count one hit against `key` and decide whether it is within `rule`.
    async fn check_limit(
        &self,
        key: &str,
        rule: RateLimitRule,
    ) -> Result<RateLimitDecision, StoreError>;

    /// Read the open window of `key` without counting a hit.
    async fn get_usage(&self, key: &str) -> Result<RateLimitUsage, StoreError>;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: i64,
}

/// Fixed-window counters in process memory.
#[derive(Debug, Default)]
pub struct MemoryRateLimitBackend {
    windows: DashMap<String, Window>,
}

impl MemoryRateLimitBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_limit_at(
        &self,
        key: &str,
        rule: RateLimitRule,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let now_secs = now.timestamp();
        let window_secs = i64::try_from(rule.window_seconds).unwrap_or(i64::MAX);
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            reset_at: now_secs.saturating_add(window_secs),
        });
        if entry.reset_at <= now_secs {
            *entry = Window {
                count: 0,
                reset_at: now_secs.saturating_add(window_secs),
            };
        }
        entry.count = entry.count.saturating_add(1);
        RateLimitDecision {
            allowed: entry.count <= rule.limit,
            limit: rule.limit,
            remaining: rule.limit.saturating_sub(entry.count),
            reset_epoch_seconds: entry.reset_at,
        }
    }

    pub fn usage_at(&self, key: &str, now: DateTime<Utc>) -> RateLimitUsage {
        match self.windows.get(key) {
            Some(w) if w.reset_at > now.timestamp() => RateLimitUsage {
                count: w.count,
                reset_epoch_seconds: Some(w.reset_at),
            },
            _ => RateLimitUsage::default(),
        }
    }

    /// Drop closed windows.
    pub fn purge_expired(&self, now: DateTime<Utc>) {
        let now = now.timestamp();
        self.windows.retain(|_, w| w.reset_at > now);
    }
}

#[async_trait]
impl RateLimitBackend for MemoryRateLimitBackend {
    async fn check_limit(
        &self,
        key: &str,
        rule: RateLimitRule,
    ) -> Result<RateLimitDecision, StoreError> {
        Ok(self.check_limit_at(key, rule, Utc::now()))
    }

    async fn get_usage(&self, key: &str) -> Result<RateLimitUsage, StoreError> {
        Ok(self.usage_at(key, Utc::now()))
    }
}

/// Lowercase and trim an email so one mailbox maps to one key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub struct RateLimiter {
    backend: Arc<dyn RateLimitBackend>,
    policy: RateLimitPolicy,
    timeout: std::time::Duration,
}

impl RateLimiter {
    pub fn new(
        backend: Arc<dyn RateLimitBackend>,
        policy: RateLimitPolicy,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            backend,
            policy,
            timeout,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Count a token creation for `user_id`.
    pub async fn check_token_creation(&self, user_id: &str) -> Result<RateLimitDecision, AuthError> {
        self.enforce(format!("token-create:{user_id}"), self.policy.token_create)
            .await
    }

    /// Count a magic-link request for `email`.
    pub async fn check_magic_link(&self, email: &str) -> Result<RateLimitDecision, AuthError> {
        self.enforce(
            format!("magic-link:{}", normalize_email(email)),
            self.policy.magic_link,
        )
        .await
    }

    /// Count one failed authentication from `ip`, whatever the cause.
    pub async fn record_failed_auth(&self, ip: &str) -> Result<RateLimitDecision, AuthError> {
        bounded(
            self.timeout,
            "rate_limit_check",
            self.backend
                .check_limit(&failed_auth_key(ip), self.policy.failed_auth),
        )
        .await
    }

    /// Refuse further attempts from `ip` once its failure budget is spent.
    /// Reads the counter without counting a hit.
    pub async fn ensure_failed_auth_budget(&self, ip: &str) -> Result<(), AuthError> {
        let key = failed_auth_key(ip);
        let usage = bounded(self.timeout, "rate_limit_usage", self.backend.get_usage(&key)).await?;
        let rule = self.policy.failed_auth;
        if usage.count < rule.limit {
            return Ok(());
        }
        let now = Utc::now();
        let decision = RateLimitDecision {
            allowed: false,
            limit: rule.limit,
            remaining: 0,
            reset_epoch_seconds: usage
                .reset_epoch_seconds
                .unwrap_or_else(|| now.timestamp() + rule.window_seconds as i64),
        };
        Err(decision.into_error(key, now))
    }

    async fn enforce(
        &self,
        key: String,
        rule: RateLimitRule,
    ) -> Result<RateLimitDecision, AuthError> {
        let decision = bounded(
            self.timeout,
            "rate_limit_check",
            self.backend.check_limit(&key, rule),
        )
        .await?;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(decision.into_error(key, Utc::now()))
        }
    }
}

fn failed_auth_key(ip: &str) -> String {
    format!("failed-auth:{ip}")
}
