use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue};
use chrono::{Duration, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RateLimitPolicy;
use crate::services::supabase::{SupabaseClient, SupabaseError};

pub mod headers {
    pub const X_RATE_LIMIT_LIMIT: &str = "X-RateLimit-Limit";
    pub const X_RATE_LIMIT_REMAINING: &str = "X-RateLimit-Remaining";
    pub const X_RATE_LIMIT_RESET: &str = "X-RateLimit-Reset";
    pub const RETRY_AFTER: &str = "Retry-After";
}

/// Forwarded-address headers in the order they are trusted.
const ORIGIN_HEADERS: &[&str] = &["cf-connecting-ip", "x-real-ip", "x-forwarded-for"];

const RATE_LIMIT_RPC: &str = "rate_limit_request";

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("rate limit RPC failed: {0}")]
    Rpc(#[from] SupabaseError),
    #[error("rate limit counter failed: {0}")]
    Redis(#[from] RedisError),
    #[error("rate limit RPC returned no decision")]
    EmptyResponse,
}

/// Quota state reported by the counter store for one hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub remaining: i64,
    #[serde(default)]
    pub reset_at: Option<String>,
    #[serde(default)]
    pub retry_after: Option<u64>,
}

/// Outcome of a rate-limit check. `Indeterminate` means the counter store
/// could not be consulted and the request is let through.
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitDecision {
    Decided(RateLimitStatus),
    Indeterminate,
}

impl RateLimitDecision {
    pub fn allowed(&self) -> bool {
        match self {
            Self::Decided(status) => status.allowed,
            Self::Indeterminate => true,
        }
    }

    /// `-1` when the quota is unknown.
    pub fn remaining(&self) -> i64 {
        match self {
            Self::Decided(status) => status.remaining,
            Self::Indeterminate => -1,
        }
    }

    pub fn status(&self) -> Option<&RateLimitStatus> {
        match self {
            Self::Decided(status) => Some(status),
            Self::Indeterminate => None,
        }
    }
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Records one request for `(identifier, endpoint)` and reports the quota.
    async fn hit(&self, identifier: &str, endpoint: &str) -> Result<RateLimitStatus, RateLimitError>;
}

#[derive(Serialize)]
struct RateLimitParams<'a> {
    p_identifier: &'a str,
    p_endpoint: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RateLimitPayload {
    One(RateLimitStatus),
    Many(Vec<RateLimitStatus>),
}

/// Counter store backed by the shared `rate_limit_request` stored procedure.
pub struct SupabaseRateLimitStore {
    supabase: SupabaseClient,
}

impl SupabaseRateLimitStore {
    pub fn new(supabase: SupabaseClient) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl RateLimitStore for SupabaseRateLimitStore {
    async fn hit(&self, identifier: &str, endpoint: &str) -> Result<RateLimitStatus, RateLimitError> {
        let params = RateLimitParams {
            p_identifier: identifier,
            p_endpoint: endpoint,
        };

        match self.supabase.rpc(RATE_LIMIT_RPC, &params).await? {
            RateLimitPayload::One(status) => Ok(status),
            RateLimitPayload::Many(rows) => rows.into_iter().next().ok_or(RateLimitError::EmptyResponse),
        }
    }
}

/// Fixed-window counter in Redis, used when the RPC store is not configured.
pub struct RedisRateLimitStore {
    redis: ConnectionManager,
    max_requests: u32,
    window_secs: u64,
}

impl RedisRateLimitStore {
    pub fn new(redis: ConnectionManager, policy: &RateLimitPolicy) -> Self {
        Self {
            redis,
            max_requests: policy.max_requests,
            window_secs: policy.window_secs.max(1),
        }
    }

    fn counter_key(identifier: &str, endpoint: &str) -> String {
        format!("ratelimit:{}:{}", endpoint, identifier)
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn hit(&self, identifier: &str, endpoint: &str) -> Result<RateLimitStatus, RateLimitError> {
        let key = Self::counter_key(identifier, endpoint);
        let mut redis = self.redis.clone();
        let window = self.window_secs as i64;

        let count: u64 = redis.incr(&key, 1u64).await?;
        let mut ttl: i64 = redis.ttl(&key).await?;
        if count == 1 || ttl < 0 {
            let _: () = redis.expire(&key, window).await?;
            ttl = window;
        }

        Ok(window_status(count, self.max_requests, ttl as u64))
    }
}

fn window_status(count: u64, max_requests: u32, ttl_secs: u64) -> RateLimitStatus {
    let allowed = count <= u64::from(max_requests);
    let reset_at = Utc::now() + Duration::seconds(ttl_secs as i64);

    RateLimitStatus {
        allowed,
        remaining: i64::from(max_requests) - count as i64,
        reset_at: Some(reset_at.to_rfc3339()),
        retry_after: if allowed { None } else { Some(ttl_secs) },
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Option<Arc<dyn RateLimitStore>>,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, policy: RateLimitPolicy) -> Self {
        Self {
            store: Some(store),
            policy,
        }
    }

    /// Every check is `Indeterminate`.
    pub fn disabled(policy: RateLimitPolicy) -> Self {
        Self { store: None, policy }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Fails open: any store error becomes `Indeterminate`.
    pub async fn check(&self, identifier: &str, endpoint: &str) -> RateLimitDecision {
        let Some(store) = &self.store else {
            return RateLimitDecision::Indeterminate;
        };

        match store.hit(identifier, endpoint).await {
            Ok(status) => RateLimitDecision::Decided(status),
            Err(e) => {
                tracing::error!(error = %e, endpoint, "rate limit check failed, allowing request");
                RateLimitDecision::Indeterminate
            }
        }
    }
}

/// Resolves the counter key for a caller: authenticated user first, then the
/// first forwarded-address header present, then `ip:unknown`.
pub fn identify(request_headers: &HeaderMap, user_id: Option<&str>) -> String {
    if let Some(id) = user_id.filter(|id| !id.is_empty()) {
        return format!("user:{}", id);
    }

    let ip = ORIGIN_HEADERS
        .iter()
        .filter_map(|name| request_headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(',').next())
        .map(str::trim)
        .find(|ip| !ip.is_empty())
        .unwrap_or("unknown");

    format!("ip:{}", ip)
}

pub fn rate_limit_headers(status: &RateLimitStatus, limit: u32) -> HeaderMap {
    let mut map = HeaderMap::new();

    map.insert(headers::X_RATE_LIMIT_LIMIT, HeaderValue::from(limit));
    map.insert(headers::X_RATE_LIMIT_REMAINING, HeaderValue::from(status.remaining.max(0)));

    let reset = status
        .reset_at
        .as_deref()
        .and_then(|r| HeaderValue::from_str(r).ok())
        .unwrap_or_else(|| HeaderValue::from_static(""));
    map.insert(headers::X_RATE_LIMIT_RESET, reset);

    if let Some(retry_after) = status.retry_after.filter(|s| *s > 0) {
        map.insert(headers::RETRY_AFTER, HeaderValue::from(retry_after));
    }

    map
}
