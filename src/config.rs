use std::time::Duration;

use crate::error::{AppError, Result};
use crate::types::Endpoint;

pub const OPLAB_API_URL: &str = "http://localhost:5000/api";

/// Request header carrying the bearer token. The server may answer with a
/// rotated value under the same header name.
pub const TOKEN_HEADER: &str = "x-oplab-token";

/// Hard deadline for a single HTTP attempt.
pub const REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Attempts per request, counting the first one. Only 5xx responses are retried.
pub const RETRY_ATTEMPTS: u32 = 3;

/// Base retry delay; attempt `n` waits `n * RETRY_DELAY_MS` before the next try.
pub const RETRY_DELAY_MS: u64 = 1_000;

/// Pause the queue worker takes after each request before dequeuing the next.
pub const REQUEST_SPACING_MS: u64 = 100;

/// Default cache TTL for data endpoints (15 minutes).
pub const DEFAULT_CACHE_TTL_MS: u64 = 15 * 60 * 1_000;

/// Channel capacity for the audit writer.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Volume tiers used by the option-liquidity estimate.
pub mod liquidity_tiers {
    pub const HIGH: f64 = 1_000_000.0;
    pub const MEDIUM: f64 = 500_000.0;
    pub const LOW: f64 = 100_000.0;
}

/// Settings for the OpLab client: transport, retry policy and per-endpoint TTLs.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub request_spacing: Duration,
    /// (endpoint, ttl) pairs. Zero disables caching for that endpoint.
    pub cache_ttls: Vec<(Endpoint, Duration)>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: Duration::from_millis(REQUEST_TIMEOUT_MS),
            retry_attempts: RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
            request_spacing: Duration::from_millis(REQUEST_SPACING_MS),
            cache_ttls: default_cache_ttls(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let mut cache_ttls = Vec::with_capacity(Endpoint::ALL.len());
        for (endpoint, default) in default_cache_ttls() {
            let var = format!("CACHE_TTL_{}_MS", endpoint.name().to_uppercase());
            let ttl = env_u64(&var, default.as_millis() as u64)?;
            cache_ttls.push((endpoint, Duration::from_millis(ttl)));
        }

        Ok(Self {
            base_url: std::env::var("OPLAB_API_URL").unwrap_or_else(|_| OPLAB_API_URL.to_string()),
            token: std::env::var("OPLAB_TOKEN").ok().filter(|t| !t.trim().is_empty()),
            timeout: Duration::from_millis(env_u64("REQUEST_TIMEOUT_MS", REQUEST_TIMEOUT_MS)?),
            retry_attempts: env_u64("RETRY_ATTEMPTS", u64::from(RETRY_ATTEMPTS))?.max(1) as u32,
            retry_delay: Duration::from_millis(env_u64("RETRY_DELAY_MS", RETRY_DELAY_MS)?),
            request_spacing: Duration::from_millis(env_u64("REQUEST_SPACING_MS", REQUEST_SPACING_MS)?),
            cache_ttls,
        })
    }
}

/// Health checks are never cached; every other endpoint keeps data for 15 minutes.
pub fn default_cache_ttls() -> Vec<(Endpoint, Duration)> {
    Endpoint::ALL
        .iter()
        .map(|&endpoint| {
            let ttl = match endpoint {
                Endpoint::Health => Duration::ZERO,
                _ => Duration::from_millis(DEFAULT_CACHE_TTL_MS),
            };
            (endpoint, ttl)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Config {
    pub client: ClientConfig,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Serve the labelled demo dataset when the data API is unreachable (DEMO_FALLBACK).
    pub demo_fallback: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            client: ClientConfig::from_env()?,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "screener.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            demo_fallback: std::env::var("DEMO_FALLBACK")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(true),
        })
    }
}

fn env_u64(var: &str, default: u64) -> Result<u64> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| AppError::Config(format!("{var} must be a non-negative integer"))),
        Err(_) => Ok(default),
    }
}
