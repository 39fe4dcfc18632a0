use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::api::latency::LatencyStats;
use crate::client::{ApiRequest, ClientState, Executor, RequestQueue};
use crate::config::ClientConfig;
use crate::error::{ApiError, ApiErrorKind, AppError, Result};
use crate::types::{
    AuditEvent, Endpoint, Fundamental, HealthStatus, Instrument, OptionContract, Quote, UserInfo,
};

static SHARED: OnceLock<(ClientConfig, Arc<OpLabClient>)> = OnceLock::new();

/// Server-side pre-filters for `POST /instruments`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentQuery {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub sectors: Vec<String>,
    pub min_volume: Option<f64>,
}

impl InstrumentQuery {
    fn to_body(&self) -> Value {
        json!({
            "minPrice": self.min_price,
            "maxPrice": self.max_price,
            "sectors": self.sectors,
            "liquidity": self.min_volume,
        })
    }
}

/// Typed client for the OpLab-style data API.
///
/// Every call goes through a single FIFO queue; cache, token and TTLs live in
/// a [`ClientState`] shared with the queue worker.
pub struct OpLabClient {
    queue: RequestQueue<Executor>,
    state: Arc<ClientState>,
}

impl OpLabClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Like [`OpLabClient::new`], additionally emitting one [`AuditEvent`]
    /// per executed request on `audit_tx`.
    pub fn with_audit(config: &ClientConfig, audit_tx: mpsc::Sender<AuditEvent>) -> Result<Self> {
        Self::build(config, Some(audit_tx))
    }

    /// Process-wide instance. The first caller's configuration wins; later
    /// callers passing a different one get a warning and the existing client.
    pub fn shared(config: &ClientConfig) -> Result<Arc<Self>> {
        let (first, client) = match SHARED.get() {
            Some(entry) => entry,
            None => {
                let client = Arc::new(Self::new(config)?);
                SHARED.get_or_init(|| (config.clone(), client))
            }
        };
        if first != config {
            warn!(
                shared_base_url = %first.base_url,
                requested_base_url = %config.base_url,
                "[CLIENT] shared client already configured, ignoring new configuration"
            );
        }
        Ok(Arc::clone(client))
    }

    fn build(config: &ClientConfig, audit_tx: Option<mpsc::Sender<AuditEvent>>) -> Result<Self> {
        let state = Arc::new(ClientState::new(config, audit_tx));
        let executor = Executor::new(config, Arc::clone(&state))?;
        info!(
            base_url = %config.base_url,
            token_set = config.token.is_some(),
            "[CLIENT] OpLab client ready"
        );
        Ok(Self {
            queue: RequestQueue::new(executor, config.request_spacing),
            state,
        })
    }

    // -----------------------------------------------------------------------
    // Data endpoints
    // -----------------------------------------------------------------------

    pub async fn get_instruments(&self, query: &InstrumentQuery) -> std::result::Result<Vec<Instrument>, ApiError> {
        let request = ApiRequest::post(Endpoint::Instruments, Endpoint::Instruments.path(), query.to_body());
        let value = self.queue.enqueue(request).await?;
        decode_list(unwrap_envelope(value, "instruments"), "instruments")
    }

    pub async fn get_quotes(&self, symbols: &[String]) -> std::result::Result<Vec<Quote>, ApiError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let request = ApiRequest::post(Endpoint::Quotes, Endpoint::Quotes.path(), json!({ "symbols": symbols }));
        let value = self.queue.enqueue(request).await?;
        decode_list(unwrap_envelope(value, "quotes"), "quotes")
    }

    pub async fn get_fundamentals(&self, symbol: &str) -> std::result::Result<Fundamental, ApiError> {
        let symbol = symbol.trim();
        let path = format!("{}/{}", Endpoint::Fundamentals.path(), symbol);
        let value = self.queue.enqueue(ApiRequest::get(Endpoint::Fundamentals, path)).await?;
        let mut fundamental: Fundamental = decode(unwrap_envelope(value, "fundamentals"), "fundamentals")?;
        if fundamental.symbol.is_empty() {
            fundamental.symbol = symbol.to_string();
        }
        Ok(fundamental)
    }

    /// Option chain for `symbol`. `filters` are merged into the request body
    /// next to the symbol.
    pub async fn get_options(
        &self,
        symbol: &str,
        filters: &Map<String, Value>,
    ) -> std::result::Result<Vec<OptionContract>, ApiError> {
        let mut body = filters.clone();
        body.insert("symbol".to_string(), Value::String(symbol.trim().to_string()));
        let request = ApiRequest::post(Endpoint::Options, Endpoint::Options.path(), Value::Object(body));
        let value = self.queue.enqueue(request).await?;
        decode_list(unwrap_envelope(value, "options"), "options")
    }

    pub async fn get_user(&self) -> std::result::Result<UserInfo, ApiError> {
        let value = self
            .queue
            .enqueue(ApiRequest::get(Endpoint::User, Endpoint::User.path()))
            .await?;
        decode(unwrap_envelope(value, "user"), "user")
    }

    pub async fn check_health(&self) -> std::result::Result<HealthStatus, ApiError> {
        let value = self
            .queue
            .enqueue(ApiRequest::get(Endpoint::Health, Endpoint::Health.path()))
            .await?;
        decode(value, "health")
    }

    // -----------------------------------------------------------------------
    // Token and cache management
    // -----------------------------------------------------------------------

    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        let token = token.trim();
        if token.is_empty() {
            self.clear_token();
            return;
        }
        // switching principals purges the cache
        if self.state.set_token(Some(token.to_string())) {
            self.state.clear_cache();
            info!("[AUTH] token set, cache purged");
        }
    }

    /// Forget the token and every cached response fetched with it.
    pub fn clear_token(&self) {
        self.state.clear_principal();
        info!("[AUTH] token cleared, cache purged");
    }

    pub fn token(&self) -> Option<String> {
        self.state.token()
    }

    /// Change how long responses from `endpoint` stay cached. Zero disables
    /// caching for that endpoint; entries already cached keep their expiry.
    pub fn set_refresh_interval(&self, endpoint: &str, ms: i64) -> Result<()> {
        let Some(target) = Endpoint::from_name(endpoint) else {
            return Err(AppError::validation(format!("unknown endpoint '{endpoint}'")));
        };
        if ms < 0 {
            return Err(AppError::validation(format!(
                "refresh interval for '{target}' must not be negative"
            )));
        }
        self.state.set_ttl(target, Duration::from_millis(ms as u64));
        info!(endpoint = %target, ttl_ms = ms, "[CACHE] refresh interval updated");
        Ok(())
    }

    pub fn refresh_intervals(&self) -> Vec<(Endpoint, Duration)> {
        self.state.ttls()
    }

    pub fn clear_cache(&self) {
        self.state.clear_cache();
    }

    pub fn cache_len(&self) -> usize {
        self.state.cache_len()
    }

    pub fn pending_requests(&self) -> usize {
        self.queue.pending_len()
    }

    pub fn latency(&self) -> &LatencyStats {
        self.state.latency()
    }
}

/// Upstream responses come either wrapped (`{"quotes": [...]}`) or bare.
pub fn unwrap_envelope(value: Value, field: &str) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key(field) => map.remove(field).unwrap_or(Value::Null),
        other => other,
    }
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> std::result::Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| malformed(what, e))
}

/// Decodes an array element by element; records that fail to decode are
/// skipped rather than failing the whole list.
fn decode_list<T: DeserializeOwned>(value: Value, what: &str) -> std::result::Result<Vec<T>, ApiError> {
    let Value::Array(items) = value else {
        return Err(ApiError::new(
            ApiErrorKind::Api,
            format!("unexpected {what} payload: expected an array"),
            200,
        ));
    };
    let total = items.len();
    let decoded: Vec<T> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("[CLIENT] skipping malformed {what} record: {e}");
                None
            }
        })
        .collect();
    if decoded.len() < total {
        warn!(kept = decoded.len(), total, "[CLIENT] dropped malformed {what} records");
    }
    Ok(decoded)
}

fn malformed(what: &str, e: serde_json::Error) -> ApiError {
    ApiError::new(ApiErrorKind::Api, format!("unexpected {what} payload: {e}"), 200)
}
