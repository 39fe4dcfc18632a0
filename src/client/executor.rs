use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::latency::LatencyStats;
use crate::client::{ApiRequest, CacheKey, Dispatch, ResponseCache};
use crate::config::{ClientConfig, TOKEN_HEADER};
use crate::error::{ApiError, ApiErrorKind, Result};
use crate::types::{AuditEvent, Endpoint};

// ---------------------------------------------------------------------------
// Shared client state
// ---------------------------------------------------------------------------

/// State shared between the client façade and the queue worker: the bearer
/// token, the response cache, per-endpoint TTLs and instrumentation.
///
/// `generation` moves whenever the principal changes. A response that was
/// requested under an older generation may still reach its caller but never
/// touches the token or the cache.
pub struct ClientState {
    token: RwLock<Option<String>>,
    generation: AtomicU64,
    cache: Mutex<ResponseCache>,
    ttls: DashMap<Endpoint, Duration>,
    latency: LatencyStats,
    audit_tx: Option<mpsc::Sender<AuditEvent>>,
}

impl ClientState {
    pub fn new(config: &ClientConfig, audit_tx: Option<mpsc::Sender<AuditEvent>>) -> Self {
        let ttls = DashMap::new();
        for (endpoint, ttl) in &config.cache_ttls {
            ttls.insert(*endpoint, *ttl);
        }
        Self {
            token: RwLock::new(config.token.clone()),
            generation: AtomicU64::new(0),
            cache: Mutex::new(ResponseCache::new()),
            ttls,
            latency: LatencyStats::new(),
            audit_tx,
        }
    }

    pub fn token(&self) -> Option<String> {
        match self.token.read() {
            Ok(t) => t.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the token. Returns true, and starts a new generation, when the
    /// value actually changed.
    pub fn set_token(&self, token: Option<String>) -> bool {
        let mut slot = self.token.write().unwrap_or_else(|p| p.into_inner());
        if *slot == token {
            return false;
        }
        *slot = token;
        self.generation.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Drop the token and the cache and start a new generation, even when no
    /// token was set, so in-flight responses cannot repopulate the cache.
    pub fn clear_principal(&self) {
        {
            let mut slot = self.token.write().unwrap_or_else(|p| p.into_inner());
            *slot = None;
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.cache().clear();
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Adopt a server-rotated token, unless the principal changed since
    /// `generation` was read. Rotation keeps the generation.
    pub fn adopt_token(&self, token: String, generation: u64) -> bool {
        let mut slot = self.token.write().unwrap_or_else(|p| p.into_inner());
        if self.generation() != generation {
            return false;
        }
        if slot.as_deref() == Some(token.as_str()) {
            return false;
        }
        *slot = Some(token);
        true
    }

    pub fn ttl(&self, endpoint: Endpoint) -> Duration {
        self.ttls.get(&endpoint).map(|t| *t).unwrap_or(Duration::ZERO)
    }

    pub fn set_ttl(&self, endpoint: Endpoint, ttl: Duration) {
        self.ttls.insert(endpoint, ttl);
    }

    pub fn ttls(&self) -> Vec<(Endpoint, Duration)> {
        Endpoint::ALL.iter().map(|&e| (e, self.ttl(e))).collect()
    }

    pub fn cache_get(&self, key: &CacheKey) -> Option<Value> {
        self.cache().get(key)
    }

    /// Store only if no principal change happened since `generation`.
    pub fn cache_put_if_current(&self, key: CacheKey, value: Value, ttl: Duration, generation: u64) -> bool {
        let mut cache = self.cache();
        if self.generation() != generation {
            return false;
        }
        cache.put(key, value, ttl);
        true
    }

    pub fn clear_cache(&self) {
        self.cache().clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache().len()
    }

    pub fn latency(&self) -> &LatencyStats {
        &self.latency
    }

    fn cache(&self) -> MutexGuard<'_, ResponseCache> {
        self.cache.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(tx) = &self.audit_tx {
            if let Err(e) = tx.try_send(event) {
                warn!("[AUDIT] channel full or closed, event dropped: {e}");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Performs one logical request: cache read-through, then up to
/// `retry_attempts` HTTP attempts each under a hard deadline.
pub struct Executor {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
    state: Arc<ClientState>,
}

impl Executor {
    pub fn new(config: &ClientConfig, state: Arc<ClientState>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: config.retry_delay,
            state,
        })
    }

    pub fn state(&self) -> &Arc<ClientState> {
        &self.state
    }

    pub async fn execute(&self, request: ApiRequest) -> std::result::Result<Value, ApiError> {
        let started = Instant::now();
        let key = request.cache_key();
        let generation = self.state.generation();

        if let Some(hit) = self.state.cache_get(&key) {
            debug!(endpoint = %request.endpoint, path = %request.path, "[CACHE] hit");
            self.audit(&request, started, 200, true, 0, None);
            return Ok(hit);
        }

        let mut attempt = 0u32;
        let outcome = loop {
            attempt += 1;
            let attempt_started = Instant::now();
            let result = self.attempt(&request, generation).await;
            self.state.latency.record(attempt_started.elapsed());

            match result {
                Err(e) if e.kind == ApiErrorKind::Server && attempt < self.retry_attempts => {
                    let delay = self.retry_delay * attempt;
                    warn!(
                        endpoint = %request.endpoint,
                        status = e.status,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "[EXEC] server error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => break other,
            }
        };

        match outcome {
            Ok((status, value)) => {
                let ttl = self.state.ttl(request.endpoint);
                if !self.state.cache_put_if_current(key, value.clone(), ttl, generation) {
                    debug!(endpoint = %request.endpoint, "[CACHE] token changed mid-request, response not cached");
                }
                self.audit(&request, started, status, false, attempt, None);
                Ok(value)
            }
            Err(e) => {
                warn!(
                    endpoint = %request.endpoint,
                    path = %request.path,
                    code = %e.code,
                    status = e.status,
                    attempts = attempt,
                    "[EXEC] request failed: {}",
                    e.message
                );
                self.audit(&request, started, e.status, false, attempt, Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn attempt(&self, request: &ApiRequest, generation: u64) -> std::result::Result<(u16, Value), ApiError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .header(ACCEPT, "application/json");
        if let Some(token) = self.state.token() {
            builder = builder.header(TOKEN_HEADER, token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status();
            let rotated = response
                .headers()
                .get(TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, rotated, body))
        };

        let (status, rotated, body) = match tokio::time::timeout(self.timeout, exchange).await {
            Err(_) => return Err(ApiError::timeout()),
            Ok(Err(e)) => return Err(classify_transport(&e)),
            Ok(Ok(parts)) => parts,
        };

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        if let Some(token) = rotated {
            if self.state.adopt_token(token, generation) {
                info!("[AUTH] adopted rotated token from response");
            }
        }

        if body.is_empty() {
            return Ok((status.as_u16(), Value::Null));
        }
        serde_json::from_slice(&body)
            .map(|value| (status.as_u16(), value))
            .map_err(|e| {
                ApiError::new(
                    ApiErrorKind::Api,
                    format!("unreadable response body: {e}"),
                    status.as_u16(),
                )
            })
    }

    fn audit(
        &self,
        request: &ApiRequest,
        started: Instant,
        status: u16,
        cache_hit: bool,
        attempts: u32,
        error: Option<String>,
    ) {
        self.state.audit(AuditEvent {
            endpoint: request.endpoint,
            method: request.method.to_string(),
            path: request.path.clone(),
            status,
            duration_ms: started.elapsed().as_secs_f64() * 1_000.0,
            cache_hit,
            attempts,
            error,
            requested_at_ms: now_ms(),
        });
    }
}

impl Dispatch for Executor {
    fn dispatch(&self, request: ApiRequest) -> impl Future<Output = std::result::Result<Value, ApiError>> + Send {
        self.execute(request)
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

fn classify_transport(e: &reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::timeout()
    } else {
        ApiError::network(e.to_string())
    }
}

/// Turns a non-2xx response into an [`ApiError`]. The body may carry
/// `message` (or `error`), `code` and `details`; anything unreadable falls
/// back to the status line.
fn classify_status(status: StatusCode, body: &[u8]) -> ApiError {
    let parsed: Option<Value> = serde_json::from_slice(body).ok();
    let field = |name: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let message = field("message").or_else(|| field("error")).unwrap_or_else(|| {
        format!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown Status")
        )
    });
    let details = parsed
        .as_ref()
        .and_then(|v| v.get("details"))
        .cloned()
        .unwrap_or(Value::Null);

    let kind = match status.as_u16() {
        401 | 403 => ApiErrorKind::Auth,
        500..=599 => ApiErrorKind::Server,
        _ => ApiErrorKind::Api,
    };

    let err = ApiError::new(kind, message, status.as_u16()).with_details(details);
    match (kind, field("code")) {
        (ApiErrorKind::Api, Some(code)) => err.with_code(code),
        _ => err,
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
