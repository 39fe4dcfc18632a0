use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::health::HealthState;
use crate::client::{InstrumentQuery, OpLabClient};
use crate::error::{ApiError, AppError, Result};
use crate::scorer::{score_candidate, ScoreWeights};
use crate::screening::export::{self, ExportFormat};
use crate::screening::fallback::{OfflineDataset, OfflineProvider};
use crate::screening::filter::{apply_filters, ScreeningFilter};
use crate::types::{DataSource, Fundamental, Instrument, Quote, ScoredResult};

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Idle,
    FetchingInstruments,
    FetchingQuotes,
    FetchingFundamentals,
    Scoring,
    Done,
    Cancelled,
    Failed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineState::Idle => "idle",
            PipelineState::FetchingInstruments => "fetching_instruments",
            PipelineState::FetchingQuotes => "fetching_quotes",
            PipelineState::FetchingFundamentals => "fetching_fundamentals",
            PipelineState::Scoring => "scoring",
            PipelineState::Done => "done",
            PipelineState::Cancelled => "cancelled",
            PipelineState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Latest state transition, tagged with the run it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub run_id: u64,
    pub state: PipelineState,
}

/// Published outcome of one completed run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreeningReport {
    pub run_id: u64,
    pub results: Vec<ScoredResult>,
    pub source: DataSource,
    pub filter: ScreeningFilter,
    pub completed_at_ms: i64,
}

#[derive(Clone)]
struct RunToken {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl RunToken {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Checkpoint after every await.
    fn ensure_active(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AppError::Superseded)
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Screener
// ---------------------------------------------------------------------------

/// Orchestrates a screening run: instruments, quotes, fundamentals, scoring.
///
/// Starting a run cancels whichever run is in flight. A cancelled run never
/// publishes; its caller gets [`AppError::Superseded`].
pub struct Screener {
    client: Arc<OpLabClient>,
    fallback: Option<Arc<dyn OfflineProvider>>,
    weights: ScoreWeights,
    health: Arc<HealthState>,
    next_run: AtomicU64,
    active: Mutex<Option<RunToken>>,
    published: RwLock<Option<Arc<ScreeningReport>>>,
    status_tx: watch::Sender<RunStatus>,
}

impl Screener {
    pub fn new(client: Arc<OpLabClient>) -> Self {
        let (status_tx, _) = watch::channel(RunStatus::default());
        Self {
            client,
            fallback: None,
            weights: ScoreWeights::default(),
            health: Arc::new(HealthState::new()),
            next_run: AtomicU64::new(1),
            active: Mutex::new(None),
            published: RwLock::new(None),
            status_tx,
        }
    }

    pub fn with_fallback(mut self, provider: Arc<dyn OfflineProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_health(mut self, health: Arc<HealthState>) -> Self {
        self.health = health;
        self
    }

    pub fn client(&self) -> &Arc<OpLabClient> {
        &self.client
    }

    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }

    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> RunStatus {
        *self.status_tx.borrow()
    }

    /// Most recently published report, if any run has completed.
    pub fn latest(&self) -> Option<Arc<ScreeningReport>> {
        self.published.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Render the latest published results.
    pub fn export_results(&self, format: ExportFormat) -> Result<String> {
        match self.latest() {
            Some(report) => export::export_results(&report, format),
            None => Err(AppError::validation("No results to export")),
        }
    }

    pub async fn run_screening(&self, filter: ScreeningFilter) -> Result<Arc<ScreeningReport>> {
        filter.validate()?;

        let run = self.begin_run();
        let started = Instant::now();
        info!(run_id = run.id, "[SCREEN] run started");

        let outcome = match self.execute(&run, &filter).await {
            Ok((results, source)) => self.publish(&run, results, source, filter),
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(report) => {
                self.health.record_run(report.results.len() as u64, report.source);
                info!(
                    run_id = run.id,
                    results = report.results.len(),
                    source = %report.source,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "[SCREEN] run complete"
                );
            }
            Err(AppError::Superseded) => {
                info!(run_id = run.id, "[SCREEN] run superseded, results discarded");
            }
            Err(e) => {
                self.health.record_run_failure();
                self.finish_failed(&run);
                warn!(run_id = run.id, "[SCREEN] run failed: {e}");
            }
        }
        outcome
    }

    fn begin_run(&self) -> RunToken {
        let run = RunToken {
            id: self.next_run.fetch_add(1, Ordering::SeqCst),
            cancelled: Arc::new(AtomicBool::new(false)),
        };
        let mut active = self.active();
        if let Some(previous) = active.replace(run.clone()) {
            previous.cancel();
            self.status_tx.send_replace(RunStatus {
                run_id: previous.id,
                state: PipelineState::Cancelled,
            });
            debug!(run_id = previous.id, superseded_by = run.id, "[SCREEN] cancelling previous run");
        }
        run
    }

    fn set_state(&self, run: &RunToken, state: PipelineState) {
        // Hold the lock so a cancelled run cannot overwrite its successor's state.
        let active = self.active();
        if active.as_ref().map(|a| a.id) == Some(run.id) && !run.is_cancelled() {
            self.status_tx.send_replace(RunStatus { run_id: run.id, state });
        }
    }

    fn publish(
        &self,
        run: &RunToken,
        results: Vec<ScoredResult>,
        source: DataSource,
        filter: ScreeningFilter,
    ) -> Result<Arc<ScreeningReport>> {
        let mut active = self.active();
        if run.is_cancelled() || active.as_ref().map(|a| a.id) != Some(run.id) {
            return Err(AppError::Superseded);
        }
        let report = Arc::new(ScreeningReport {
            run_id: run.id,
            results,
            source,
            filter,
            completed_at_ms: now_ms(),
        });
        *self.published.write().unwrap_or_else(|p| p.into_inner()) = Some(Arc::clone(&report));
        *active = None;
        self.status_tx.send_replace(RunStatus {
            run_id: run.id,
            state: PipelineState::Done,
        });
        Ok(report)
    }

    fn finish_failed(&self, run: &RunToken) {
        let mut active = self.active();
        if active.as_ref().map(|a| a.id) == Some(run.id) {
            *active = None;
            self.status_tx.send_replace(RunStatus {
                run_id: run.id,
                state: PipelineState::Failed,
            });
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<RunToken>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    async fn execute(&self, run: &RunToken, filter: &ScreeningFilter) -> Result<(Vec<ScoredResult>, DataSource)> {
        self.set_state(run, PipelineState::FetchingInstruments);
        let query = InstrumentQuery {
            min_price: filter.min_price,
            max_price: filter.max_price,
            sectors: filter.sectors.clone(),
            min_volume: Some(filter.min_volume),
        };
        let fetched = self.client.get_instruments(&query).await;
        run.ensure_active()?;
        let instruments = match fetched {
            Ok(list) => eligible_instruments(list, filter),
            Err(e) => return self.fall_back(run, filter, e),
        };
        if instruments.is_empty() {
            info!(run_id = run.id, "[SCREEN] no instruments matched, skipping quotes");
            return Ok((Vec::new(), DataSource::Live));
        }

        self.set_state(run, PipelineState::FetchingQuotes);
        let symbols: Vec<String> = instruments.iter().map(|i| i.symbol.clone()).collect();
        let fetched = self.client.get_quotes(&symbols).await;
        run.ensure_active()?;
        let quotes = match fetched {
            Ok(quotes) => liquid_quotes(quotes, &instruments, filter.min_volume),
            Err(e) => return self.fall_back(run, filter, e),
        };
        info!(
            run_id = run.id,
            instruments = instruments.len(),
            liquid = quotes.len(),
            "[FILTER] volume filter applied"
        );
        if quotes.is_empty() {
            return Ok((Vec::new(), DataSource::Live));
        }

        self.set_state(run, PipelineState::FetchingFundamentals);
        let fundamentals = self.fetch_fundamentals(run, &instruments, &quotes).await;
        run.ensure_active()?;

        self.set_state(run, PipelineState::Scoring);
        let weights = self.weights;
        let filter = filter.clone();
        let results = tokio::task::spawn_blocking(move || {
            score_all(&instruments, &quotes, &fundamentals, &filter, &weights, DataSource::Live)
        })
        .await?;
        run.ensure_active()?;
        Ok((results, DataSource::Live))
    }

    /// One logical request per symbol, all in flight together; failures are
    /// logged and the symbol dropped.
    async fn fetch_fundamentals(
        &self,
        run: &RunToken,
        instruments: &[Instrument],
        quotes: &HashMap<String, Quote>,
    ) -> HashMap<String, Fundamental> {
        let symbols: Vec<&str> = instruments
            .iter()
            .map(|i| i.symbol.as_str())
            .filter(|s| quotes.contains_key(*s))
            .collect();

        let fetches = symbols.iter().map(|&symbol| async move {
            (symbol, self.client.get_fundamentals(symbol).await)
        });

        let mut out = HashMap::with_capacity(symbols.len());
        for (symbol, result) in join_all(fetches).await {
            match result {
                Ok(fundamental) => {
                    out.insert(symbol.to_string(), fundamental);
                }
                Err(e) => {
                    warn!(run_id = run.id, symbol, code = %e.code, "[SCREEN] fundamentals unavailable, excluding: {}", e.message);
                }
            }
        }
        out
    }

    fn fall_back(
        &self,
        run: &RunToken,
        filter: &ScreeningFilter,
        error: ApiError,
    ) -> Result<(Vec<ScoredResult>, DataSource)> {
        let Some(provider) = self.fallback.as_ref().filter(|_| error.kind.is_connectivity()) else {
            return Err(error.into());
        };
        warn!(
            run_id = run.id,
            provider = provider.name(),
            code = %error.code,
            "[SCREEN] data API unreachable, serving offline dataset"
        );
        self.set_state(run, PipelineState::Scoring);
        let results = screen_offline(provider.dataset(), filter, &self.weights);
        Ok((results, DataSource::Demo))
    }
}

// ---------------------------------------------------------------------------
// Local steps, shared by live and offline runs
// ---------------------------------------------------------------------------

/// Optionable instruments in an allowed sector, first occurrence per symbol.
fn eligible_instruments(instruments: Vec<Instrument>, filter: &ScreeningFilter) -> Vec<Instrument> {
    let mut seen = std::collections::HashSet::new();
    instruments
        .into_iter()
        .filter(|i| i.supports_options && filter.allows_sector(i.sector.as_deref()))
        .filter(|i| seen.insert(i.symbol.clone()))
        .collect()
}

/// Quotes for known instruments with enough volume. Missing volume counts as zero.
fn liquid_quotes(quotes: Vec<Quote>, instruments: &[Instrument], min_volume: f64) -> HashMap<String, Quote> {
    let known: std::collections::HashSet<&str> = instruments.iter().map(|i| i.symbol.as_str()).collect();
    let mut out = HashMap::new();
    for q in quotes {
        if known.contains(q.symbol.as_str()) && q.volume.unwrap_or(0.0) >= min_volume {
            out.entry(q.symbol.clone()).or_insert(q);
        }
    }
    out
}

fn score_all(
    instruments: &[Instrument],
    quotes: &HashMap<String, Quote>,
    fundamentals: &HashMap<String, Fundamental>,
    filter: &ScreeningFilter,
    weights: &ScoreWeights,
    source: DataSource,
) -> Vec<ScoredResult> {
    let scored: Vec<ScoredResult> = instruments
        .iter()
        .filter_map(|i| {
            let quote = quotes.get(&i.symbol)?;
            let fundamental = fundamentals.get(&i.symbol)?;
            Some(score_candidate(i, quote, fundamental, filter.min_volume, weights, source))
        })
        .collect();
    apply_filters(scored, filter)
}

fn screen_offline(data: OfflineDataset, filter: &ScreeningFilter, weights: &ScoreWeights) -> Vec<ScoredResult> {
    let instruments = eligible_instruments(data.instruments, filter);
    let quotes = liquid_quotes(data.quotes, &instruments, filter.min_volume);
    let fundamentals: HashMap<String, Fundamental> = data
        .fundamentals
        .into_iter()
        .map(|f| (f.symbol.clone(), f))
        .collect();
    score_all(&instruments, &quotes, &fundamentals, filter, weights, DataSource::Demo)
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiErrorKind;
    use crate::screening::fallback::DemoDataProvider;
    use crate::test_support::{spawn_upstream, test_config};
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn history(last: f64) -> Vec<f64> {
        (0..20).map(|i| last * (0.9 + 0.005 * i as f64)).collect()
    }

    /// Upstream with three optionable names, one non-optionable name and a
    /// fundamentals endpoint that fails for BBDC4.
    fn market(hits: Arc<Mutex<Vec<String>>>) -> Router {
        let h1 = hits.clone();
        let h2 = hits.clone();
        let h3 = hits;
        Router::new()
            .route(
                "/instruments",
                post(move || {
                    let h = h1.clone();
                    async move {
                        h.lock().unwrap().push("instruments".into());
                        Json(json!({"instruments": [
                            {"symbol": "PETR4", "name": "Petrobras", "sector": "Energy"},
                            {"symbol": "WEGE3", "name": "WEG", "sector": "Industrials"},
                            {"symbol": "BBDC4", "name": "Bradesco", "sector": "Financial Services"},
                            {"symbol": "ILLQ3", "name": "Illiquid", "sector": "Energy"},
                            {"symbol": "NOPT3", "name": "No Options", "sector": "Energy", "supportsOptions": false}
                        ]}))
                    }
                }),
            )
            .route(
                "/quotes",
                post(move |Json(body): Json<Value>| {
                    let h = h2.clone();
                    async move {
                        h.lock().unwrap().push("quotes".into());
                        let asked: Vec<String> = body["symbols"]
                            .as_array()
                            .map(|a| a.iter().filter_map(|s| s.as_str().map(String::from)).collect())
                            .unwrap_or_default();
                        let all = [
                            ("PETR4", 32.45, 15_420_000.0),
                            ("WEGE3", 39.70, 5_100_000.0),
                            ("BBDC4", 13.85, 18_900_000.0),
                            ("ILLQ3", 10.00, 1_000.0),
                            ("NOPT3", 20.00, 9_000_000.0),
                        ];
                        let quotes: Vec<Value> = all
                            .iter()
                            .filter(|(s, _, _)| asked.iter().any(|a| a == s))
                            .map(|(s, p, v)| json!({"symbol": s, "price": p, "volume": v, "historicalPrices": history(*p)}))
                            .collect();
                        Json(json!({"quotes": quotes}))
                    }
                }),
            )
            .route(
                "/fundamentals/:symbol",
                get(move |Path(symbol): Path<String>| {
                    let h = h3.clone();
                    async move {
                        h.lock().unwrap().push(format!("fundamentals/{symbol}"));
                        match symbol.as_str() {
                            "BBDC4" => (StatusCode::NOT_FOUND, Json(json!({"message": "no data"}))),
                            "PETR4" => (StatusCode::OK, Json(json!({"fundamentals": {"symbol": "PETR4", "roic": 8.2, "roe": 18.0, "debtToEquity": 0.65, "revenueGrowth": 0.06}}))),
                            _ => (StatusCode::OK, Json(json!({"symbol": symbol, "roic": 22.5, "roe": 28.4, "debtToEquity": 0.25, "revenueGrowth": 0.14}))),
                        }
                    }
                }),
            )
    }

    async fn screener_for(app: Router) -> Screener {
        let base = spawn_upstream(app).await;
        Screener::new(Arc::new(OpLabClient::new(&test_config(&base)).unwrap()))
    }

    fn liquid_filter() -> ScreeningFilter {
        ScreeningFilter {
            min_volume: 1_000_000.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn live_run_ranks_and_excludes_failures() {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let screener = screener_for(market(hits.clone())).await;

        let report = screener.run_screening(liquid_filter()).await.unwrap();
        let symbols: Vec<&str> = report.results.iter().map(|r| r.symbol.as_str()).collect();

        // BBDC4 fundamentals failed; ILLQ3 is illiquid; NOPT3 has no options.
        assert_eq!(symbols, vec!["WEGE3", "PETR4"]);
        assert!(report.results[0].score >= report.results[1].score);
        assert_eq!(report.source, DataSource::Live);
        assert_eq!(screener.status().state, PipelineState::Done);
        assert_eq!(screener.latest().unwrap().run_id, report.run_id);

        let calls = hits.lock().unwrap().clone();
        assert_eq!(&calls[..2], &["instruments".to_string(), "quotes".to_string()]);
        assert!(!calls.iter().any(|c| c == "fundamentals/ILLQ3"));
        assert!(!calls.iter().any(|c| c == "fundamentals/NOPT3"));
        assert_eq!(calls.iter().filter(|c| c.starts_with("fundamentals/")).count(), 3);
    }

    #[tokio::test]
    async fn min_score_and_roic_trim_the_ranking() {
        let screener = screener_for(market(Arc::new(Mutex::new(Vec::new())))).await;
        let filter = ScreeningFilter {
            min_roic: Some(10.0),
            ..liquid_filter()
        };
        let report = screener.run_screening(filter).await.unwrap();
        let symbols: Vec<&str> = report.results.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["WEGE3"]);

        let none = screener
            .run_screening(ScreeningFilter {
                min_score: 100.0,
                ..liquid_filter()
            })
            .await
            .unwrap();
        assert!(none.results.is_empty());
    }

    #[tokio::test]
    async fn zero_instruments_short_circuits() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let app = Router::new().route(
            "/instruments",
            post(move || {
                let h = h.clone();
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                    Json(json!([]))
                }
            }),
        );
        let screener = screener_for(app).await;
        let report = screener.run_screening(liquid_filter()).await.unwrap();
        assert!(report.results.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_filter_never_reaches_the_network() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let app = Router::new().route(
            "/instruments",
            post(move || {
                let h = h.clone();
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                    Json(json!([]))
                }
            }),
        );
        let screener = screener_for(app).await;
        let err = screener
            .run_screening(ScreeningFilter {
                min_price: Some(50.0),
                max_price: Some(10.0),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn newer_run_supersedes_pending_one() {
        // The first run's instruments call is slow; the second run's is fast.
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let app = Router::new()
            .route(
                "/instruments",
                post(move |Json(body): Json<Value>| {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        if body["minPrice"] == json!(1.0) {
                            tokio::time::sleep(Duration::from_millis(300)).await;
                        }
                        Json(json!([{"symbol": "WEGE3", "name": "WEG", "sector": "Industrials"}]))
                    }
                }),
            )
            .route(
                "/quotes",
                post(|| async {
                    Json(json!([{"symbol": "WEGE3", "price": 39.7, "volume": 5_100_000, "historicalPrices": [38.0, 39.0, 39.7]}]))
                }),
            )
            .route(
                "/fundamentals/:symbol",
                get(|| async { Json(json!({"symbol": "WEGE3", "roic": 22.5})) }),
            );
        let base = spawn_upstream(app).await;
        let mut config = test_config(&base);
        config.request_spacing = Duration::ZERO;
        let screener = Arc::new(Screener::new(Arc::new(OpLabClient::new(&config).unwrap())));

        let first_filter = ScreeningFilter {
            min_price: Some(1.0),
            ..liquid_filter()
        };
        let second_filter = ScreeningFilter {
            min_price: Some(2.0),
            ..liquid_filter()
        };

        let s1 = Arc::clone(&screener);
        let first = tokio::spawn(async move { s1.run_screening(first_filter).await });
        // let the first run enqueue its instruments request
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = screener.run_screening(second_filter.clone()).await.unwrap();
        let first = first.await.unwrap();

        assert!(matches!(first, Err(AppError::Superseded)));
        let published = screener.latest().unwrap();
        assert_eq!(published.run_id, second.run_id);
        assert_eq!(published.filter, second_filter);
        assert_eq!(published.results.len(), 1);
    }

    #[tokio::test]
    async fn live_run_reports_every_stage_in_order() {
        let screener = screener_for(market(Arc::new(Mutex::new(Vec::new())))).await;
        let mut rx = screener.subscribe();
        let mut seen = vec![rx.borrow_and_update().state];
        let collector = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                seen.push(rx.borrow_and_update().state);
            }
            seen
        });

        screener.run_screening(liquid_filter()).await.unwrap();
        drop(screener);

        assert_eq!(
            collector.await.unwrap(),
            vec![
                PipelineState::Idle,
                PipelineState::FetchingInstruments,
                PipelineState::FetchingQuotes,
                PipelineState::FetchingFundamentals,
                PipelineState::Scoring,
                PipelineState::Done,
            ]
        );
    }

    #[test]
    fn cancelled_run_cannot_overwrite_its_successor() {
        let client = Arc::new(OpLabClient::new(&test_config("http://127.0.0.1:9")).unwrap());
        let screener = Screener::new(client);
        let mut rx = screener.subscribe();

        let first = screener.begin_run();
        screener.set_state(&first, PipelineState::FetchingQuotes);
        assert_eq!(
            screener.status(),
            RunStatus { run_id: first.id, state: PipelineState::FetchingQuotes }
        );

        let second = screener.begin_run();
        assert!(first.is_cancelled());
        assert_eq!(
            screener.status(),
            RunStatus { run_id: first.id, state: PipelineState::Cancelled }
        );

        screener.set_state(&second, PipelineState::FetchingInstruments);
        let _ = rx.borrow_and_update();

        screener.set_state(&first, PipelineState::Scoring);
        let published = screener.publish(&first, Vec::new(), DataSource::Live, ScreeningFilter::default());
        assert!(matches!(published, Err(AppError::Superseded)));

        assert!(!rx.has_changed().unwrap());
        assert_eq!(
            screener.status(),
            RunStatus { run_id: second.id, state: PipelineState::FetchingInstruments }
        );
        assert!(screener.latest().is_none());
    }

    #[tokio::test]
    async fn custom_weights_change_the_ranking_scale() {
        let roic_only = ScoreWeights {
            roic: 1.0,
            liquidity: 0.0,
            volatility: 0.0,
            fundamentals: 0.0,
            technicals: 0.0,
        };
        let screener = screener_for(market(Arc::new(Mutex::new(Vec::new()))))
            .await
            .with_weights(roic_only);

        let report = screener.run_screening(liquid_filter()).await.unwrap();
        let scores: Vec<(&str, u8)> = report.results.iter().map(|r| (r.symbol.as_str(), r.score)).collect();

        // ROIC 22.5 is in the top tier, 8.2 in the 8-10 tier (15 of 25 points).
        assert_eq!(scores, vec![("WEGE3", 100), ("PETR4", 60)]);
        assert!(report.results.iter().all(|r| r.breakdown.liquidity == 0.0));
    }

    #[tokio::test]
    async fn unreachable_upstream_serves_labelled_demo_data() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = Arc::new(OpLabClient::new(&test_config(&format!("http://{addr}"))).unwrap());
        let screener = Screener::new(client).with_fallback(Arc::new(DemoDataProvider::new()));

        let report = screener.run_screening(liquid_filter()).await.unwrap();
        assert_eq!(report.source, DataSource::Demo);
        assert!(!report.results.is_empty());
        assert!(report.results.iter().all(|r| r.data_source == DataSource::Demo));
        assert!(report.results.iter().all(|r| r.volume >= 1_000_000.0));
    }

    #[tokio::test]
    async fn without_fallback_connectivity_errors_surface() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = Arc::new(OpLabClient::new(&test_config(&format!("http://{addr}"))).unwrap());
        let screener = Screener::new(client);
        let err = screener.run_screening(liquid_filter()).await.unwrap_err();
        let AppError::Api(api) = err else {
            panic!("expected an API error");
        };
        assert_eq!(api.kind, ApiErrorKind::Network);
        assert_eq!(screener.status().state, PipelineState::Failed);
        assert!(screener.latest().is_none());
    }

    #[tokio::test]
    async fn auth_failure_does_not_fall_back() {
        let app = Router::new().route(
            "/instruments",
            post(|| async { (StatusCode::UNAUTHORIZED, Json(json!({"message": "bad token"}))) }),
        );
        let base = spawn_upstream(app).await;
        let client = Arc::new(OpLabClient::new(&test_config(&base)).unwrap());
        let screener = Screener::new(client).with_fallback(Arc::new(DemoDataProvider::new()));

        let err = screener.run_screening(liquid_filter()).await.unwrap_err();
        assert!(matches!(err, AppError::Api(ref e) if e.kind == ApiErrorKind::Auth));
    }

    #[test]
    fn offline_screen_applies_the_same_filters() {
        let filter = ScreeningFilter {
            sectors: vec!["Financial Services".into()],
            min_volume: 10_000_000.0,
            ..Default::default()
        };
        let results = screen_offline(DemoDataProvider::new().dataset(), &filter, &ScoreWeights::default());
        let symbols: Vec<&str> = results.iter().map(|r| r.symbol.as_str()).collect();
        assert!(symbols.contains(&"ITUB4"));
        assert!(symbols.contains(&"BBDC4"));
        assert!(!symbols.contains(&"BBAS3")); // 9.8M < 10M
        assert!(results.iter().all(|r| r.sector.as_deref() == Some("Financial Services")));
    }

    #[test]
    fn eligibility_drops_non_optionable_and_duplicates() {
        let i = |s: &str, opt: bool| Instrument {
            symbol: s.into(),
            name: String::new(),
            sector: Some("Energy".into()),
            supports_options: opt,
            price: None,
            volume: None,
        };
        let kept = eligible_instruments(vec![i("A", true), i("B", false), i("A", true)], &ScreeningFilter::default());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].symbol, "A");
    }

    #[tokio::test]
    async fn export_uses_latest_report() {
        let screener = screener_for(market(Arc::new(Mutex::new(Vec::new())))).await;
        assert!(matches!(screener.export_results(ExportFormat::Csv), Err(AppError::Validation(_))));

        screener.run_screening(liquid_filter()).await.unwrap();
        let csv = screener.export_results(ExportFormat::Csv).unwrap();
        assert_eq!(csv.lines().count(), 3);
    }
}
