use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wheel_screener::api::health::HealthState;
use wheel_screener::api::routes::{router, ApiState};
use wheel_screener::client::OpLabClient;
use wheel_screener::config::{Config, CHANNEL_CAPACITY};
use wheel_screener::db::writer::AuditWriter;
use wheel_screener::error::Result;
use wheel_screener::screening::{DemoDataProvider, PipelineState, RunStatus, Screener};
use wheel_screener::types::AuditEvent;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", cfg.db_path)).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Shared health counters ---
    let health = Arc::new(HealthState::new());

    // --- Audit writer ---
    let (audit_tx, audit_rx) = mpsc::channel::<AuditEvent>(CHANNEL_CAPACITY);
    let writer = AuditWriter::new(pool.clone(), audit_rx, Arc::clone(&health));
    tokio::spawn(async move { writer.run().await });

    // --- Data API client ---
    if cfg.client.token.is_none() {
        warn!("OPLAB_TOKEN not set: requests will be unauthenticated until PUT /api/token");
    }
    let client = Arc::new(OpLabClient::with_audit(&cfg.client, audit_tx)?);
    info!(
        base_url = %cfg.client.base_url,
        retries = cfg.client.retry_attempts,
        spacing_ms = cfg.client.request_spacing.as_millis() as u64,
        "[CLIENT] ready"
    );

    // --- Screener ---
    let mut screener = Screener::new(client).with_health(health);
    if cfg.demo_fallback {
        screener = screener.with_fallback(Arc::new(DemoDataProvider::new()));
        info!("Demo fallback enabled: unreachable API runs will serve the demo dataset");
    }
    let screener = Arc::new(screener);

    // Pipeline status logger
    let status_rx = screener.subscribe();
    tokio::spawn(async move { status_logger(status_rx).await });

    // --- HTTP API server ---
    let api_state = ApiState {
        screener: Arc::clone(&screener),
        pool: pool.clone(),
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Logs every pipeline transition until the screener is dropped.
async fn status_logger(mut rx: watch::Receiver<RunStatus>) {
    while rx.changed().await.is_ok() {
        let status = *rx.borrow_and_update();
        match status.state {
            PipelineState::Failed => warn!(run_id = status.run_id, "[PIPELINE] run failed"),
            PipelineState::Cancelled => info!(run_id = status.run_id, "[PIPELINE] run cancelled"),
            state => info!(run_id = status.run_id, state = %state, "[PIPELINE] {state}"),
        }
    }
}
