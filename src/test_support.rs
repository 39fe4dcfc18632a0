//! Helpers shared by the inline test modules.

use std::time::Duration;

use axum::Router;

use crate::config::ClientConfig;
use crate::types::{DataSource, OptionLiquidity, ScoreBreakdown, ScoredResult, WheelMetrics};

/// Serve `app` on an ephemeral localhost port and return its base URL.
pub async fn spawn_upstream(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Client settings with short delays so retry paths finish quickly.
pub fn test_config(base_url: &str) -> ClientConfig {
    let mut config = ClientConfig::new(base_url);
    config.timeout = Duration::from_secs(2);
    config.retry_delay = Duration::from_millis(10);
    config.request_spacing = Duration::ZERO;
    config
}

/// A scored result with only the fields the filters look at filled in.
pub fn scored(symbol: &str, price: f64, volume: f64, roic: f64, score: u8) -> ScoredResult {
    ScoredResult {
        symbol: symbol.into(),
        name: format!("{symbol} SA"),
        sector: Some("Energy".into()),
        price,
        volume,
        roic,
        roe: 0.0,
        debt_to_equity: 0.0,
        revenue_growth: 0.0,
        volatility: 0.2,
        breakdown: ScoreBreakdown::default(),
        score,
        wheel_metrics: WheelMetrics {
            option_liquidity: OptionLiquidity::High,
            implied_volatility: 0.24,
            dividend_yield: 0.0,
            wheel_suitability: 50,
        },
        data_source: DataSource::Live,
    }
}
