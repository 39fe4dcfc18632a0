use crate::types::{Fundamental, Instrument, Quote};

/// Records an offline provider hands to the pipeline. They go through the
/// same local filtering and scoring as live data.
#[derive(Debug, Clone, Default)]
pub struct OfflineDataset {
    pub instruments: Vec<Instrument>,
    pub quotes: Vec<Quote>,
    pub fundamentals: Vec<Fundamental>,
}

/// Stand-in data source used when the data API cannot be reached.
pub trait OfflineProvider: Send + Sync {
    fn name(&self) -> &str;
    fn dataset(&self) -> OfflineDataset;
}

struct DemoStock {
    symbol: &'static str,
    name: &'static str,
    sector: &'static str,
    price: f64,
    volume: f64,
    roic: f64,
    roe: f64,
    debt_to_equity: f64,
    revenue_growth: f64,
    dividend_yield: f64,
}

const DEMO_STOCKS: &[DemoStock] = &[
    DemoStock { symbol: "PETR4", name: "Petrobras", sector: "Energy", price: 32.45, volume: 15_420_000.0, roic: 8.2, roe: 18.0, debt_to_equity: 0.65, revenue_growth: 0.06, dividend_yield: 0.12 },
    DemoStock { symbol: "VALE3", name: "Vale", sector: "Basic Materials", price: 58.90, volume: 8_750_000.0, roic: 7.8, roe: 16.5, debt_to_equity: 0.42, revenue_growth: 0.03, dividend_yield: 0.08 },
    DemoStock { symbol: "ITUB4", name: "Itaú Unibanco", sector: "Financial Services", price: 28.15, volume: 12_300_000.0, roic: 9.1, roe: 20.5, debt_to_equity: 1.2, revenue_growth: 0.09, dividend_yield: 0.06 },
    DemoStock { symbol: "BBDC4", name: "Bradesco", sector: "Financial Services", price: 13.85, volume: 18_900_000.0, roic: 6.5, roe: 11.8, debt_to_equity: 1.4, revenue_growth: 0.02, dividend_yield: 0.07 },
    DemoStock { symbol: "BBAS3", name: "Banco do Brasil", sector: "Financial Services", price: 27.30, volume: 9_800_000.0, roic: 10.2, roe: 21.0, debt_to_equity: 1.3, revenue_growth: 0.11, dividend_yield: 0.09 },
    DemoStock { symbol: "ABEV3", name: "Ambev", sector: "Consumer Defensive", price: 12.85, volume: 21_500_000.0, roic: 14.2, roe: 15.9, debt_to_equity: 0.1, revenue_growth: 0.05, dividend_yield: 0.05 },
    DemoStock { symbol: "WEGE3", name: "WEG", sector: "Industrials", price: 39.70, volume: 5_100_000.0, roic: 22.5, roe: 28.4, debt_to_equity: 0.25, revenue_growth: 0.14, dividend_yield: 0.02 },
    DemoStock { symbol: "MGLU3", name: "Magazine Luiza", sector: "Technology", price: 9.80, volume: 30_200_000.0, roic: 1.5, roe: -3.0, debt_to_equity: 1.8, revenue_growth: -0.05, dividend_yield: 0.0 },
    DemoStock { symbol: "EGIE3", name: "Engie Brasil", sector: "Utilities", price: 42.10, volume: 1_450_000.0, roic: 11.3, roe: 19.0, debt_to_equity: 0.95, revenue_growth: 0.07, dividend_yield: 0.07 },
    DemoStock { symbol: "RDOR3", name: "Rede D'Or", sector: "Healthcare", price: 27.60, volume: 3_900_000.0, roic: 7.1, roe: 10.4, debt_to_equity: 1.1, revenue_growth: 0.18, dividend_yield: 0.01 },
    DemoStock { symbol: "RENT3", name: "Localiza", sector: "Consumer Cyclical", price: 45.60, volume: 4_300_000.0, roic: 9.5, roe: 13.2, debt_to_equity: 1.6, revenue_growth: 0.2, dividend_yield: 0.02 },
    DemoStock { symbol: "VIVT3", name: "Vivo", sector: "Communication Services", price: 48.20, volume: 2_100_000.0, roic: 8.9, roe: 9.7, debt_to_equity: 0.35, revenue_growth: 0.04, dividend_yield: 0.06 },
];

const HISTORY_LEN: usize = 30;

/// Fixed set of B3 tickers with synthetic but repeatable price history.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoDataProvider;

impl DemoDataProvider {
    pub fn new() -> Self {
        Self
    }
}

/// Deterministic closes ending at `last`: a per-symbol wave on a gentle drift.
fn history(index: usize, last: f64) -> Vec<f64> {
    let amplitude = 0.015 + 0.01 * (index % 3) as f64;
    let phase = index as f64;
    let drift = 0.002 * ((index % 5) as f64 - 2.0);
    let mut closes: Vec<f64> = (0..HISTORY_LEN)
        .map(|i| {
            let back = (HISTORY_LEN - 1 - i) as f64;
            let wave = 1.0 + amplitude * (i as f64 * 0.6 + phase).sin();
            last * wave * (1.0 - drift * back)
        })
        .collect();
    if let Some(close) = closes.last_mut() {
        *close = last;
    }
    closes
}

impl OfflineProvider for DemoDataProvider {
    fn name(&self) -> &str {
        "demo"
    }

    fn dataset(&self) -> OfflineDataset {
        let mut data = OfflineDataset::default();
        for (i, s) in DEMO_STOCKS.iter().enumerate() {
            data.instruments.push(Instrument {
                symbol: s.symbol.to_string(),
                name: s.name.to_string(),
                sector: Some(s.sector.to_string()),
                supports_options: true,
                price: Some(s.price),
                volume: Some(s.volume),
            });
            data.quotes.push(Quote {
                symbol: s.symbol.to_string(),
                price: Some(s.price),
                volume: Some(s.volume),
                bid: Some(s.price - 0.01),
                ask: Some(s.price + 0.01),
                historical_prices: history(i, s.price),
            });
            data.fundamentals.push(Fundamental {
                symbol: s.symbol.to_string(),
                roic: Some(s.roic),
                roe: Some(s.roe),
                debt_to_equity: Some(s.debt_to_equity),
                revenue_growth: Some(s.revenue_growth),
                dividend_yield: Some(s.dividend_yield),
                revenue: None,
            });
        }
        data
    }
}
