use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::screening::pipeline::ScreeningReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "csv" => Some(ExportFormat::Csv),
            "json" => Some(ExportFormat::Json),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// BUY at 80 and above, SELL at 50 and below.
pub fn recommendation(score: u8) -> &'static str {
    match score {
        80..=u8::MAX => "BUY",
        0..=50 => "SELL",
        _ => "HOLD",
    }
}

#[derive(Serialize)]
struct CsvRow<'a> {
    #[serde(rename = "Symbol")]
    symbol: &'a str,
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Score")]
    score: u8,
    #[serde(rename = "Price")]
    price: f64,
    #[serde(rename = "Volume")]
    volume: f64,
    #[serde(rename = "Sector")]
    sector: &'a str,
    #[serde(rename = "ROIC")]
    roic: f64,
    #[serde(rename = "Volatility")]
    volatility: f64,
    #[serde(rename = "Option Liquidity")]
    option_liquidity: String,
    #[serde(rename = "Wheel Suitability")]
    wheel_suitability: u8,
    #[serde(rename = "Recommendation")]
    recommendation: &'static str,
    #[serde(rename = "Source")]
    source: String,
}

fn round(x: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (x * factor).round() / factor
}

/// Render a report's results. Empty result sets are refused.
pub fn export_results(report: &ScreeningReport, format: ExportFormat) -> Result<String> {
    if report.results.is_empty() {
        return Err(AppError::validation("No results to export"));
    }
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            for r in &report.results {
                writer.serialize(CsvRow {
                    symbol: &r.symbol,
                    name: &r.name,
                    score: r.score,
                    price: round(r.price, 2),
                    volume: r.volume,
                    sector: r.sector.as_deref().unwrap_or(""),
                    roic: round(r.roic, 2),
                    volatility: round(r.volatility, 4),
                    option_liquidity: r.wheel_metrics.option_liquidity.to_string(),
                    wheel_suitability: r.wheel_metrics.wheel_suitability,
                    recommendation: recommendation(r.score),
                    source: r.data_source.to_string(),
                })?;
            }
            let bytes = writer.into_inner().map_err(|e| AppError::Io(e.into_error()))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}
