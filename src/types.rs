use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Data-API endpoints the client talks to. Each has its own cache TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Instruments,
    Quotes,
    Fundamentals,
    Options,
    User,
    Health,
}

impl Endpoint {
    pub const ALL: [Endpoint; 6] = [
        Endpoint::Instruments,
        Endpoint::Quotes,
        Endpoint::Fundamentals,
        Endpoint::Options,
        Endpoint::User,
        Endpoint::Health,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Endpoint::Instruments => "instruments",
            Endpoint::Quotes => "quotes",
            Endpoint::Fundamentals => "fundamentals",
            Endpoint::Options => "options",
            Endpoint::User => "user",
            Endpoint::Health => "health",
        }
    }

    /// Path prefix relative to the API base URL.
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Instruments => "/instruments",
            Endpoint::Quotes => "/quotes",
            Endpoint::Fundamentals => "/fundamentals",
            Endpoint::Options => "/options",
            Endpoint::User => "/user",
            Endpoint::Health => "/health",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|e| e.name().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Upstream records
// ---------------------------------------------------------------------------

/// Where a record or a result set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Fetched from the data API.
    #[default]
    Live,
    /// Produced by the offline demo provider.
    Demo,
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::Live => write!(f, "live"),
            DataSource::Demo => write!(f, "demo"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sector: Option<String>,
    /// Unknown upstream means optionable; only an explicit `false` excludes.
    #[serde(
        default = "default_true",
        alias = "hasOptions",
        alias = "optionable",
        deserialize_with = "lenient::bool_or_true"
    )]
    pub supports_options: bool,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub volume: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub bid: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub ask: Option<f64>,
    /// Closing prices, oldest first. Non-numeric entries are dropped.
    #[serde(default, deserialize_with = "lenient::prices")]
    pub historical_prices: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fundamental {
    #[serde(default)]
    pub symbol: String,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub roic: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub roe: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub debt_to_equity: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub revenue_growth: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub dividend_yield: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub revenue: Option<f64>,
}

/// One listed option on an underlying, as returned by `POST /options`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionContract {
    pub symbol: String,
    /// CALL or PUT.
    #[serde(default, rename = "type")]
    pub option_type: Option<String>,
    #[serde(default, alias = "strikePrice", deserialize_with = "lenient::opt_f64")]
    pub strike: Option<f64>,
    #[serde(default)]
    pub expiration: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub days_to_expiry: Option<f64>,
    #[serde(default, alias = "price", deserialize_with = "lenient::opt_f64")]
    pub last_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub bid: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub ask: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub volume: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub open_interest: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub implied_volatility: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub delta: Option<f64>,
}

/// Account information returned by `GET /user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Upstream liveness report returned by `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self.status.to_lowercase().as_str(), "healthy" | "ok" | "up")
    }
}

// ---------------------------------------------------------------------------
// Scored output
// ---------------------------------------------------------------------------

/// Weighted contribution of each bucket to the final score.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub roic: f64,
    pub liquidity: f64,
    pub volatility: f64,
    pub fundamentals: f64,
    pub technicals: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.roic + self.liquidity + self.volatility + self.fundamentals + self.technicals
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionLiquidity {
    High,
    Medium,
    Low,
    VeryLow,
}

impl std::fmt::Display for OptionLiquidity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OptionLiquidity::High => "High",
            OptionLiquidity::Medium => "Medium",
            OptionLiquidity::Low => "Low",
            OptionLiquidity::VeryLow => "Very Low",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WheelMetrics {
    pub option_liquidity: OptionLiquidity,
    pub implied_volatility: f64,
    pub dividend_yield: f64,
    /// 0–100 heuristic independent of the wheel score.
    pub wheel_suitability: u8,
}

/// One ranked candidate. Built once per run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredResult {
    pub symbol: String,
    pub name: String,
    pub sector: Option<String>,
    pub price: f64,
    pub volume: f64,
    pub roic: f64,
    pub roe: f64,
    pub debt_to_equity: f64,
    pub revenue_growth: f64,
    pub volatility: f64,
    pub breakdown: ScoreBreakdown,
    pub score: u8,
    pub wheel_metrics: WheelMetrics,
    pub data_source: DataSource,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Audit events
// ---------------------------------------------------------------------------

/// One executed upstream request. Cache hits are audited too, with
/// `attempts == 0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub endpoint: Endpoint,
    pub method: String,
    pub path: String,
    /// HTTP status of the final attempt, 0 when no response was received.
    pub status: u16,
    pub duration_ms: f64,
    pub cache_hit: bool,
    pub attempts: u32,
    pub error: Option<String>,
    pub requested_at_ms: i64,
}

// ---------------------------------------------------------------------------
// Lenient numeric decoding
// ---------------------------------------------------------------------------

/// Upstream payloads mix numbers, numeric strings and nulls. Anything that is
/// not a finite number decodes as missing.
pub(crate) mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn number(v: &Value) -> Option<f64> {
        let n = match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        n.filter(|x| x.is_finite())
    }

    pub fn opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        Ok(number(&v))
    }

    pub fn prices<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        Ok(match v {
            Value::Array(items) => items.iter().filter_map(number).collect(),
            _ => Vec::new(),
        })
    }

    pub fn bool_or_true<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        Ok(match v {
            Value::Bool(b) => b,
            Value::String(s) => !s.trim().eq_ignore_ascii_case("false"),
            Value::Number(n) => n.as_f64() != Some(0.0),
            _ => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_names_round_trip() {
        for e in Endpoint::ALL {
            assert_eq!(Endpoint::from_name(e.name()), Some(e));
        }
        assert_eq!(Endpoint::from_name(" Quotes "), Some(Endpoint::Quotes));
        assert_eq!(Endpoint::from_name("greeks"), None);
    }

    #[test]
    fn quote_decodes_mixed_numeric_fields() {
        let q: Quote = serde_json::from_value(json!({
            "symbol": "PETR4",
            "price": "32.45",
            "volume": 15420000,
            "bid": null,
            "ask": "n/a",
            "historicalPrices": [30.1, "30.5", null, "x", 31.0]
        }))
        .unwrap();
        assert_eq!(q.price, Some(32.45));
        assert_eq!(q.volume, Some(15_420_000.0));
        assert_eq!(q.bid, None);
        assert_eq!(q.ask, None);
        assert_eq!(q.historical_prices, vec![30.1, 30.5, 31.0]);
    }

    #[test]
    fn instrument_defaults_to_optionable() {
        let i: Instrument = serde_json::from_value(json!({ "symbol": "VALE3" })).unwrap();
        assert!(i.supports_options);
        assert_eq!(i.name, "");

        let i: Instrument =
            serde_json::from_value(json!({ "symbol": "XYZ3", "hasOptions": false })).unwrap();
        assert!(!i.supports_options);
    }

    #[test]
    fn fundamental_tolerates_missing_fields() {
        let f: Fundamental =
            serde_json::from_value(json!({ "symbol": "ITUB4", "roic": 9.1, "roe": "abc" })).unwrap();
        assert_eq!(f.roic, Some(9.1));
        assert_eq!(f.roe, None);
        assert_eq!(f.debt_to_equity, None);
    }
}
