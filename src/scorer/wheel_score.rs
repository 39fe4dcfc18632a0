use serde::{Deserialize, Serialize};

use crate::config::liquidity_tiers;
use crate::scorer::indicators::{self, DEFAULT_VOLATILITY};
use crate::types::{
    DataSource, Fundamental, Instrument, OptionLiquidity, Quote, ScoreBreakdown, ScoredResult, WheelMetrics,
};

// Bucket maxima in raw points.
const ROIC_MAX: f64 = 25.0;
const LIQUIDITY_MAX: f64 = 20.0;
const VOLATILITY_MAX: f64 = 15.0;
const FUNDAMENTALS_MAX: f64 = 25.0;
const TECHNICALS_MAX: f64 = 15.0;

/// Sectors that get the suitability bonus.
pub const PREFERRED_SECTORS: [&str; 4] = ["Technology", "Healthcare", "Consumer Staples", "Utilities"];

/// Share of the 0–100 scale given to each bucket. The defaults sum to 1 and
/// reproduce the raw point totals exactly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoreWeights {
    pub roic: f64,
    pub liquidity: f64,
    pub volatility: f64,
    pub fundamentals: f64,
    pub technicals: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            roic: 0.25,
            liquidity: 0.20,
            volatility: 0.15,
            fundamentals: 0.25,
            technicals: 0.15,
        }
    }
}

impl ScoreWeights {
    /// Weights that are negative or not finite count as zero.
    pub fn sanitized(self) -> Self {
        let clean = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        Self {
            roic: clean(self.roic),
            liquidity: clean(self.liquidity),
            volatility: clean(self.volatility),
            fundamentals: clean(self.fundamentals),
            technicals: clean(self.technicals),
        }
    }
}

/// Everything the score looks at. `None` (or a non-finite value) means the
/// field is missing and takes its default.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreInputs {
    pub roic: Option<f64>,
    pub roe: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub revenue_growth: Option<f64>,
    pub volume: Option<f64>,
    pub min_volume: f64,
    pub volatility: Option<f64>,
    pub trend: Option<f64>,
    pub support: Option<f64>,
    pub price: Option<f64>,
}

fn present(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

// ---------------------------------------------------------------------------
// Bucket points
// ---------------------------------------------------------------------------

fn roic_points(roic: f64) -> f64 {
    match roic {
        r if r >= 15.0 => 25.0,
        r if r >= 10.0 => 20.0,
        r if r >= 8.0 => 15.0,
        r if r >= 5.0 => 10.0,
        _ => 5.0,
    }
}

fn liquidity_points(volume: f64, min_volume: f64) -> f64 {
    if !(min_volume.is_finite() && min_volume > 0.0) {
        return if volume > 0.0 { 20.0 } else { 4.0 };
    }
    match volume / min_volume {
        r if r >= 10.0 => 20.0,
        r if r >= 5.0 => 16.0,
        r if r >= 2.0 => 12.0,
        r if r >= 1.0 => 8.0,
        _ => 4.0,
    }
}

fn volatility_points(vol: f64) -> f64 {
    match vol {
        v if v <= 0.15 => 15.0,
        v if v <= 0.25 => 12.0,
        v if v <= 0.35 => 9.0,
        v if v <= 0.45 => 6.0,
        _ => 3.0,
    }
}

fn fundamentals_points(debt_to_equity: Option<f64>, roe: f64, growth: f64) -> f64 {
    let debt = match debt_to_equity {
        Some(d) if d <= 0.3 => 8.0,
        Some(d) if d <= 0.6 => 6.0,
        Some(d) if d <= 1.0 => 4.0,
        _ => 2.0,
    };
    let roe = match roe {
        r if r >= 15.0 => 8.0,
        r if r >= 10.0 => 6.0,
        r if r >= 5.0 => 4.0,
        _ => 2.0,
    };
    let growth = match growth {
        g if g >= 0.15 => 9.0,
        g if g >= 0.10 => 7.0,
        g if g >= 0.05 => 5.0,
        g if g >= 0.0 => 3.0,
        _ => 1.0,
    };
    debt + roe + growth
}

fn technicals_points(trend: f64, price: Option<f64>, support: Option<f64>) -> f64 {
    let trend = match trend {
        t if t > 0.05 => 8.0,
        t if t > 0.0 => 6.0,
        t if t > -0.05 => 4.0,
        _ => 2.0,
    };
    let proximity = match (price, support) {
        (Some(p), Some(s)) if s > 0.0 => {
            let distance = (p - s) / s;
            if (0.05..=0.15).contains(&distance) {
                7.0
            } else if (0.0..=0.25).contains(&distance) {
                5.0
            } else {
                2.0
            }
        }
        _ => 2.0,
    };
    trend + proximity
}

// ---------------------------------------------------------------------------
// Score
// ---------------------------------------------------------------------------

/// Weighted wheel score in 0..=100 plus each bucket's contribution.
pub fn calculate_wheel_score(inputs: &ScoreInputs, weights: &ScoreWeights) -> (u8, ScoreBreakdown) {
    let w = weights.sanitized();

    let roic = roic_points(present(inputs.roic).unwrap_or(0.0));
    let liquidity = liquidity_points(present(inputs.volume).unwrap_or(0.0), inputs.min_volume);
    let volatility = volatility_points(present(inputs.volatility).unwrap_or(DEFAULT_VOLATILITY));
    let fundamentals = fundamentals_points(
        present(inputs.debt_to_equity),
        present(inputs.roe).unwrap_or(0.0),
        present(inputs.revenue_growth).unwrap_or(0.0),
    );
    let technicals = technicals_points(
        present(inputs.trend).unwrap_or(0.0),
        present(inputs.price),
        present(inputs.support),
    );

    let breakdown = ScoreBreakdown {
        roic: w.roic * 100.0 * roic / ROIC_MAX,
        liquidity: w.liquidity * 100.0 * liquidity / LIQUIDITY_MAX,
        volatility: w.volatility * 100.0 * volatility / VOLATILITY_MAX,
        fundamentals: w.fundamentals * 100.0 * fundamentals / FUNDAMENTALS_MAX,
        technicals: w.technicals * 100.0 * technicals / TECHNICALS_MAX,
    };

    let total = breakdown.total();
    let score = if total.is_finite() {
        total.round().clamp(0.0, 100.0) as u8
    } else {
        0
    };
    (score, breakdown)
}

// ---------------------------------------------------------------------------
// Wheel metrics
// ---------------------------------------------------------------------------

pub fn option_liquidity(volume: f64) -> OptionLiquidity {
    match volume {
        v if v >= liquidity_tiers::HIGH => OptionLiquidity::High,
        v if v >= liquidity_tiers::MEDIUM => OptionLiquidity::Medium,
        v if v >= liquidity_tiers::LOW => OptionLiquidity::Low,
        _ => OptionLiquidity::VeryLow,
    }
}

/// Rough implied-volatility guess: historical volatility plus 20%, capped at 100%.
pub fn implied_volatility(volatility: f64) -> f64 {
    (volatility * 1.2).min(1.0)
}

/// 0–100 heuristic for how comfortable the name is to run the wheel on.
pub fn wheel_suitability(
    sector: Option<&str>,
    price: Option<f64>,
    debt_to_equity: Option<f64>,
    dividend_yield: Option<f64>,
    volume: f64,
) -> u8 {
    let mut score = 0u32;

    if sector.is_some_and(|s| PREFERRED_SECTORS.contains(&s)) {
        score += 20;
    }

    score += match present(price) {
        Some(p) if (20.0..=100.0).contains(&p) => 20,
        Some(p) if (10.0..=200.0).contains(&p) => 15,
        _ => 10,
    };

    score += match present(debt_to_equity) {
        Some(d) if d <= 0.5 => 20,
        Some(d) if d <= 1.0 => 15,
        _ => 10,
    };

    if present(dividend_yield).is_some_and(|y| y > 0.02) {
        score += 10;
    }

    score += if volume >= liquidity_tiers::MEDIUM {
        20
    } else if volume >= liquidity_tiers::LOW {
        15
    } else {
        10
    };

    score.min(100) as u8
}

// ---------------------------------------------------------------------------
// Candidate assembly
// ---------------------------------------------------------------------------

/// Scores one instrument from its quote and fundamentals.
pub fn score_candidate(
    instrument: &Instrument,
    quote: &Quote,
    fundamental: &Fundamental,
    min_volume: f64,
    weights: &ScoreWeights,
    source: DataSource,
) -> ScoredResult {
    let history = &quote.historical_prices;
    let volatility = indicators::volatility(history);
    let price = present(quote.price).or(present(instrument.price));
    let volume = present(quote.volume).unwrap_or(0.0);

    let inputs = ScoreInputs {
        roic: fundamental.roic,
        roe: fundamental.roe,
        debt_to_equity: fundamental.debt_to_equity,
        revenue_growth: fundamental.revenue_growth,
        volume: Some(volume),
        min_volume,
        volatility: Some(volatility),
        trend: Some(indicators::trend(history)),
        support: indicators::support(history),
        price,
    };
    let (score, breakdown) = calculate_wheel_score(&inputs, weights);

    let wheel_metrics = WheelMetrics {
        option_liquidity: option_liquidity(volume),
        implied_volatility: implied_volatility(volatility),
        dividend_yield: present(fundamental.dividend_yield).unwrap_or(0.0),
        wheel_suitability: wheel_suitability(
            instrument.sector.as_deref(),
            price,
            fundamental.debt_to_equity,
            fundamental.dividend_yield,
            volume,
        ),
    };

    ScoredResult {
        symbol: instrument.symbol.clone(),
        name: instrument.name.clone(),
        sector: instrument.sector.clone(),
        price: price.unwrap_or(0.0),
        volume,
        roic: present(fundamental.roic).unwrap_or(0.0),
        roe: present(fundamental.roe).unwrap_or(0.0),
        debt_to_equity: present(fundamental.debt_to_equity).unwrap_or(0.0),
        revenue_growth: present(fundamental.revenue_growth).unwrap_or(0.0),
        volatility,
        breakdown,
        score,
        wheel_metrics,
        data_source: source,
    }
}
