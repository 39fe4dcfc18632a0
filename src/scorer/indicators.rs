//! Price-series indicators feeding the wheel score.
//!
//! Every function takes closes oldest first and tolerates junk: non-finite
//! values are dropped before any arithmetic.

/// Trading days per year used to annualize daily volatility.
pub const TRADING_DAYS: f64 = 252.0;

/// Volatility assumed when there is not enough history to measure it.
pub const DEFAULT_VOLATILITY: f64 = 0.5;

/// Observations considered by `trend` and `support`.
pub const LOOKBACK: usize = 20;

fn finite(prices: &[f64]) -> Vec<f64> {
    prices.iter().copied().filter(|p| p.is_finite()).collect()
}

fn recent(prices: &[f64]) -> &[f64] {
    &prices[prices.len().saturating_sub(LOOKBACK)..]
}

/// Annualized volatility: population standard deviation of simple returns
/// times √252.
pub fn volatility(prices: &[f64]) -> f64 {
    let prices = finite(prices);
    if prices.len() < 2 {
        return DEFAULT_VOLATILITY;
    }

    let returns: Vec<f64> = prices
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.is_empty() {
        return DEFAULT_VOLATILITY;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let vol = (variance * TRADING_DAYS).sqrt();

    if vol.is_finite() {
        vol
    } else {
        DEFAULT_VOLATILITY
    }
}

/// Least-squares slope of the last `LOOKBACK` closes against their index,
/// divided by their mean. Positive means uptrend.
pub fn trend(prices: &[f64]) -> f64 {
    let prices = finite(prices);
    let ys = recent(&prices);
    if ys.len() < 2 {
        return 0.0;
    }

    let n = ys.len() as f64;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0, 0.0, 0.0, 0.0);
    for (i, &y) in ys.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let denom = n * sum_xx - sum_x * sum_x;
    let mean = sum_y / n;
    if denom == 0.0 || mean == 0.0 {
        return 0.0;
    }

    let normalized = ((n * sum_xy - sum_x * sum_y) / denom) / mean;
    if normalized.is_finite() {
        normalized
    } else {
        0.0
    }
}

/// Lowest close among the last `LOOKBACK` observations. `None` when there
/// is no usable price at all.
pub fn support(prices: &[f64]) -> Option<f64> {
    let prices = finite(prices);
    recent(&prices).iter().copied().reduce(f64::min)
}
