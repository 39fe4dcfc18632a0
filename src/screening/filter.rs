use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::types::ScoredResult;

/// User-chosen screening criteria.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreeningFilter {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    #[serde(default)]
    pub min_volume: f64,
    #[serde(rename = "minROIC", alias = "minRoic")]
    pub min_roic: Option<f64>,
    #[serde(default)]
    pub min_score: f64,
    #[serde(default)]
    pub sectors: Vec<String>,
    /// Free-text match on symbol, name or sector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl ScreeningFilter {
    /// Parse and validate a filter from an untyped JSON body, collecting every
    /// problem rather than stopping at the first.
    pub fn from_json(value: &Value) -> Result<Self> {
        let Some(obj) = value.as_object() else {
            return Err(AppError::validation("Filter must be a JSON object"));
        };
        let mut errors = Vec::new();

        let mut number = |key: &str, alt: Option<&str>, label: &str, non_negative: bool| -> Option<f64> {
            let raw = obj.get(key).or_else(|| alt.and_then(|a| obj.get(a)));
            match raw {
                None | Some(Value::Null) => None,
                Some(v) => match v.as_f64().filter(|x| x.is_finite()) {
                    Some(x) if non_negative && x < 0.0 => {
                        errors.push(format!("{label} must be a non-negative number"));
                        None
                    }
                    Some(x) => Some(x),
                    None => {
                        let kind = if non_negative { "a non-negative number" } else { "a number" };
                        errors.push(format!("{label} must be {kind}"));
                        None
                    }
                },
            }
        };

        let min_price = number("minPrice", None, "Min price", true);
        let max_price = number("maxPrice", None, "Max price", true);
        let min_volume = number("minVolume", None, "Min volume", true);
        let min_roic = number("minROIC", Some("minRoic"), "Min ROIC", false);
        let min_score = number("minScore", None, "Min score", true);

        let sectors = match obj.get("sectors") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => {
                let names: Vec<String> = items
                    .iter()
                    .filter_map(|s| s.as_str().map(|s| s.trim().to_string()))
                    .filter(|s| !s.is_empty())
                    .collect();
                if items.iter().any(|s| !s.is_string()) {
                    errors.push("Sectors must contain only strings".to_string());
                }
                names
            }
            Some(_) => {
                errors.push("Sectors must be an array".to_string());
                Vec::new()
            }
        };

        let search = match obj.get("search") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()).filter(|s| !s.trim().is_empty()),
            Some(_) => {
                errors.push("Search must be a string".to_string());
                None
            }
        };

        let filter = Self {
            min_price,
            max_price,
            min_volume: min_volume.unwrap_or(0.0),
            min_roic,
            min_score: min_score.unwrap_or(0.0),
            sectors,
            search,
        };
        errors.extend(filter.problems());
        errors.dedup();

        if errors.is_empty() {
            Ok(filter)
        } else {
            Err(AppError::Validation(errors))
        }
    }

    /// Validate a filter built in code.
    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(problems))
        }
    }

    fn problems(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let bad = |x: f64| !x.is_finite() || x < 0.0;

        if self.min_price.is_some_and(bad) {
            errors.push("Min price must be a non-negative number".to_string());
        }
        if self.max_price.is_some_and(bad) {
            errors.push("Max price must be a non-negative number".to_string());
        }
        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                errors.push("Min price cannot be greater than max price".to_string());
            }
        }
        if bad(self.min_volume) {
            errors.push("Min volume must be a non-negative number".to_string());
        }
        if self.min_roic.is_some_and(|x| !x.is_finite()) {
            errors.push("Min ROIC must be a number".to_string());
        }
        if !(0.0..=100.0).contains(&self.min_score) {
            errors.push("Min score must be between 0 and 100".to_string());
        }
        errors
    }

    /// Empty allow-list admits every sector.
    pub fn allows_sector(&self, sector: Option<&str>) -> bool {
        if self.sectors.is_empty() {
            return true;
        }
        let Some(sector) = sector.map(str::trim) else {
            return false;
        };
        self.sectors.iter().any(|s| s.eq_ignore_ascii_case(sector))
    }

    pub fn allows_price(&self, price: f64) -> bool {
        self.min_price.map_or(true, |min| price >= min) && self.max_price.map_or(true, |max| price <= max)
    }

    /// Every criterion at once, on an already scored result.
    pub fn matches(&self, r: &ScoredResult) -> bool {
        self.allows_price(r.price)
            && r.volume >= self.min_volume
            && self.min_roic.map_or(true, |min| r.roic >= min)
            && self.allows_sector(r.sector.as_deref())
            && f64::from(r.score) >= self.min_score
            && self.search.as_deref().map_or(true, |term| matches_search(r, term))
    }
}

fn matches_search(r: &ScoredResult, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return true;
    }
    r.symbol.to_lowercase().contains(&term)
        || r.name.to_lowercase().contains(&term)
        || r.sector.as_deref().is_some_and(|s| s.to_lowercase().contains(&term))
}

/// Keep results meeting every criterion, best first.
pub fn apply_filters(results: Vec<ScoredResult>, filter: &ScreeningFilter) -> Vec<ScoredResult> {
    let mut kept: Vec<ScoredResult> = results.into_iter().filter(|r| filter.matches(r)).collect();
    sort_results(&mut kept);
    kept
}

/// Case-insensitive match on symbol, name or sector. Blank terms keep everything.
pub fn filter_by_search(results: &[ScoredResult], term: &str) -> Vec<ScoredResult> {
    results.iter().filter(|r| matches_search(r, term)).cloned().collect()
}

/// Score descending, ties by symbol ascending.
pub fn sort_results(results: &mut [ScoredResult]) {
    results.sort_by(|a, b| match b.score.cmp(&a.score) {
        Ordering::Equal => a.symbol.cmp(&b.symbol),
        other => other,
    });
}
