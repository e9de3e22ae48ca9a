//! Commodity prices, macro indicators and FX (Alpha Vantage).
//!
//! Every Alpha Vantage series used here comes back newest-first, so the
//! change is always computed from the two most recent points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{UpstreamError, ValidationError};

use super::http::{json_f64, json_str};
use super::simulate::{round2, SimRng};
use super::LiveContext;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EconomicQuery {
    #[serde(default)]
    pub indicators: Vec<String>,
    #[serde(default)]
    pub commodities: Vec<String>,
    /// Pairs written `AAA/BBB`.
    #[serde(default)]
    pub currencies: Vec<String>,
}

impl EconomicQuery {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let total = self.indicators.len() + self.commodities.len() + self.currencies.len();
        if total == 0 {
            return Err(ValidationError::new(
                "economic",
                "at least one indicator, commodity or currency pair is required",
            ));
        }
        if self
            .indicators
            .iter()
            .chain(self.commodities.iter())
            .any(|s| s.trim().is_empty())
        {
            return Err(ValidationError::new("economic", "names must not be blank"));
        }
        for pair in &self.currencies {
            if split_pair(pair).is_none() {
                return Err(ValidationError::new(
                    "currencies",
                    format!("'{}' is not a currency pair like USD/CNY", pair),
                ));
            }
        }
        Ok(())
    }

    /// HTTP calls a live fetch sends: one per mapped series and one per pair.
    pub fn upstream_requests(&self) -> u32 {
        let commodities = self.commodities.iter().filter(|n| commodity_function(n).is_some()).count();
        let indicators = self.indicators.iter().filter(|n| indicator_function(n).is_some()).count();
        let pairs = self.currencies.iter().filter(|p| split_pair(p).is_some()).count();
        (commodities + indicators + pairs) as u32
    }
}

fn split_pair(pair: &str) -> Option<(&str, &str)> {
    let (from, to) = pair.trim().split_once('/')?;
    let valid = |code: &str| code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase());
    (valid(from) && valid(to)).then_some((from, to))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesQuote {
    pub name: String,
    pub value: f64,
    pub previous_value: f64,
    pub change_percent: f64,
}

impl SeriesQuote {
    pub fn new(name: impl Into<String>, value: f64, previous_value: f64) -> Self {
        let change_percent = if previous_value.abs() > f64::EPSILON {
            round2((value - previous_value) / previous_value.abs() * 100.0)
        } else {
            0.0
        };
        Self {
            name: name.into(),
            value,
            previous_value,
            change_percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicSnapshot {
    pub indicators: Vec<SeriesQuote>,
    pub commodities: Vec<SeriesQuote>,
    pub currencies: Vec<SeriesQuote>,
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Live
// ---------------------------------------------------------------------------

fn commodity_function(name: &str) -> Option<&'static str> {
    match name.trim().to_lowercase().as_str() {
        "oil" | "crude oil" | "wti" => Some("WTI"),
        "brent" => Some("BRENT"),
        "natural gas" | "gas" | "lng" => Some("NATURAL_GAS"),
        "copper" => Some("COPPER"),
        "aluminum" | "aluminium" => Some("ALUMINUM"),
        "wheat" => Some("WHEAT"),
        "corn" => Some("CORN"),
        "cotton" => Some("COTTON"),
        "sugar" => Some("SUGAR"),
        "coffee" => Some("COFFEE"),
        _ => None,
    }
}

fn indicator_function(name: &str) -> Option<&'static str> {
    match name.trim().to_lowercase().as_str() {
        "gdp" | "real gdp" => Some("REAL_GDP"),
        "cpi" => Some("CPI"),
        "inflation" => Some("INFLATION"),
        "unemployment" => Some("UNEMPLOYMENT"),
        "interest rate" | "federal funds rate" => Some("FEDERAL_FUNDS_RATE"),
        "treasury yield" => Some("TREASURY_YIELD"),
        "retail sales" => Some("RETAIL_SALES"),
        "durables" | "durable goods" => Some("DURABLES"),
        _ => None,
    }
}

/// Alpha Vantage answers throttled calls with 200 and a `Note`/`Information` body.
fn check_throttled(body: &serde_json::Value) -> Result<(), UpstreamError> {
    for key in ["Note", "Information", "Error Message"] {
        if let Some(message) = json_str(body, key) {
            let status = if key == "Error Message" { 400 } else { 429 };
            return Err(UpstreamError::Status { status, message });
        }
    }
    Ok(())
}

fn latest_two(body: &serde_json::Value) -> Result<(f64, f64), UpstreamError> {
    let values: Vec<f64> = body
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| UpstreamError::Malformed("series without data".to_string()))?
        .iter()
        .filter_map(|point| json_f64(point, "value"))
        .take(2)
        .collect();
    match values.as_slice() {
        [latest, previous] => Ok((*latest, *previous)),
        _ => Err(UpstreamError::Malformed("series has fewer than two points".to_string())),
    }
}

fn latest_fx_closes(body: &serde_json::Value) -> Result<(f64, f64), UpstreamError> {
    let series = body
        .get("Time Series FX (Daily)")
        .and_then(|s| s.as_object())
        .ok_or_else(|| UpstreamError::Malformed("missing FX series".to_string()))?;
    let mut days: Vec<(&String, f64)> = series
        .iter()
        .filter_map(|(day, bar)| json_f64(bar, "4. close").map(|c| (day, c)))
        .collect();
    days.sort_by(|a, b| b.0.cmp(a.0));
    match days.as_slice() {
        [(_, latest), (_, previous), ..] => Ok((*latest, *previous)),
        _ => Err(UpstreamError::Malformed("FX series has fewer than two closes".to_string())),
    }
}

async fn fetch_series(ctx: &LiveContext, function: &str) -> Result<(f64, f64), UpstreamError> {
    let params = [
        ("function", function.to_string()),
        ("interval", "monthly".to_string()),
        ("apikey", ctx.api_key.clone()),
    ];
    let body = ctx.http.get_json(&ctx.base_url, &params).await?;
    check_throttled(&body)?;
    latest_two(&body)
}

pub async fn fetch_live(ctx: &LiveContext, query: &EconomicQuery) -> Result<EconomicSnapshot, UpstreamError> {
    let mut commodities = Vec::new();
    for name in &query.commodities {
        match commodity_function(name) {
            Some(function) => {
                let (value, previous) = fetch_series(ctx, function).await?;
                commodities.push(SeriesQuote::new(name.clone(), value, previous));
            }
            None => log::debug!("Economic adapter: no Alpha Vantage series for commodity '{}'", name),
        }
    }

    let mut indicators = Vec::new();
    for name in &query.indicators {
        match indicator_function(name) {
            Some(function) => {
                let (value, previous) = fetch_series(ctx, function).await?;
                indicators.push(SeriesQuote::new(name.clone(), value, previous));
            }
            None => log::debug!("Economic adapter: no Alpha Vantage series for indicator '{}'", name),
        }
    }

    let mut currencies = Vec::new();
    for pair in &query.currencies {
        let Some((from, to)) = split_pair(pair) else {
            continue;
        };
        let params = [
            ("function", "FX_DAILY".to_string()),
            ("from_symbol", from.to_string()),
            ("to_symbol", to.to_string()),
            ("apikey", ctx.api_key.clone()),
        ];
        let body = ctx.http.get_json(&ctx.base_url, &params).await?;
        check_throttled(&body)?;
        let (rate, previous) = latest_fx_closes(&body)?;
        currencies.push(SeriesQuote::new(pair.clone(), rate, previous));
    }

    Ok(EconomicSnapshot {
        indicators,
        commodities,
        currencies,
        confidence: ctx.confidence,
        observed_at: Utc::now(),
    })
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// A calm move most of the time, a shock with probability `shock_p`.
fn simulated_move(rng: &mut SimRng, calm: f64, shock: (f64, f64), shock_p: f64) -> f64 {
    if rng.chance(shock_p) {
        let magnitude = rng.uniform(shock.0, shock.1);
        if rng.chance(0.5) {
            magnitude
        } else {
            -magnitude
        }
    } else {
        rng.uniform(-calm, calm)
    }
}

fn simulated_quote(rng: &mut SimRng, name: &str, base: (f64, f64), pct: f64) -> SeriesQuote {
    let previous = round2(rng.uniform(base.0, base.1));
    let value = round2(previous * (1.0 + pct / 100.0));
    SeriesQuote::new(name, value, previous)
}

pub fn simulate(query: &EconomicQuery, rng: &mut SimRng) -> EconomicSnapshot {
    let commodities = query
        .commodities
        .iter()
        .map(|name| {
            let pct = simulated_move(rng, 6.0, (8.0, 20.0), 0.12);
            simulated_quote(rng, name, (50.0, 150.0), pct)
        })
        .collect();
    let indicators = query
        .indicators
        .iter()
        .map(|name| {
            let pct = simulated_move(rng, 4.0, (6.0, 12.0), 0.08);
            simulated_quote(rng, name, (1.0, 100.0), pct)
        })
        .collect();
    let currencies = query
        .currencies
        .iter()
        .map(|pair| {
            let pct = simulated_move(rng, 2.5, (4.0, 10.0), 0.08);
            simulated_quote(rng, pair, (0.5, 8.0), pct)
        })
        .collect();

    EconomicSnapshot {
        indicators,
        commodities,
        currencies,
        confidence: rng.confidence(),
        observed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;

    #[test]
    fn test_validation() {
        assert!(EconomicQuery::default().validate().is_err());
        let ok = EconomicQuery {
            commodities: vec!["copper".to_string()],
            currencies: vec!["USD/CNY".to_string()],
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
        let bad = EconomicQuery {
            currencies: vec!["usd-cny".to_string()],
            ..Default::default()
        };
        assert_eq!(bad.validate().unwrap_err().field, "currencies");
    }

    #[test]
    fn test_series_change_percent() {
        let q = SeriesQuote::new("copper", 110.0, 100.0);
        assert_eq!(q.change_percent, 10.0);
        assert_eq!(SeriesQuote::new("x", 5.0, 0.0).change_percent, 0.0);
    }

    #[test]
    fn test_latest_two_skips_missing_points() {
        let body = serde_json::json!({
            "name": "Copper", "data": [
                { "date": "2024-03-01", "value": "." },
                { "date": "2024-02-01", "value": "8500" },
                { "date": "2024-01-01", "value": "8000" }
            ]
        });
        assert_eq!(latest_two(&body).expect("series"), (8500.0, 8000.0));
        assert!(latest_two(&serde_json::json!({ "data": [] })).is_err());
    }

    #[test]
    fn test_fx_closes_sorted_by_day() {
        let body = serde_json::json!({
            "Time Series FX (Daily)": {
                "2024-01-09": { "4. close": "7.10" },
                "2024-01-10": { "4. close": "7.20" },
                "2024-01-08": { "4. close": "7.00" }
            }
        });
        assert_eq!(latest_fx_closes(&body).expect("fx"), (7.20, 7.10));
    }

    #[test]
    fn test_throttle_note_is_rate_limit_status() {
        let body = serde_json::json!({ "Note": "Thank you for using Alpha Vantage! Our standard API rate limit is 5 requests per minute." });
        match check_throttled(&body) {
            Err(UpstreamError::Status { status, .. }) => assert_eq!(status, 429),
            other => panic!("expected throttle status, got {:?}", other),
        }
    }

    #[test]
    fn test_upstream_requests_counts_mapped_series() {
        let q = EconomicQuery {
            indicators: vec!["inflation".to_string(), "interest rate".to_string()],
            commodities: vec!["oil".to_string(), "copper".to_string(), "lithium".to_string()],
            currencies: vec!["USD/CNY".to_string()],
        };
        assert_eq!(q.upstream_requests(), 5);
    }

    #[test]
    fn test_name_mapping() {
        assert_eq!(commodity_function("Crude Oil"), Some("WTI"));
        assert_eq!(indicator_function("Interest Rate"), Some("FEDERAL_FUNDS_RATE"));
        assert_eq!(commodity_function("lithium"), None);
    }

    #[test]
    fn test_simulation_covers_every_entry() {
        let sim = SimulationConfig::default();
        let q = EconomicQuery {
            indicators: vec!["cpi".to_string()],
            commodities: vec!["copper".to_string(), "oil".to_string()],
            currencies: vec!["EUR/USD".to_string()],
        };
        let snap = simulate(&q, &mut SimRng::from_seed(5, &sim));
        assert_eq!(snap.commodities.len(), 2);
        assert_eq!(snap.indicators.len(), 1);
        assert_eq!(snap.currencies[0].name, "EUR/USD");
    }
}
