use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Category / Severity
// =============================================================================

/// Risk dimension a signal speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Shipping,
    Weather,
    News,
    Economic,
    Imagery,
    Cyber,
    Compliance,
}

impl Category {
    /// Canonical order used when listing factors.
    pub const ALL: [Category; 7] = [
        Category::Shipping,
        Category::Weather,
        Category::News,
        Category::Economic,
        Category::Imagery,
        Category::Cyber,
        Category::Compliance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Shipping => "shipping",
            Category::Weather => "weather",
            Category::News => "news",
            Category::Economic => "economic",
            Category::Imagery => "imagery",
            Category::Cyber => "cyber",
            Category::Compliance => "compliance",
        }
    }

    /// Human-readable factor name shown in assessments.
    pub fn factor_name(&self) -> &'static str {
        match self {
            Category::Shipping => "Shipping Delays",
            Category::Weather => "Weather Disruptions",
            Category::News => "Disruption Events in the News",
            Category::Economic => "Commodity and Currency Volatility",
            Category::Imagery => "Port Congestion",
            Category::Cyber => "Cyber Security Threats",
            Category::Compliance => "Trade Policy and Compliance",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordinal risk level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    /// Intrinsic rank, LOW=1 .. CRITICAL=4.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Location
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Free-text place, optionally pinned to coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

pub const GLOBAL_LOCATION: &str = "global";

impl Location {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            coordinates: None,
        }
    }

    pub fn at(name: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            name: name.into(),
            coordinates: Some(Coordinates { lat, lon }),
        }
    }

    pub fn global() -> Self {
        Self::named(GLOBAL_LOCATION)
    }

    pub fn is_global(&self) -> bool {
        self.name.eq_ignore_ascii_case(GLOBAL_LOCATION)
    }

    /// Whole-word match in either direction ("Port of Los Angeles" matches
    /// "los angeles", "Asia" matches "Southeast Asia"); global matches everything.
    pub fn matches_region(&self, region: &str) -> bool {
        if self.is_global() {
            return true;
        }
        let name = words(&self.name);
        let region = words(region);
        if name.is_empty() || region.is_empty() {
            return false;
        }
        contains_words(&name, &region) || contains_words(&region, &name)
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn contains_words(haystack: &[String], needle: &[String]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.coordinates {
            Some(c) => write!(f, "{} ({:.2}, {:.2})", self.name, c.lat, c.lon),
            None => f.write_str(&self.name),
        }
    }
}

// =============================================================================
// Signals, factors, assessments
// =============================================================================

/// One normalized observation about a risk dimension from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSignal {
    pub source_id: String,
    pub category: Category,
    pub location: Location,
    pub severity: Severity,
    pub probability: f64,
    pub numeric_score: u8,
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
    pub narrative: String,
}

impl RiskSignal {
    /// Build a signal; probability and confidence are clamped to [0, 1] and
    /// `numeric_score` is derived from probability and severity rank.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_id: impl Into<String>,
        category: Category,
        location: Location,
        severity: Severity,
        probability: f64,
        confidence: f64,
        observed_at: DateTime<Utc>,
        narrative: impl Into<String>,
    ) -> Self {
        let probability = clamp_unit(probability);
        Self {
            source_id: source_id.into(),
            category,
            location,
            severity,
            probability,
            numeric_score: numeric_score(probability, severity),
            confidence: clamp_unit(confidence),
            observed_at,
            narrative: narrative.into(),
        }
    }
}

/// `probability * rank / 4` on a 0–100 scale.
pub fn numeric_score(probability: f64, severity: Severity) -> u8 {
    let max_rank = Severity::Critical.rank() as f64;
    let score = clamp_unit(probability) * severity.rank() as f64 / max_rank * 100.0;
    score.round().clamp(0.0, 100.0) as u8
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// One category's aggregated contribution to an assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub category: Category,
    pub factor_name: String,
    pub severity: Severity,
    pub probability: f64,
    pub weight: u32,
    pub contribution_score: f64,
    /// Mean signal confidence after health discounting.
    pub confidence: f64,
    pub signal_count: usize,
    pub narrative: String,
}

/// How a source answered during an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceMode {
    Live,
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProvenance {
    pub source_id: String,
    pub mode: ProvenanceMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub signal_count: usize,
}

/// Immutable result of one aggregation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub overall_tier: Severity,
    /// 0–100
    pub overall_score: f64,
    pub overall_score_raw: f64,
    pub contributing_factors: Vec<RiskFactor>,
    pub recommendations: Vec<String>,
    pub early_warnings: Vec<String>,
    pub confidence_score: f64,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub segment: String,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub time_horizon: String,
    #[serde(default)]
    pub sources: Vec<SourceProvenance>,
}

// =============================================================================
// Adapter health
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Down,
}

impl HealthStatus {
    /// One step toward healthy.
    pub fn improved(self) -> Self {
        match self {
            HealthStatus::Down => HealthStatus::Degraded,
            HealthStatus::Degraded | HealthStatus::Healthy => HealthStatus::Healthy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Down => "down",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of one adapter's health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterHealth {
    pub source_id: String,
    pub status: HealthStatus,
    pub last_success_at: Option<DateTime<Utc>>,
    pub rolling_error_count: u32,
    pub rolling_latency_ms: u64,
    pub sample_count: usize,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub live_calls: u64,
    pub simulated_calls: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
