//! Declarative tables behind aggregation: severity weights, tier thresholds,
//! health discounts and the recommendation / early-warning rules.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::types::{Category, HealthStatus, RiskFactor, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityWeights {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
    pub critical: u32,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            low: 1,
            medium: 2,
            high: 3,
            critical: 4,
        }
    }
}

impl SeverityWeights {
    pub fn get(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Low => self.low,
            Severity::Medium => self.medium,
            Severity::High => self.high,
            Severity::Critical => self.critical,
        }
    }

    pub fn set(&mut self, severity: Severity, weight: u32) {
        match severity {
            Severity::Low => self.low = weight,
            Severity::Medium => self.medium = weight,
            Severity::High => self.high = weight,
            Severity::Critical => self.critical = weight,
        }
    }

    pub fn max(&self) -> u32 {
        Severity::ALL.iter().map(|s| self.get(*s)).max().unwrap_or(1)
    }
}

/// Raw-score cut points. A tier applies when the score is strictly above it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierThresholds {
    pub medium: f64,
    pub high: f64,
    /// Unset means CRITICAL is never assigned as an overall tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical: Option<f64>,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            medium: 1.5,
            high: 2.0,
            critical: None,
        }
    }
}

impl TierThresholds {
    /// Defaults plus a CRITICAL tier above 3.0.
    pub fn strict() -> Self {
        Self {
            critical: Some(3.0),
            ..Self::default()
        }
    }

    pub fn tier_for(&self, raw_score: f64) -> Severity {
        match self.critical {
            Some(critical) if raw_score > critical => Severity::Critical,
            _ if raw_score > self.high => Severity::High,
            _ if raw_score > self.medium => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

/// Confidence multipliers for signals from unhealthy adapters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthDiscounts {
    pub degraded: f64,
    pub down: f64,
}

impl Default for HealthDiscounts {
    fn default() -> Self {
        Self {
            degraded: 0.7,
            down: 0.4,
        }
    }
}

impl HealthDiscounts {
    pub fn factor(&self, status: HealthStatus) -> f64 {
        match status {
            HealthStatus::Healthy => 1.0,
            HealthStatus::Degraded => self.degraded,
            HealthStatus::Down => self.down,
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Fires for factors of `category` (any category when unset) at or above `min_severity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    pub min_severity: Severity,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub early_warnings: Vec<String>,
}

impl RiskRule {
    fn new(category: Option<Category>, min_severity: Severity, recommendations: &[&str], early_warnings: &[&str]) -> Self {
        Self {
            category,
            min_severity,
            recommendations: recommendations.iter().map(|s| s.to_string()).collect(),
            early_warnings: early_warnings.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn matches(&self, factor: &RiskFactor) -> bool {
        self.category.map_or(true, |c| c == factor.category) && factor.severity >= self.min_severity
    }
}

pub fn default_rules() -> Vec<RiskRule> {
    use Category::*;
    use Severity::{Critical, High, Medium};
    vec![
        RiskRule::new(
            None,
            Critical,
            &["Escalate to supply chain leadership and activate business continuity plans"],
            &[],
        ),
        RiskRule::new(
            Some(Shipping),
            Medium,
            &["Implement real-time tracking for high-value shipments"],
            &["Monitor vessel delays on key shipping lanes"],
        ),
        RiskRule::new(
            Some(Shipping),
            High,
            &[
                "Establish alternative shipping routes and carriers",
                "Increase safety stock for critical components by 20%",
            ],
            &["Vessel delays exceed 20 hours in monitored regions"],
        ),
        RiskRule::new(
            Some(Weather),
            Medium,
            &["Review weather contingency plans for affected ports"],
            &["Track storm systems along primary shipping routes"],
        ),
        RiskRule::new(
            Some(Weather),
            High,
            &["Reroute shipments away from severe weather zones"],
            &[],
        ),
        RiskRule::new(
            Some(News),
            Medium,
            &["Develop contingency plans for port disruptions"],
            &["Monitor labor negotiations and port operations news"],
        ),
        RiskRule::new(
            Some(News),
            High,
            &["Diversify supplier base across multiple geographic regions"],
            &[],
        ),
        RiskRule::new(
            Some(Economic),
            Medium,
            &["Review hedging positions for volatile commodities and currencies"],
            &["Watch commodity and currency volatility"],
        ),
        RiskRule::new(
            Some(Economic),
            High,
            &["Lock in forward contracts for critical inputs"],
            &[],
        ),
        RiskRule::new(
            Some(Imagery),
            Medium,
            &["Book alternative berths or ports for upcoming arrivals"],
            &["Port congestion building at monitored terminals"],
        ),
        RiskRule::new(
            Some(Cyber),
            Medium,
            &["Verify cyber incident response plans with logistics partners"],
            &["Watch for attacks on logistics and terminal systems"],
        ),
        RiskRule::new(
            Some(Compliance),
            Medium,
            &["Review exposure to new tariffs and sanctions"],
            &["Watch for escalating trade policy announcements"],
        ),
    ]
}

/// Recommendations and early warnings for a factor set, de-duplicated in
/// first-seen order. Factors are visited in the order given, rules in table order.
pub fn lookup(rules: &[RiskRule], factors: &[RiskFactor]) -> (Vec<String>, Vec<String>) {
    let mut recommendations: Vec<String> = Vec::new();
    let mut early_warnings: Vec<String> = Vec::new();
    for factor in factors {
        for rule in rules.iter().filter(|r| r.matches(factor)) {
            for r in &rule.recommendations {
                if !recommendations.contains(r) {
                    recommendations.push(r.clone());
                }
            }
            for w in &rule.early_warnings {
                if !early_warnings.contains(w) {
                    early_warnings.push(w.clone());
                }
            }
        }
    }
    (recommendations, early_warnings)
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationConfig {
    #[serde(default)]
    pub weights: SeverityWeights,
    #[serde(default)]
    pub thresholds: TierThresholds,
    #[serde(default)]
    pub health_discounts: HealthDiscounts,
    #[serde(default = "default_rules")]
    pub rules: Vec<RiskRule>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            weights: SeverityWeights::default(),
            thresholds: TierThresholds::default(),
            health_discounts: HealthDiscounts::default(),
            rules: default_rules(),
        }
    }
}

impl AggregationConfig {
    /// Rejects tables that would break monotonicity of the score.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let w = &self.weights;
        if w.low == 0 || !(w.low <= w.medium && w.medium <= w.high && w.high <= w.critical) {
            return Err(PipelineError::Configuration(
                "aggregation.weights must be positive and non-decreasing in severity".to_string(),
            ));
        }
        let t = &self.thresholds;
        let critical_ok = t.critical.map_or(true, |c| c.is_finite() && c > t.high);
        if !(t.medium.is_finite() && t.high.is_finite() && t.medium <= t.high && critical_ok) {
            return Err(PipelineError::Configuration(
                "aggregation.thresholds must satisfy medium <= high < critical".to_string(),
            ));
        }
        let d = &self.health_discounts;
        if !((0.0..=1.0).contains(&d.degraded) && (0.0..=1.0).contains(&d.down)) {
            return Err(PipelineError::Configuration(
                "aggregation.healthDiscounts must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factor(category: Category, severity: Severity) -> RiskFactor {
        RiskFactor {
            category,
            factor_name: category.factor_name().to_string(),
            severity,
            probability: 0.5,
            weight: SeverityWeights::default().get(severity),
            contribution_score: 0.0,
            confidence: 0.8,
            signal_count: 1,
            narrative: String::new(),
        }
    }

    #[test]
    fn test_tier_boundaries() {
        let t = TierThresholds::default();
        assert_eq!(t.tier_for(2.0), Severity::Medium);
        assert_eq!(t.tier_for(2.01), Severity::High);
        assert_eq!(t.tier_for(1.5), Severity::Low);
        assert_eq!(t.tier_for(3.9), Severity::High);
        assert_eq!(TierThresholds::strict().tier_for(3.01), Severity::Critical);
        assert_eq!(TierThresholds::strict().tier_for(3.0), Severity::High);
    }

    #[test]
    fn test_lookup_dedupes_and_keeps_order() {
        let factors = vec![
            factor(Category::Shipping, Severity::Critical),
            factor(Category::Weather, Severity::Critical),
        ];
        let (recs, warnings) = lookup(&default_rules(), &factors);
        assert_eq!(
            recs.first().map(String::as_str),
            Some("Escalate to supply chain leadership and activate business continuity plans")
        );
        assert_eq!(
            recs.iter()
                .filter(|r| r.starts_with("Escalate"))
                .count(),
            1
        );
        assert_eq!(warnings[0], "Monitor vessel delays on key shipping lanes");
        assert_eq!(lookup(&default_rules(), &factors), (recs, warnings));
    }

    #[test]
    fn test_low_factors_fire_no_rules() {
        let (recs, warnings) = lookup(&default_rules(), &[factor(Category::Economic, Severity::Low)]);
        assert!(recs.is_empty() && warnings.is_empty());
    }

    #[test]
    fn test_validate() {
        assert!(AggregationConfig::default().validate().is_ok());
        let mut config = AggregationConfig::default();
        config.thresholds.critical = Some(1.0);
        assert!(config.validate().is_err());
        let mut config = AggregationConfig::default();
        config.health_discounts.down = 1.4;
        assert!(config.validate().is_err());
    }
}
