//! Aggregation of normalized signals into one risk assessment.
//!
//! Signals are grouped by category. Each group becomes a `RiskFactor` whose
//! severity is the worst signal's and whose probability is the group mean.
//! The raw overall score is the mean of `probability * weight(severity)`
//! across factors; the tier comes from fixed thresholds on that raw score.
//!
//! Every sum runs over values sorted first, so the result does not depend on
//! the order signals arrived in.

pub mod rules;

use std::collections::BTreeMap;

use chrono::Utc;

use crate::error::PipelineError;
use crate::health::HealthView;
use crate::types::{Category, RiskAssessment, RiskFactor, RiskSignal, Severity};

pub use self::rules::{AggregationConfig, HealthDiscounts, RiskRule, SeverityWeights, TierThresholds};

pub struct AggregationEngine {
    config: AggregationConfig,
}

impl AggregationEngine {
    pub fn new(config: AggregationConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Score a signal set. Context fields (segment, regions, horizon, sources)
    /// are left empty for the caller to fill.
    pub fn aggregate(&self, signals: &[RiskSignal], health: &HealthView) -> Result<RiskAssessment, PipelineError> {
        if signals.is_empty() {
            return Err(PipelineError::InsufficientSignal { signals_seen: 0 });
        }

        let discounted = |s: &RiskSignal| -> f64 {
            s.confidence * self.config.health_discounts.factor(health.status_of(&s.source_id))
        };

        let mut groups: BTreeMap<Category, Vec<&RiskSignal>> = BTreeMap::new();
        for signal in signals {
            groups.entry(signal.category).or_default().push(signal);
        }

        let factors: Vec<RiskFactor> = groups
            .into_iter()
            .map(|(category, group)| self.build_factor(category, &group, &discounted))
            .collect();

        let contributions: Vec<f64> = factors.iter().map(|f| f.contribution_score).collect();
        let overall_score_raw = ordered_mean(contributions);
        let overall_tier = self.config.thresholds.tier_for(overall_score_raw);
        let max_weight = self.config.weights.max().max(1) as f64;
        let overall_score = round_to(overall_score_raw / max_weight * 100.0, 1).clamp(0.0, 100.0);

        let confidence_score = round_to(ordered_mean(signals.iter().map(&discounted).collect()), 3);
        let (recommendations, early_warnings) = rules::lookup(&self.config.rules, &factors);

        log::debug!(
            "Aggregation: {} signals over {} factors, raw {:.3} -> {}",
            signals.len(),
            factors.len(),
            overall_score_raw,
            overall_tier
        );

        Ok(RiskAssessment {
            overall_tier,
            overall_score,
            overall_score_raw,
            contributing_factors: factors,
            recommendations,
            early_warnings,
            confidence_score,
            generated_at: Utc::now(),
            segment: String::new(),
            regions: Vec::new(),
            time_horizon: String::new(),
            sources: Vec::new(),
        })
    }

    fn build_factor(
        &self,
        category: Category,
        group: &[&RiskSignal],
        discounted: &impl Fn(&RiskSignal) -> f64,
    ) -> RiskFactor {
        let severity = group.iter().map(|s| s.severity).max().unwrap_or(Severity::Low);
        let probability = ordered_mean(group.iter().map(|s| s.probability).collect());
        let weight = self.config.weights.get(severity);
        let confidence = ordered_mean(group.iter().map(|s| discounted(s)).collect());
        let narrative = group
            .iter()
            .find(|s| s.severity == severity)
            .map(|s| s.narrative.clone())
            .unwrap_or_default();

        RiskFactor {
            category,
            factor_name: category.factor_name().to_string(),
            severity,
            probability,
            weight,
            contribution_score: probability * weight as f64,
            confidence,
            signal_count: group.len(),
            narrative,
        }
    }
}

/// Mean over values summed in ascending order.
fn ordered_mean(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    values.iter().sum::<f64>() / values.len() as f64
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HealthStatus, Location};

    fn signal(source: &str, category: Category, severity: Severity, probability: f64, confidence: f64) -> RiskSignal {
        RiskSignal::new(
            source,
            category,
            Location::named("Port of Los Angeles"),
            severity,
            probability,
            confidence,
            Utc::now(),
            format!("{} {}", category, severity),
        )
    }

    fn engine() -> AggregationEngine {
        AggregationEngine::new(AggregationConfig::default()).expect("default config is valid")
    }

    #[test]
    fn test_shipping_and_weather_scenario_is_high() {
        let signals = vec![
            signal("vessels", Category::Shipping, Severity::High, 0.9, 0.8),
            signal("weather", Category::Weather, Severity::High, 0.8, 0.8),
        ];
        let assessment = engine().aggregate(&signals, &HealthView::default()).expect("assessment");
        assert!((assessment.overall_score_raw - 2.55).abs() < 1e-9);
        assert_eq!(assessment.overall_tier, Severity::High);
        assert!((assessment.overall_score - 63.8).abs() < 0.06);
        assert_eq!(assessment.contributing_factors.len(), 2);
        assert_eq!(assessment.contributing_factors[0].category, Category::Shipping);
        assert!(assessment
            .recommendations
            .contains(&"Establish alternative shipping routes and carriers".to_string()));
    }

    #[test]
    fn test_single_medium_weather_is_low() {
        let signals = vec![signal("weather", Category::Weather, Severity::Medium, 0.3, 0.8)];
        let assessment = engine().aggregate(&signals, &HealthView::default()).expect("assessment");
        assert!((assessment.overall_score_raw - 0.6).abs() < 1e-9);
        assert_eq!(assessment.overall_tier, Severity::Low);
    }

    #[test]
    fn test_empty_input_is_insufficient_signal() {
        let err = engine().aggregate(&[], &HealthView::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientSignal { signals_seen: 0 }));
    }

    #[test]
    fn test_down_adapter_discounts_confidence_only() {
        let signals = vec![signal("news", Category::News, Severity::High, 0.7, 0.8)];
        let healthy = engine().aggregate(&signals, &HealthView::default()).expect("assessment");
        let down = engine()
            .aggregate(&signals, &HealthView::default().with("news", HealthStatus::Down))
            .expect("assessment");
        assert_eq!(healthy.confidence_score, 0.8);
        assert_eq!(down.confidence_score, 0.32);
        assert_eq!(healthy.overall_score_raw, down.overall_score_raw);
        assert_eq!(healthy.overall_tier, down.overall_tier);

        let degraded = engine()
            .aggregate(&signals, &HealthView::default().with("news", HealthStatus::Degraded))
            .expect("assessment");
        assert_eq!(degraded.confidence_score, 0.56);
    }

    #[test]
    fn test_score_independent_of_input_order() {
        let mut signals = vec![
            signal("vessels", Category::Shipping, Severity::High, 0.9, 0.8),
            signal("vessels", Category::Shipping, Severity::Low, 0.13, 0.7),
            signal("weather", Category::Weather, Severity::Medium, 0.31, 0.6),
            signal("news", Category::Cyber, Severity::Critical, 0.77, 0.9),
            signal("economic", Category::Economic, Severity::Medium, 0.41, 0.75),
            signal("economic", Category::Economic, Severity::High, 0.67, 0.75),
        ];
        let health = HealthView::default().with("economic", HealthStatus::Degraded);
        let baseline = engine().aggregate(&signals, &health).expect("assessment");

        for shift in 1..signals.len() {
            signals.rotate_left(shift);
            let other = engine().aggregate(&signals, &health).expect("assessment");
            assert_eq!(other.overall_score_raw.to_bits(), baseline.overall_score_raw.to_bits());
            assert_eq!(other.overall_tier, baseline.overall_tier);
            assert_eq!(other.confidence_score, baseline.confidence_score);
        }
        signals.reverse();
        let reversed = engine().aggregate(&signals, &health).expect("assessment");
        assert_eq!(reversed.overall_score_raw.to_bits(), baseline.overall_score_raw.to_bits());
        assert_eq!(reversed.recommendations, baseline.recommendations);
    }

    #[test]
    fn test_raising_one_signal_never_lowers_score() {
        let base = vec![
            signal("vessels", Category::Shipping, Severity::Medium, 0.5, 0.8),
            signal("weather", Category::Weather, Severity::Low, 0.2, 0.8),
        ];
        let before = engine().aggregate(&base, &HealthView::default()).expect("assessment");

        let mut more_likely = base.clone();
        more_likely[1] = signal("weather", Category::Weather, Severity::Low, 0.6, 0.8);
        let after = engine().aggregate(&more_likely, &HealthView::default()).expect("assessment");
        assert!(after.overall_score_raw >= before.overall_score_raw);
        assert!(after.overall_tier >= before.overall_tier);

        let mut more_severe = base.clone();
        more_severe[0] = signal("vessels", Category::Shipping, Severity::Critical, 0.5, 0.8);
        let after = engine().aggregate(&more_severe, &HealthView::default()).expect("assessment");
        assert!(after.overall_score_raw >= before.overall_score_raw);
    }

    #[test]
    fn test_critical_tier_only_in_strict_mode() {
        let signals = vec![signal("news", Category::Cyber, Severity::Critical, 0.95, 0.9)];
        let default = engine().aggregate(&signals, &HealthView::default()).expect("assessment");
        assert!((default.overall_score_raw - 3.8).abs() < 1e-9);
        assert_eq!(default.overall_tier, Severity::High);

        let strict = AggregationEngine::new(AggregationConfig {
            thresholds: TierThresholds::strict(),
            ..Default::default()
        })
        .expect("valid");
        let assessment = strict.aggregate(&signals, &HealthView::default()).expect("assessment");
        assert_eq!(assessment.overall_tier, Severity::Critical);
    }

    #[test]
    fn test_factor_uses_worst_severity_and_mean_probability() {
        let signals = vec![
            signal("vessels", Category::Shipping, Severity::Low, 0.2, 0.8),
            signal("vessels", Category::Shipping, Severity::High, 0.6, 0.6),
        ];
        let assessment = engine().aggregate(&signals, &HealthView::default()).expect("assessment");
        let factor = &assessment.contributing_factors[0];
        assert_eq!(factor.severity, Severity::High);
        assert!((factor.probability - 0.4).abs() < 1e-9);
        assert_eq!(factor.weight, 3);
        assert!((factor.contribution_score - 1.2).abs() < 1e-9);
        assert_eq!(factor.signal_count, 2);
        assert_eq!(factor.narrative, "shipping HIGH");
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let mut config = AggregationConfig::default();
        config.weights.set(Severity::Critical, 2);
        assert!(AggregationEngine::new(config).is_err());
    }
}
