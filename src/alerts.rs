//! Alerts raised by monitors.
//!
//! Two triggers: an assessment tier crossing upward into the alert tier, and
//! an adapter a monitor depends on entering `down`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scheduler::SignalClass;
use crate::types::{RiskAssessment, Severity};

/// Longest alert body before it is cut with an ellipsis.
const MAX_BODY_CHARS: usize = 280;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertKind {
    TierCrossing {
        previous: Option<Severity>,
        current: Severity,
        score: f64,
    },
    AdapterDown {
        source_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub monitor_id: String,
    pub signal_class: SignalClass,
    #[serde(flatten)]
    pub kind: AlertKind,
    pub title: String,
    pub body: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn tier_crossing(
        monitor_id: &str,
        signal_class: SignalClass,
        previous: Option<Severity>,
        assessment: &RiskAssessment,
    ) -> Self {
        let title = format!(
            "{} risk is {} ({:.0}/100)",
            signal_class.label(),
            assessment.overall_tier,
            assessment.overall_score
        );
        let mut lines: Vec<String> = Vec::new();
        if let Some(factor) = assessment
            .contributing_factors
            .iter()
            .max_by(|a, b| a.contribution_score.total_cmp(&b.contribution_score))
        {
            lines.push(format!("{}: {}", factor.factor_name, factor.narrative));
        }
        if let Some(first) = assessment.recommendations.first() {
            lines.push(format!("Recommended: {}", first));
        }
        Self::build(
            monitor_id,
            signal_class,
            AlertKind::TierCrossing {
                previous,
                current: assessment.overall_tier,
                score: assessment.overall_score,
            },
            title,
            lines.join("\n"),
        )
    }

    pub fn adapter_down(monitor_id: &str, signal_class: SignalClass, source_id: &str, last_error: Option<&str>) -> Self {
        let title = format!("{} source is down", source_id);
        let body = match last_error {
            Some(error) => format!("Serving simulated data. Last error: {}", error),
            None => "Serving simulated data.".to_string(),
        };
        Self::build(
            monitor_id,
            signal_class,
            AlertKind::AdapterDown {
                source_id: source_id.to_string(),
            },
            title,
            body,
        )
    }

    fn build(monitor_id: &str, signal_class: SignalClass, kind: AlertKind, title: String, body: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            monitor_id: monitor_id.to_string(),
            signal_class,
            kind,
            title,
            body: truncate(&body, MAX_BODY_CHARS),
            raised_at: Utc::now(),
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.signal_class, self.title)?;
        if !self.body.is_empty() {
            write!(f, " - {}", self.body.replace('\n', " | "))?;
        }
        Ok(())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, RiskFactor};

    fn assessment(tier: Severity, narrative: &str) -> RiskAssessment {
        RiskAssessment {
            overall_tier: tier,
            overall_score: 63.75,
            overall_score_raw: 2.55,
            contributing_factors: vec![RiskFactor {
                category: Category::Shipping,
                factor_name: "Shipping Delays".to_string(),
                severity: Severity::High,
                probability: 0.9,
                weight: 3,
                contribution_score: 2.7,
                confidence: 0.8,
                signal_count: 1,
                narrative: narrative.to_string(),
            }],
            recommendations: vec!["Establish alternative shipping routes and carriers".to_string()],
            early_warnings: Vec::new(),
            confidence_score: 0.8,
            generated_at: Utc::now(),
            segment: "automotive".to_string(),
            regions: vec!["Asia".to_string()],
            time_horizon: "30d".to_string(),
            sources: Vec::new(),
        }
    }

    #[test]
    fn test_tier_crossing_formatting() {
        let alert = Alert::tier_crossing(
            "m-1",
            SignalClass::ShippingData,
            Some(Severity::Medium),
            &assessment(Severity::High, "Average delay 24.0h"),
        );
        assert_eq!(alert.title, "Shipping risk is HIGH (64/100)");
        assert!(alert.body.starts_with("Shipping Delays: Average delay 24.0h"));
        assert!(alert.body.ends_with("Recommended: Establish alternative shipping routes and carriers"));
        let json = serde_json::to_value(&alert).expect("json");
        assert_eq!(json["kind"], "tier_crossing");
        assert_eq!(json["previous"], "MEDIUM");
        assert_eq!(json["signal_class"], "shipping_data");
    }

    #[test]
    fn test_long_body_is_truncated() {
        let long = "x".repeat(1000);
        let alert = Alert::tier_crossing("m-1", SignalClass::NewsMonitoring, None, &assessment(Severity::High, &long));
        assert!(alert.body.ends_with("..."));
        assert_eq!(alert.body.chars().count(), MAX_BODY_CHARS + 3);
    }

    #[test]
    fn test_adapter_down_display() {
        let alert = Alert::adapter_down("m-2", SignalClass::WeatherData, "weather", Some("timed out"));
        assert_eq!(
            alert.to_string(),
            "[weather_data] weather source is down - Serving simulated data. Last error: timed out"
        );
    }
}
