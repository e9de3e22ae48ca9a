//! Raw payloads to canonical `RiskSignal`s.
//!
//! Classification is driven by declarative breakpoint scales. Live and
//! simulated payloads go through the same rules, and normalization is pure:
//! the same payload always yields the same signals.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::geo;
use crate::sources::economic::{EconomicSnapshot, SeriesQuote};
use crate::sources::imagery::ImageryAnalysis;
use crate::sources::news::NewsDigest;
use crate::sources::vessels::VesselReport;
use crate::sources::weather::{WeatherObservation, WeatherReport};
use crate::sources::{RawPayload, RawResult, SourceKind};
use crate::types::{Category, Location, RiskSignal, Severity};

// =============================================================================
// Breakpoint scales
// =============================================================================

/// How a value is compared against step thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// value > threshold
    Above,
    /// value < threshold
    Below,
    /// value >= threshold
    AtLeast,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub severity: Severity,
    pub probability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub threshold: f64,
    pub severity: Severity,
    pub probability: f64,
}

/// Ordered steps, most severe first. The first matching step wins; otherwise
/// the floor applies (no floor means no signal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    pub direction: Direction,
    pub steps: Vec<Breakpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor: Option<Level>,
}

impl Scale {
    fn new(direction: Direction, steps: [(f64, Severity, f64); 3], floor: Option<(Severity, f64)>) -> Self {
        Self {
            direction,
            steps: steps
                .iter()
                .map(|&(threshold, severity, probability)| Breakpoint {
                    threshold,
                    severity,
                    probability,
                })
                .collect(),
            floor: floor.map(|(severity, probability)| Level { severity, probability }),
        }
    }

    pub fn classify(&self, value: f64) -> Option<Level> {
        if !value.is_finite() {
            return self.floor;
        }
        self.steps
            .iter()
            .find(|step| match self.direction {
                Direction::Above => value > step.threshold,
                Direction::Below => value < step.threshold,
                Direction::AtLeast => value >= step.threshold,
            })
            .map(|step| Level {
                severity: step.severity,
                probability: step.probability,
            })
            .or(self.floor)
    }

    fn validate(&self, name: &str) -> Result<(), PipelineError> {
        let fail = |msg: &str| {
            Err(PipelineError::Configuration(format!("breakpoints.{}: {}", name, msg)))
        };
        let probabilities = self
            .steps
            .iter()
            .map(|s| s.probability)
            .chain(self.floor.map(|f| f.probability));
        for p in probabilities {
            if !(0.0..=1.0).contains(&p) {
                return fail("probabilities must be within [0, 1]");
            }
        }
        for pair in self.steps.windows(2) {
            let ordered = match self.direction {
                Direction::Above | Direction::AtLeast => pair[0].threshold > pair[1].threshold,
                Direction::Below => pair[0].threshold < pair[1].threshold,
            };
            if !ordered || pair[0].severity < pair[1].severity {
                return fail("steps must run from most to least severe");
            }
        }
        Ok(())
    }
}

/// Keyword lists for news classification. Matching is whole-word and case-insensitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordRules {
    pub negative: Vec<String>,
    pub positive: Vec<String>,
    pub cyber: Vec<String>,
    pub compliance: Vec<String>,
    /// Region name to the keywords that place an article there.
    pub regions: BTreeMap<String, Vec<String>>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

impl Default for KeywordRules {
    fn default() -> Self {
        let mut regions = BTreeMap::new();
        regions.insert("Asia".to_string(), words(&["asia", "china", "chinese", "asian"]));
        regions.insert("Europe".to_string(), words(&["europe", "european", "eu"]));
        regions.insert("Middle East".to_string(), words(&["middle east", "red sea", "suez"]));
        regions.insert(
            "North America".to_string(),
            words(&["america", "usa", "united states", "canada", "mexico"]),
        );
        Self {
            negative: words(&[
                "strike", "strikes", "delay", "delays", "delayed", "disruption", "disruptions",
                "disrupt", "disrupts", "disrupted", "shortage", "shortages", "crisis",
                "congestion", "closure", "backlog", "attack", "halted", "blockade", "sanctions",
            ]),
            positive: words(&[
                "recovery", "recover", "recovers", "improvement", "improved", "solution",
                "agreement", "resolved", "normalising", "normalizing", "reopened",
            ]),
            cyber: words(&[
                "cyber", "cyberattack", "cyber attack", "ransomware", "malware", "hack", "hacked",
                "breach",
            ]),
            compliance: words(&[
                "sanction", "sanctions", "tariff", "tariffs", "export controls", "trade policy",
                "embargo", "customs", "regulation",
            ]),
            regions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointTables {
    #[serde(default = "default_vessel_delay_hours")]
    pub vessel_delay_hours: Scale,
    #[serde(default = "default_wind_knots")]
    pub wind_knots: Scale,
    #[serde(default = "default_visibility_km")]
    pub visibility_km: Scale,
    #[serde(default = "default_news_keyword_hits")]
    pub news_keyword_hits: Scale,
    #[serde(default = "default_commodity_change_pct")]
    pub commodity_change_pct: Scale,
    #[serde(default = "default_currency_change_pct")]
    pub currency_change_pct: Scale,
    #[serde(default = "default_berth_occupancy_pct")]
    pub berth_occupancy_pct: Scale,
    #[serde(default)]
    pub keywords: KeywordRules,
}

use Severity::{Critical, High, Low, Medium};

fn default_vessel_delay_hours() -> Scale {
    Scale::new(
        Direction::Above,
        [(48.0, Critical, 0.95), (20.0, High, 0.9), (10.0, Medium, 0.6)],
        Some((Low, 0.2)),
    )
}

fn default_wind_knots() -> Scale {
    Scale::new(
        Direction::Above,
        [(60.0, Critical, 0.9), (40.0, High, 0.8), (25.0, Medium, 0.5)],
        Some((Low, 0.2)),
    )
}

fn default_visibility_km() -> Scale {
    Scale::new(
        Direction::Below,
        [(1.0, Critical, 0.9), (3.0, High, 0.8), (5.0, Medium, 0.5)],
        Some((Low, 0.2)),
    )
}

fn default_news_keyword_hits() -> Scale {
    Scale::new(
        Direction::AtLeast,
        [(4.0, Critical, 0.9), (2.0, High, 0.7), (1.0, Medium, 0.45)],
        None,
    )
}

fn default_commodity_change_pct() -> Scale {
    Scale::new(
        Direction::Above,
        [(15.0, Critical, 0.85), (7.0, High, 0.7), (3.0, Medium, 0.5)],
        Some((Low, 0.15)),
    )
}

fn default_currency_change_pct() -> Scale {
    Scale::new(
        Direction::Above,
        [(8.0, Critical, 0.85), (4.0, High, 0.7), (2.0, Medium, 0.45)],
        Some((Low, 0.1)),
    )
}

fn default_berth_occupancy_pct() -> Scale {
    Scale::new(
        Direction::Above,
        [(90.0, Critical, 0.85), (80.0, High, 0.75), (60.0, Medium, 0.5)],
        Some((Low, 0.2)),
    )
}

impl Default for BreakpointTables {
    fn default() -> Self {
        Self {
            vessel_delay_hours: default_vessel_delay_hours(),
            wind_knots: default_wind_knots(),
            visibility_km: default_visibility_km(),
            news_keyword_hits: default_news_keyword_hits(),
            commodity_change_pct: default_commodity_change_pct(),
            currency_change_pct: default_currency_change_pct(),
            berth_occupancy_pct: default_berth_occupancy_pct(),
            keywords: KeywordRules::default(),
        }
    }
}

impl BreakpointTables {
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.vessel_delay_hours.validate("vesselDelayHours")?;
        self.wind_knots.validate("windKnots")?;
        self.visibility_km.validate("visibilityKm")?;
        self.news_keyword_hits.validate("newsKeywordHits")?;
        self.commodity_change_pct.validate("commodityChangePct")?;
        self.currency_change_pct.validate("currencyChangePct")?;
        self.berth_occupancy_pct.validate("berthOccupancyPct")?;
        Ok(())
    }
}

// =============================================================================
// Keyword matching
// =============================================================================

/// Compiled whole-word alternation over a keyword list.
#[derive(Debug, Clone)]
struct KeywordSet {
    pattern: Option<Regex>,
}

impl KeywordSet {
    fn compile(keywords: &[String]) -> Result<Self, PipelineError> {
        let alternatives: Vec<String> = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(regex::escape)
            .collect();
        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }
        let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))
            .map_err(|e| PipelineError::Configuration(format!("keyword pattern: {}", e)))?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    fn count(&self, text: &str) -> usize {
        self.pattern
            .as_ref()
            .map(|p| p.find_iter(text).count())
            .unwrap_or(0)
    }
}

// =============================================================================
// Normalizer
// =============================================================================

pub struct Normalizer {
    tables: BreakpointTables,
    negative: KeywordSet,
    positive: KeywordSet,
    cyber: KeywordSet,
    compliance: KeywordSet,
    regions: Vec<(String, KeywordSet)>,
}

impl Normalizer {
    pub fn new(tables: BreakpointTables) -> Result<Self, PipelineError> {
        let keywords = &tables.keywords;
        let regions = keywords
            .regions
            .iter()
            .map(|(name, list)| Ok((name.clone(), KeywordSet::compile(list)?)))
            .collect::<Result<Vec<_>, PipelineError>>()?;
        Ok(Self {
            negative: KeywordSet::compile(&keywords.negative)?,
            positive: KeywordSet::compile(&keywords.positive)?,
            cyber: KeywordSet::compile(&keywords.cyber)?,
            compliance: KeywordSet::compile(&keywords.compliance)?,
            regions,
            tables,
        })
    }

    pub fn tables(&self) -> &BreakpointTables {
        &self.tables
    }

    pub fn normalize(&self, result: &RawResult) -> Vec<RiskSignal> {
        self.normalize_payload(result.payload())
    }

    pub fn normalize_payload(&self, payload: &RawPayload) -> Vec<RiskSignal> {
        match payload {
            RawPayload::Vessels(report) => self.vessels(report),
            RawPayload::Weather(report) => self.weather(report),
            RawPayload::News(digest) => self.news(digest),
            RawPayload::Economic(snapshot) => self.economic(snapshot),
            RawPayload::Imagery(analysis) => self.imagery(analysis),
        }
    }

    fn vessels(&self, report: &VesselReport) -> Vec<RiskSignal> {
        let (Some(level), Some(worst)) = (
            self.tables.vessel_delay_hours.classify(report.average_delay_hours),
            report.most_delayed(),
        ) else {
            return Vec::new();
        };
        let narrative = format!(
            "Average delay {:.1}h across {} vessels in {}; most delayed: {} ({:.1}h)",
            report.average_delay_hours,
            report.vessels.len(),
            report.region,
            worst.ship_name,
            worst.delay_hours
        );
        vec![RiskSignal::new(
            SourceKind::Vessels.source_id(),
            Category::Shipping,
            region_location(&report.region),
            level.severity,
            level.probability,
            report.confidence,
            report.observed_at,
            narrative,
        )]
    }

    fn weather_level(&self, obs: &WeatherObservation) -> Option<Level> {
        let wind = self.tables.wind_knots.classify(obs.wind_speed_knots);
        let visibility = self.tables.visibility_km.classify(obs.visibility_km);
        match (wind, visibility) {
            (Some(w), Some(v)) => {
                let v_worse = (v.severity, v.probability) > (w.severity, w.probability);
                Some(if v_worse { v } else { w })
            }
            (w, v) => w.or(v),
        }
    }

    fn weather(&self, report: &WeatherReport) -> Vec<RiskSignal> {
        report
            .observations
            .iter()
            .filter_map(|obs| {
                let level = self.weather_level(obs)?;
                Some(RiskSignal::new(
                    SourceKind::Weather.source_id(),
                    Category::Weather,
                    Location::at(obs.location.clone(), obs.lat, obs.lon),
                    level.severity,
                    level.probability,
                    report.confidence,
                    report.observed_at,
                    format!(
                        "{} at {}: wind {:.0} kt, visibility {:.1} km",
                        obs.condition, obs.location, obs.wind_speed_knots, obs.visibility_km
                    ),
                ))
            })
            .collect()
    }

    fn news(&self, digest: &NewsDigest) -> Vec<RiskSignal> {
        digest
            .articles
            .iter()
            .filter_map(|article| {
                let text = article.text();
                let net = self.negative.count(&text) as i64 - self.positive.count(&text) as i64;
                if net < 1 {
                    return None;
                }
                let level = self.tables.news_keyword_hits.classify(net as f64)?;
                let category = if self.cyber.count(&text) > 0 {
                    Category::Cyber
                } else if self.compliance.count(&text) > 0 {
                    Category::Compliance
                } else {
                    Category::News
                };
                Some(RiskSignal::new(
                    SourceKind::News.source_id(),
                    category,
                    self.article_location(&text),
                    level.severity,
                    level.probability,
                    digest.confidence,
                    digest.observed_at,
                    format!("{} ({})", article.title, article.source),
                ))
            })
            .collect()
    }

    /// Port named in the text, else a region keyword, else global.
    fn article_location(&self, text: &str) -> Location {
        let lowered = text.to_lowercase();
        if let Some(port) = geo::PORTS
            .iter()
            .find(|p| lowered.contains(&p.name.to_lowercase()))
        {
            return port.location();
        }
        self.regions
            .iter()
            .find(|(_, set)| set.count(text) > 0)
            .map(|(name, _)| Location::named(name.clone()))
            .unwrap_or_else(Location::global)
    }

    fn economic(&self, snapshot: &EconomicSnapshot) -> Vec<RiskSignal> {
        let commodity = &self.tables.commodity_change_pct;
        let currency = &self.tables.currency_change_pct;
        snapshot
            .commodities
            .iter()
            .chain(snapshot.indicators.iter())
            .map(|quote| (quote, commodity))
            .chain(snapshot.currencies.iter().map(|quote| (quote, currency)))
            .filter_map(|(quote, scale)| {
                let level = scale.classify(quote.change_percent.abs())?;
                Some(RiskSignal::new(
                    SourceKind::Economic.source_id(),
                    Category::Economic,
                    Location::global(),
                    level.severity,
                    level.probability,
                    snapshot.confidence,
                    snapshot.observed_at,
                    quote_narrative(quote),
                ))
            })
            .collect()
    }

    fn imagery(&self, analysis: &ImageryAnalysis) -> Vec<RiskSignal> {
        let Some(level) = self.tables.berth_occupancy_pct.classify(analysis.berth_occupancy_pct) else {
            return Vec::new();
        };
        vec![RiskSignal::new(
            SourceKind::Imagery.source_id(),
            Category::Imagery,
            region_location(&analysis.port_name),
            level.severity,
            level.probability,
            analysis.confidence,
            analysis.observed_at,
            format!(
                "{}: berth occupancy {:.0}%, {} vessels in scene",
                analysis.port_name, analysis.berth_occupancy_pct, analysis.vessel_count
            ),
        )]
    }
}

fn region_location(name: &str) -> Location {
    geo::find_port(name)
        .map(|p| p.location())
        .unwrap_or_else(|| Location::named(name))
}

fn quote_narrative(quote: &SeriesQuote) -> String {
    format!(
        "{} moved {:+.1}% ({} -> {})",
        quote.name, quote.change_percent, quote.previous_value, quote.value
    )
}
