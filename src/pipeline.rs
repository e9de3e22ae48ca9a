//! Fetch, normalize and aggregate in one cycle.
//!
//! A cycle turns an `AssessmentScope` into a request plan (one or more
//! requests per source kind), fans the plan out to the adapters with bounded
//! concurrency, puts the results back in plan order, normalizes them, drops
//! signals outside the requested regions and hands the rest to the
//! aggregation engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::aggregate::AggregationEngine;
use crate::config::Config;
use crate::error::{PipelineError, ValidationError};
use crate::geo::{self, Port};
use crate::health::HealthMonitor;
use crate::normalize::Normalizer;
use crate::sources::economic::EconomicQuery;
use crate::sources::imagery::ImageryQuery;
use crate::sources::news::NewsQuery;
use crate::sources::vessels::VesselQuery;
use crate::sources::weather::{WeatherQuery, WeatherSite};
use crate::sources::{RawResult, SourceAdapter, SourceKind, SourceRequest};
use crate::types::{AdapterHealth, Location, ProvenanceMode, RiskAssessment, RiskSignal, SourceProvenance};

/// Ports used for coordinate-based sources when no region is given.
const DEFAULT_PORTS: [&str; 4] = ["Shanghai", "Singapore", "Rotterdam", "Los Angeles"];

/// Imagery requests per cycle.
const MAX_IMAGERY_PORTS: usize = 4;

/// NewsAPI only searches about a month back.
const MAX_NEWS_LOOKBACK_DAYS: i64 = 30;

// =============================================================================
// Scope
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeHorizon {
    pub hours: u32,
}

impl TimeHorizon {
    /// Parse `<n>h`, `<n>d` or `<n>w` with `n > 0`.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let raw = raw.trim();
        let invalid = || ValidationError::new("time_horizon", format!("'{}' is not like 12h, 30d or 2w", raw));
        let unit = raw.chars().last().ok_or_else(invalid)?;
        let amount: u32 = raw[..raw.len() - unit.len_utf8()].parse().map_err(|_| invalid())?;
        let per_unit = match unit.to_ascii_lowercase() {
            'h' => 1,
            'd' => 24,
            'w' => 24 * 7,
            _ => return Err(invalid()),
        };
        if amount == 0 {
            return Err(invalid());
        }
        let hours = amount.checked_mul(per_unit).ok_or_else(invalid)?;
        Ok(Self { hours })
    }

    pub fn days_rounded_up(&self) -> u32 {
        self.hours.div_ceil(24)
    }
}

/// Validated inputs of one assessment.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentScope {
    pub segment: String,
    pub regions: Vec<String>,
    pub time_horizon: String,
    pub horizon: TimeHorizon,
}

impl AssessmentScope {
    pub fn parse(segment: &str, regions: &[String], time_horizon: &str) -> Result<Self, ValidationError> {
        let segment = segment.trim();
        if segment.is_empty() {
            return Err(ValidationError::new("segment", "must not be blank"));
        }
        let horizon = TimeHorizon::parse(time_horizon)?;
        let mut cleaned: Vec<String> = Vec::new();
        for region in regions.iter().map(|r| r.trim()).filter(|r| !r.is_empty()) {
            if !cleaned.iter().any(|c| c.eq_ignore_ascii_case(region)) {
                cleaned.push(region.to_string());
            }
        }
        Ok(Self {
            segment: segment.to_string(),
            regions: cleaned,
            time_horizon: time_horizon.trim().to_string(),
            horizon,
        })
    }

    /// Ports the coordinate-based sources should look at.
    pub fn ports(&self) -> Vec<&'static Port> {
        if self.regions.is_empty() {
            return DEFAULT_PORTS.iter().filter_map(|name| geo::find_port(name)).collect();
        }
        let mut ports: Vec<&'static Port> = Vec::new();
        for port in self.regions.iter().flat_map(|r| geo::resolve_region(r)) {
            if !ports.iter().any(|p| p.name == port.name) {
                ports.push(port);
            }
        }
        ports
    }

    /// Whether a signal location falls inside the requested regions.
    ///
    /// A known port is judged by its gazetteer entry alone. Other names match
    /// a region by whole words, or by naming one of the region's ports.
    pub fn covers(&self, location: &Location) -> bool {
        if self.regions.is_empty() || location.is_global() {
            return true;
        }
        if let Some(port) = geo::find_port(&location.name) {
            return self.regions.iter().any(|region| port.in_region(region));
        }
        self.regions.iter().any(|region| {
            location.matches_region(region)
                || geo::resolve_region(region)
                    .iter()
                    .any(|port| location.matches_region(port.name))
        })
    }
}

// =============================================================================
// Segment profiles
// =============================================================================

struct SegmentProfile {
    keywords: &'static [&'static str],
    commodities: &'static [&'static str],
}

fn segment_profile(segment: &str) -> SegmentProfile {
    match segment.trim().to_lowercase().as_str() {
        "automotive" => SegmentProfile {
            keywords: &["automotive supply chain", "semiconductor shortage", "port strike", "steel tariffs"],
            commodities: &["copper", "aluminum", "oil"],
        },
        "electronics" => SegmentProfile {
            keywords: &["semiconductor shortage", "electronics supply chain", "chip export controls", "port congestion"],
            commodities: &["copper", "aluminum"],
        },
        "energy" => SegmentProfile {
            keywords: &["oil supply disruption", "LNG shipping", "pipeline outage", "refinery"],
            commodities: &["oil", "brent", "natural gas"],
        },
        "pharmaceuticals" | "pharma" => SegmentProfile {
            keywords: &["pharmaceutical supply chain", "drug shortage", "cold chain", "export ban"],
            commodities: &["oil"],
        },
        "food" | "agriculture" => SegmentProfile {
            keywords: &["food supply chain", "crop failure", "grain exports", "fertilizer shortage"],
            commodities: &["wheat", "corn", "sugar", "coffee"],
        },
        "retail" => SegmentProfile {
            keywords: &["retail supply chain", "container shipping rates", "port congestion", "inventory shortage"],
            commodities: &["cotton", "oil"],
        },
        _ => SegmentProfile {
            keywords: &["supply chain disruption", "port strike", "shipping delays", "trade restrictions"],
            commodities: &["oil", "copper"],
        },
    }
}

const INDICATORS: [&str; 2] = ["inflation", "interest rate"];

fn currency_pair_for(port_region: &str) -> Option<&'static str> {
    match port_region {
        "Asia" => Some("USD/CNY"),
        "Europe" => Some("EUR/USD"),
        "Middle East" => Some("USD/AED"),
        _ => None,
    }
}

// =============================================================================
// Planning
// =============================================================================

/// Requests for the given kinds, in `SourceKind` order.
pub fn plan_requests(kinds: &[SourceKind], scope: &AssessmentScope) -> Vec<SourceRequest> {
    let ports = scope.ports();
    let profile = segment_profile(&scope.segment);
    let mut kinds = kinds.to_vec();
    kinds.sort();
    kinds.dedup();

    let mut plan = Vec::new();
    for kind in kinds {
        match kind {
            SourceKind::Vessels => {
                if scope.regions.is_empty() {
                    plan.extend(ports.iter().map(|p| SourceRequest::Vessels(VesselQuery::for_region(p.name))));
                } else {
                    plan.extend(scope.regions.iter().map(|r| SourceRequest::Vessels(VesselQuery::for_region(r.clone()))));
                }
            }
            SourceKind::Weather => {
                if ports.is_empty() {
                    continue;
                }
                let query = WeatherQuery::new(ports.iter().map(|p| WeatherSite::from(*p)).collect());
                plan.push(SourceRequest::Weather(query));
            }
            SourceKind::News => {
                let mut query = NewsQuery::new(profile.keywords.iter().map(|k| k.to_string()).collect());
                let lookback = (scope.horizon.days_rounded_up() as i64).min(MAX_NEWS_LOOKBACK_DAYS);
                query.from_date = Some((Utc::now() - ChronoDuration::days(lookback)).format("%Y-%m-%d").to_string());
                query.regions = scope.regions.clone();
                plan.push(SourceRequest::News(query));
            }
            SourceKind::Economic => {
                let mut currencies: Vec<String> = Vec::new();
                for pair in ports.iter().filter_map(|p| currency_pair_for(p.region)) {
                    if !currencies.iter().any(|c| c == pair) {
                        currencies.push(pair.to_string());
                    }
                }
                if currencies.is_empty() {
                    currencies.push("EUR/USD".to_string());
                }
                plan.push(SourceRequest::Economic(EconomicQuery {
                    indicators: INDICATORS.iter().map(|s| s.to_string()).collect(),
                    commodities: profile.commodities.iter().map(|s| s.to_string()).collect(),
                    currencies,
                }));
            }
            SourceKind::Imagery => {
                plan.extend(
                    ports
                        .iter()
                        .take(MAX_IMAGERY_PORTS)
                        .map(|p| SourceRequest::Imagery(ImageryQuery::port_congestion(p.name, p.lat, p.lon))),
                );
            }
        }
    }
    plan
}

// =============================================================================
// Pipeline
// =============================================================================

pub struct RiskPipeline {
    adapters: BTreeMap<SourceKind, Arc<SourceAdapter>>,
    normalizer: Normalizer,
    engine: AggregationEngine,
    health: Arc<HealthMonitor>,
    max_concurrent_fetches: usize,
}

impl RiskPipeline {
    pub fn new(config: &Config) -> Result<Self, PipelineError> {
        Self::with_health(config, Arc::new(HealthMonitor::new(config.health.clone())))
    }

    pub fn with_health(config: &Config, health: Arc<HealthMonitor>) -> Result<Self, PipelineError> {
        config.validate()?;
        let adapters = SourceKind::ALL
            .iter()
            .filter(|kind| config.sources.get(**kind).enabled)
            .map(|kind| {
                let adapter = SourceAdapter::from_config(*kind, config.sources.get(*kind), &config.simulation, health.clone());
                (*kind, Arc::new(adapter))
            })
            .collect();
        Ok(Self {
            adapters,
            normalizer: Normalizer::new(config.breakpoints.clone())?,
            engine: AggregationEngine::new(config.aggregation.clone())?,
            health,
            max_concurrent_fetches: config.pipeline.max_concurrent_fetches.max(1),
        })
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn health_snapshot(&self) -> Vec<AdapterHealth> {
        self.health.snapshot()
    }

    pub fn enabled_kinds(&self) -> Vec<SourceKind> {
        self.adapters.keys().copied().collect()
    }

    /// Full assessment across every enabled source.
    pub async fn assess(
        &self,
        segment: &str,
        regions: &[String],
        time_horizon: &str,
    ) -> Result<RiskAssessment, PipelineError> {
        let scope = AssessmentScope::parse(segment, regions, time_horizon)?;
        self.run_cycle(&SourceKind::ALL, &scope).await
    }

    /// One fetch → normalize → aggregate pass restricted to `kinds`.
    pub async fn run_cycle(&self, kinds: &[SourceKind], scope: &AssessmentScope) -> Result<RiskAssessment, PipelineError> {
        let enabled: Vec<SourceKind> = kinds.iter().copied().filter(|k| self.adapters.contains_key(k)).collect();
        let plan = plan_requests(&enabled, scope);
        for request in &plan {
            request.validate()?;
        }

        let results = self.fetch_all(plan).await?;

        let mut provenance: Vec<SourceProvenance> = Vec::new();
        let mut signals: Vec<RiskSignal> = Vec::new();
        for (kind, result) in &results {
            let produced = self.normalizer.normalize(result);
            note_provenance(&mut provenance, *kind, result, produced.len());
            signals.extend(produced);
        }

        let seen = signals.len();
        signals.retain(|s| scope.covers(&s.location));
        if signals.is_empty() {
            log::info!(
                "Pipeline: no signals in scope for segment '{}' ({} seen before region filter)",
                scope.segment,
                seen
            );
            return Err(PipelineError::InsufficientSignal { signals_seen: seen });
        }

        let mut assessment = self.engine.aggregate(&signals, &self.health.view())?;
        assessment.segment = scope.segment.clone();
        assessment.regions = scope.regions.clone();
        assessment.time_horizon = scope.time_horizon.clone();
        assessment.sources = provenance;

        log::info!(
            "Pipeline: {} '{}' -> {} ({:.1}) from {} signals",
            kinds_label(&enabled),
            scope.segment,
            assessment.overall_tier,
            assessment.overall_score,
            signals.len()
        );
        Ok(assessment)
    }

    /// Run the plan through the adapters, at most `max_concurrent_fetches` at a
    /// time, and return results in plan order.
    async fn fetch_all(&self, plan: Vec<SourceRequest>) -> Result<Vec<(SourceKind, RawResult)>, PipelineError> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_fetches));
        let mut tasks = JoinSet::new();

        for (index, request) in plan.into_iter().enumerate() {
            let Some(adapter) = self.adapters.get(&request.kind()).cloned() else {
                continue;
            };
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = adapter.fetch(&request).await;
                (index, adapter.kind(), result)
            });
        }

        let mut finished = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, kind, result)) => finished.push((index, kind, result?)),
                Err(e) => log::error!("Pipeline: fetch task did not complete: {}", e),
            }
        }
        finished.sort_by_key(|(index, _, _)| *index);
        Ok(finished.into_iter().map(|(_, kind, result)| (kind, result)).collect())
    }
}

/// One provenance entry per kind. Any simulated answer marks the kind simulated.
fn note_provenance(provenance: &mut Vec<SourceProvenance>, kind: SourceKind, result: &RawResult, signal_count: usize) {
    let reason = result.simulation_reason().map(|r| r.as_str().to_string());
    match provenance.iter_mut().find(|p| p.source_id == kind.source_id()) {
        Some(entry) => {
            entry.signal_count += signal_count;
            if entry.mode == ProvenanceMode::Live && reason.is_some() {
                entry.mode = ProvenanceMode::Simulated;
                entry.reason = reason;
            }
        }
        None => provenance.push(SourceProvenance {
            source_id: kind.source_id().to_string(),
            mode: if result.is_live() {
                ProvenanceMode::Live
            } else {
                ProvenanceMode::Simulated
            },
            reason,
            signal_count,
        }),
    }
}

fn kinds_label(kinds: &[SourceKind]) -> String {
    kinds.iter().map(|k| k.source_id()).collect::<Vec<_>>().join("+")
}
