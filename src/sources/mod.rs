//! Upstream signal sources.
//!
//! Each source kind has a typed request, a typed payload, a live fetch and a
//! seeded simulation. `LiveSource` and `SimulatedSource` implement the same
//! `SignalSource` trait; `build_source` picks one from the source's config.
//! `SourceAdapter` (adapter.rs) wraps either with rate limiting, timeouts,
//! fallback and health reporting.

pub mod adapter;
pub mod economic;
pub mod http;
pub mod imagery;
pub mod news;
pub mod rate_limit;
pub mod simulate;
pub mod vessels;
pub mod weather;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{RateLimitConfig, SimulationConfig, SourceConfig};
use crate::error::{UpstreamError, ValidationError};

use self::economic::{EconomicQuery, EconomicSnapshot};
use self::http::HttpClient;
use self::imagery::{ImageryAnalysis, ImageryQuery};
use self::news::{NewsDigest, NewsQuery};
use self::simulate::SimRng;
use self::vessels::{VesselQuery, VesselReport};
use self::weather::{WeatherQuery, WeatherReport};

pub use self::adapter::SourceAdapter;

// =============================================================================
// Source kinds
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Vessels,
    Weather,
    News,
    Economic,
    Imagery,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Vessels,
        SourceKind::Weather,
        SourceKind::News,
        SourceKind::Economic,
        SourceKind::Imagery,
    ];

    /// Stable id used in signals, health snapshots and config keys.
    pub fn source_id(&self) -> &'static str {
        match self {
            SourceKind::Vessels => "vessels",
            SourceKind::Weather => "weather",
            SourceKind::News => "news",
            SourceKind::Economic => "economic",
            SourceKind::Imagery => "imagery",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Vessels => "Vessel adapter",
            SourceKind::Weather => "Weather adapter",
            SourceKind::News => "News adapter",
            SourceKind::Economic => "Economic adapter",
            SourceKind::Imagery => "Imagery adapter",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            SourceKind::Vessels => "https://services.marinetraffic.com/api/exportvessels",
            SourceKind::Weather => "https://api.openweathermap.org/data/2.5/weather",
            SourceKind::News => "https://newsapi.org/v2/everything",
            SourceKind::Economic => "https://www.alphavantage.co/query",
            SourceKind::Imagery => "https://api.planet.com/data/v1/quick-search",
        }
    }

    pub fn default_rate_limit(&self) -> RateLimitConfig {
        let (max_requests, window_secs) = match self {
            SourceKind::Vessels => (60, 60),
            SourceKind::Weather => (1000, 60),
            SourceKind::News => (500, 86_400),
            SourceKind::Economic => (5, 60),
            SourceKind::Imagery => (100, 60),
        };
        RateLimitConfig {
            max_requests,
            window_secs,
        }
    }

    /// Env vars checked for a credential, first match wins.
    pub fn credential_env_vars(&self) -> &'static [&'static str] {
        match self {
            SourceKind::Vessels => &["MARINETRAFFIC_API_KEY"],
            SourceKind::Weather => &["OPENWEATHERMAP_API_KEY"],
            SourceKind::News => &["NEWSAPI_KEY"],
            SourceKind::Economic => &["ALPHA_VANTAGE_API_KEY"],
            SourceKind::Imagery => &["PLANET_LABS_API_KEY", "SATELLITE_API_KEY"],
        }
    }

    /// Whether a missing key is worth flagging as a configuration gap.
    pub fn credential_required(&self) -> bool {
        matches!(self, SourceKind::Vessels | SourceKind::Weather | SourceKind::News)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.source_id())
    }
}

// =============================================================================
// Requests and payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SourceRequest {
    Vessels(VesselQuery),
    Weather(WeatherQuery),
    News(NewsQuery),
    Economic(EconomicQuery),
    Imagery(ImageryQuery),
}

impl SourceRequest {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceRequest::Vessels(_) => SourceKind::Vessels,
            SourceRequest::Weather(_) => SourceKind::Weather,
            SourceRequest::News(_) => SourceKind::News,
            SourceRequest::Economic(_) => SourceKind::Economic,
            SourceRequest::Imagery(_) => SourceKind::Imagery,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            SourceRequest::Vessels(q) => q.validate(),
            SourceRequest::Weather(q) => q.validate(),
            SourceRequest::News(q) => q.validate(),
            SourceRequest::Economic(q) => q.validate(),
            SourceRequest::Imagery(q) => q.validate(),
        }
    }

    /// Upstream HTTP requests a live fetch of this request sends. Rate limits
    /// are charged this many slots.
    pub fn upstream_requests(&self) -> u32 {
        match self {
            SourceRequest::Weather(q) => q.upstream_requests(),
            SourceRequest::Economic(q) => q.upstream_requests(),
            SourceRequest::Vessels(_) | SourceRequest::News(_) | SourceRequest::Imagery(_) => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RawPayload {
    Vessels(VesselReport),
    Weather(WeatherReport),
    News(NewsDigest),
    Economic(EconomicSnapshot),
    Imagery(ImageryAnalysis),
}

impl RawPayload {
    pub fn kind(&self) -> SourceKind {
        match self {
            RawPayload::Vessels(_) => SourceKind::Vessels,
            RawPayload::Weather(_) => SourceKind::Weather,
            RawPayload::News(_) => SourceKind::News,
            RawPayload::Economic(_) => SourceKind::Economic,
            RawPayload::Imagery(_) => SourceKind::Imagery,
        }
    }

    /// Confidence the source attached to this payload.
    pub fn confidence(&self) -> f64 {
        match self {
            RawPayload::Vessels(p) => p.confidence,
            RawPayload::Weather(p) => p.confidence,
            RawPayload::News(p) => p.confidence,
            RawPayload::Economic(p) => p.confidence,
            RawPayload::Imagery(p) => p.confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SimulationReason {
    NoCredentials,
    UpstreamFailure { error: String },
    RateLimited,
}

impl SimulationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationReason::NoCredentials => "no_credentials",
            SimulationReason::UpstreamFailure { .. } => "upstream_failure",
            SimulationReason::RateLimited => "rate_limited",
        }
    }
}

/// What an adapter hands back. Always well-formed, whichever path produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RawResult {
    Live { payload: RawPayload },
    Simulated { payload: RawPayload, reason: SimulationReason },
}

impl RawResult {
    pub fn payload(&self) -> &RawPayload {
        match self {
            RawResult::Live { payload } | RawResult::Simulated { payload, .. } => payload,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, RawResult::Live { .. })
    }

    pub fn simulation_reason(&self) -> Option<&SimulationReason> {
        match self {
            RawResult::Live { .. } => None,
            RawResult::Simulated { reason, .. } => Some(reason),
        }
    }
}

// =============================================================================
// Source trait and implementations
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Live,
    Simulated,
}

#[async_trait]
pub trait SignalSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn mode(&self) -> SourceMode;

    /// Produce a payload for an already-validated request of this source's kind.
    async fn fetch(&self, request: &SourceRequest) -> Result<RawPayload, UpstreamError>;
}

/// What a live fetch needs besides the request.
pub struct LiveContext {
    pub http: HttpClient,
    pub api_key: String,
    pub base_url: String,
    pub confidence: f64,
    pub simulation: SimulationConfig,
}

pub struct LiveSource {
    kind: SourceKind,
    ctx: LiveContext,
}

impl LiveSource {
    pub fn new(kind: SourceKind, api_key: &str, config: &SourceConfig, simulation: &SimulationConfig) -> Self {
        Self {
            kind,
            ctx: LiveContext {
                http: HttpClient::new(kind.label(), Duration::from_millis(config.timeout_ms)),
                api_key: api_key.to_string(),
                base_url: config.base_url_for(kind),
                confidence: config.live_confidence,
                simulation: simulation.clone(),
            },
        }
    }
}

#[async_trait]
impl SignalSource for LiveSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn mode(&self) -> SourceMode {
        SourceMode::Live
    }

    async fn fetch(&self, request: &SourceRequest) -> Result<RawPayload, UpstreamError> {
        if request.kind() != self.kind {
            return Err(UpstreamError::WrongSource(self.kind.source_id()));
        }
        let ctx = &self.ctx;
        let payload = match request {
            SourceRequest::Vessels(q) => RawPayload::Vessels(vessels::fetch_live(ctx, q).await?),
            SourceRequest::Weather(q) => RawPayload::Weather(weather::fetch_live(ctx, q).await?),
            SourceRequest::News(q) => RawPayload::News(news::fetch_live(ctx, q).await?),
            SourceRequest::Economic(q) => RawPayload::Economic(economic::fetch_live(ctx, q).await?),
            SourceRequest::Imagery(q) => RawPayload::Imagery(imagery::fetch_live(ctx, q).await?),
        };
        Ok(payload)
    }
}

pub struct SimulatedSource {
    kind: SourceKind,
    simulation: SimulationConfig,
}

impl SimulatedSource {
    pub fn new(kind: SourceKind, simulation: &SimulationConfig) -> Self {
        Self {
            kind,
            simulation: simulation.clone(),
        }
    }

    /// Deterministic payload for a request. Never fails for a matching kind.
    pub fn generate(&self, request: &SourceRequest) -> Result<RawPayload, UpstreamError> {
        if request.kind() != self.kind {
            return Err(UpstreamError::WrongSource(self.kind.source_id()));
        }
        let mut rng = SimRng::for_request(self.kind, request, &self.simulation);
        let payload = match request {
            SourceRequest::Vessels(q) => RawPayload::Vessels(vessels::simulate(q, &mut rng)),
            SourceRequest::Weather(q) => RawPayload::Weather(weather::simulate(q, &mut rng)),
            SourceRequest::News(q) => RawPayload::News(news::simulate(q, &mut rng)),
            SourceRequest::Economic(q) => RawPayload::Economic(economic::simulate(q, &mut rng)),
            SourceRequest::Imagery(q) => RawPayload::Imagery(imagery::simulate(q, &mut rng)),
        };
        Ok(payload)
    }
}

#[async_trait]
impl SignalSource for SimulatedSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn mode(&self) -> SourceMode {
        SourceMode::Simulated
    }

    async fn fetch(&self, request: &SourceRequest) -> Result<RawPayload, UpstreamError> {
        self.generate(request)
    }
}

/// Live when a credential is configured, simulated otherwise.
pub fn build_source(
    kind: SourceKind,
    config: &SourceConfig,
    simulation: &SimulationConfig,
) -> Arc<dyn SignalSource> {
    match config.credential() {
        Some(key) if config.enabled => Arc::new(LiveSource::new(kind, key, config, simulation)),
        _ => Arc::new(SimulatedSource::new(kind, simulation)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn economic_request() -> SourceRequest {
        SourceRequest::Economic(EconomicQuery {
            commodities: vec!["copper".to_string()],
            ..Default::default()
        })
    }

    #[test]
    fn test_build_source_selects_by_credential() {
        let sim = SimulationConfig::default();
        let mut config = SourceConfig::default();
        assert_eq!(build_source(SourceKind::News, &config, &sim).mode(), SourceMode::Simulated);
        config.api_key = Some("key".to_string());
        let source = build_source(SourceKind::News, &config, &sim);
        assert_eq!(source.mode(), SourceMode::Live);
        assert_eq!(source.kind(), SourceKind::News);
        config.enabled = false;
        assert_eq!(build_source(SourceKind::News, &config, &sim).mode(), SourceMode::Simulated);
    }

    #[test]
    fn test_simulated_source_is_deterministic() {
        let source = SimulatedSource::new(SourceKind::Economic, &SimulationConfig::default());
        let a = source.generate(&economic_request()).expect("payload");
        let b = source.generate(&economic_request()).expect("payload");
        match (a, b) {
            (RawPayload::Economic(a), RawPayload::Economic(b)) => {
                assert_eq!(a.commodities, b.commodities);
                assert_eq!(a.confidence, b.confidence);
            }
            other => panic!("unexpected payloads {:?}", other),
        }
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let source = SimulatedSource::new(SourceKind::Weather, &SimulationConfig::default());
        assert!(matches!(
            source.generate(&economic_request()),
            Err(UpstreamError::WrongSource("weather"))
        ));
    }

    #[test]
    fn test_request_serializes_with_source_tag() {
        let json = serde_json::to_value(economic_request()).expect("json");
        assert_eq!(json["source"], "economic");
        assert_eq!(economic_request().kind(), SourceKind::Economic);
    }

    #[test]
    fn test_upstream_request_cost_per_kind() {
        let weather = SourceRequest::Weather(WeatherQuery::new(
            ["Shanghai", "Rotterdam", "Los Angeles"]
                .iter()
                .filter_map(|name| crate::geo::find_port(name))
                .map(weather::WeatherSite::from)
                .collect(),
        ));
        assert_eq!(weather.upstream_requests(), 3);
        assert_eq!(economic_request().upstream_requests(), 1);
        let news = SourceRequest::News(NewsQuery::new(vec!["port strike".to_string(), "tariffs".to_string()]));
        assert_eq!(news.upstream_requests(), 1);
    }

    #[test]
    fn test_raw_result_accessors() {
        let source = SimulatedSource::new(SourceKind::Economic, &SimulationConfig::default());
        let payload = source.generate(&economic_request()).expect("payload");
        let result = RawResult::Simulated {
            payload,
            reason: SimulationReason::RateLimited,
        };
        assert!(!result.is_live());
        assert_eq!(result.payload().kind(), SourceKind::Economic);
        assert_eq!(result.simulation_reason().map(|r| r.as_str()), Some("rate_limited"));
    }
}
