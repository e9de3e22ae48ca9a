//! Uniform adapter around one signal source.
//!
//! Order of operations for every call:
//! 1. validate the request (the only error a caller can see)
//! 2. simulated-only source: answer from simulation
//! 3. not enough rate limit left for every upstream call the request sends:
//!    answer from simulation
//! 4. live fetch under a timeout; any failure falls back to simulation
//!
//! Steps 2-4 each record exactly one sample on the health monitor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{SimulationConfig, SourceConfig};
use crate::error::{UpstreamError, ValidationError};
use crate::health::{CallOutcome, HealthMonitor};

use super::rate_limit::RateLimiter;
use super::{
    build_source, RawPayload, RawResult, SignalSource, SimulatedSource, SimulationReason,
    SourceKind, SourceMode, SourceRequest,
};

pub struct SourceAdapter {
    kind: SourceKind,
    source: Arc<dyn SignalSource>,
    fallback: SimulatedSource,
    limiter: RateLimiter,
    timeout: Duration,
    health: Arc<HealthMonitor>,
}

impl SourceAdapter {
    pub fn new(
        source: Arc<dyn SignalSource>,
        config: &SourceConfig,
        simulation: &SimulationConfig,
        health: Arc<HealthMonitor>,
    ) -> Self {
        let kind = source.kind();
        health.register(kind.source_id());
        Self {
            kind,
            fallback: SimulatedSource::new(kind, simulation),
            limiter: RateLimiter::new(config.rate_limit_for(kind)),
            timeout: Duration::from_millis(config.timeout_ms),
            source,
            health,
        }
    }

    /// Adapter over the live or simulated source the config calls for.
    pub fn from_config(
        kind: SourceKind,
        config: &SourceConfig,
        simulation: &SimulationConfig,
        health: Arc<HealthMonitor>,
    ) -> Self {
        let source = build_source(kind, config, simulation);
        if source.mode() == SourceMode::Simulated {
            log::info!("{}: no credentials configured, running simulated", kind.label());
        }
        Self::new(source, config, simulation, health)
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn source_id(&self) -> &'static str {
        self.kind.source_id()
    }

    pub fn mode(&self) -> SourceMode {
        self.source.mode()
    }

    pub async fn fetch(&self, request: &SourceRequest) -> Result<RawResult, ValidationError> {
        if request.kind() != self.kind {
            return Err(ValidationError::new(
                "source",
                format!("{} request sent to the {} adapter", request.kind(), self.kind),
            ));
        }
        request.validate()?;

        let started = Instant::now();

        if self.source.mode() == SourceMode::Simulated {
            let payload = self.simulate(request)?;
            self.record(CallOutcome::Success {
                latency_ms: elapsed_ms(started),
                live: false,
            });
            return Ok(RawResult::Simulated {
                payload,
                reason: SimulationReason::NoCredentials,
            });
        }

        let cost = request.upstream_requests();
        if !self.limiter.try_acquire(cost) {
            if cost > self.limiter.max_requests() {
                log::warn!(
                    "{}: request needs {} upstream calls but the limit is {} per window, answering from simulation",
                    self.kind.label(),
                    cost,
                    self.limiter.max_requests()
                );
            } else {
                log::debug!(
                    "{}: rate limit reached ({} calls needed, {} left), answering from simulation",
                    self.kind.label(),
                    cost,
                    self.limiter.remaining()
                );
            }
            let payload = self.simulate(request)?;
            self.record(CallOutcome::RateLimited);
            return Ok(RawResult::Simulated {
                payload,
                reason: SimulationReason::RateLimited,
            });
        }

        let result = match tokio::time::timeout(self.timeout, self.source.fetch(request)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(self.timeout.as_millis() as u64)),
        };
        let latency_ms = elapsed_ms(started);

        match result {
            Ok(payload) => {
                log::debug!("{}: live fetch ok in {} ms", self.kind.label(), latency_ms);
                self.record(CallOutcome::Success {
                    latency_ms,
                    live: true,
                });
                Ok(RawResult::Live { payload })
            }
            Err(err) => {
                log::warn!(
                    "{}: live fetch failed after {} ms, using simulated data: {}",
                    self.kind.label(),
                    latency_ms,
                    err
                );
                let payload = self.simulate(request)?;
                self.record(CallOutcome::Failure {
                    latency_ms,
                    error: err.to_string(),
                });
                Ok(RawResult::Simulated {
                    payload,
                    reason: SimulationReason::UpstreamFailure {
                        error: err.to_string(),
                    },
                })
            }
        }
    }

    fn simulate(&self, request: &SourceRequest) -> Result<RawPayload, ValidationError> {
        self.fallback
            .generate(request)
            .map_err(|e| ValidationError::new("source", e.to_string()))
    }

    fn record(&self, outcome: CallOutcome) {
        if let Some(t) = self.health.record(self.source_id(), outcome) {
            log::warn!("{}: health {} -> {}", self.kind.label(), t.from, t.to);
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::config::RateLimitConfig;
    use crate::health::HealthConfig;
    use crate::sources::economic::EconomicQuery;
    use crate::sources::news::NewsQuery;
    use crate::sources::weather::{WeatherQuery, WeatherSite};
    use crate::types::HealthStatus;

    /// Live-mode source that answers from simulation after an optional delay.
    struct StubLive {
        calls: AtomicUsize,
        delay: Duration,
        inner: SimulatedSource,
    }

    impl StubLive {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                inner: SimulatedSource::new(SourceKind::News, &SimulationConfig::default()),
            }
        }
    }

    #[async_trait]
    impl SignalSource for StubLive {
        fn kind(&self) -> SourceKind {
            SourceKind::News
        }

        fn mode(&self) -> SourceMode {
            SourceMode::Live
        }

        async fn fetch(&self, request: &SourceRequest) -> Result<RawPayload, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.inner.generate(request)
        }
    }

    fn news_request() -> SourceRequest {
        SourceRequest::News(NewsQuery::new(vec!["port strike".to_string()]))
    }

    fn monitor() -> Arc<HealthMonitor> {
        Arc::new(HealthMonitor::new(HealthConfig::default()))
    }

    #[tokio::test]
    async fn test_no_credentials_answers_simulated_within_timeout() {
        let health = monitor();
        let config = SourceConfig::default();
        let adapter =
            SourceAdapter::from_config(SourceKind::News, &config, &SimulationConfig::default(), health.clone());
        assert_eq!(adapter.mode(), SourceMode::Simulated);

        let result = tokio::time::timeout(Duration::from_millis(config.timeout_ms), adapter.fetch(&news_request()))
            .await
            .expect("within timeout")
            .expect("valid request");
        assert_eq!(result.simulation_reason(), Some(&SimulationReason::NoCredentials));

        let h = health.adapter_health("news").expect("registered");
        assert_eq!(h.simulated_calls, 1);
        assert_eq!(h.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_live_failure_falls_back_and_records_error() {
        let health = monitor();
        let config = SourceConfig {
            api_key: Some("test-key".to_string()),
            base_url: Some("http://127.0.0.1:1/v2/everything".to_string()),
            timeout_ms: 2_000,
            ..Default::default()
        };
        let adapter =
            SourceAdapter::from_config(SourceKind::News, &config, &SimulationConfig::default(), health.clone());
        assert_eq!(adapter.mode(), SourceMode::Live);

        let result = adapter.fetch(&news_request()).await.expect("valid request");
        assert!(matches!(
            result.simulation_reason(),
            Some(SimulationReason::UpstreamFailure { .. })
        ));
        let h = health.adapter_health("news").expect("registered");
        assert_eq!(h.rolling_error_count, 1);
        assert_eq!(h.consecutive_failures, 1);
        assert!(h.last_error.is_some());
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let health = monitor();
        let stub = Arc::new(StubLive::new(Duration::from_millis(500)));
        let config = SourceConfig {
            timeout_ms: 20,
            ..Default::default()
        };
        let adapter = SourceAdapter::new(stub, &config, &SimulationConfig::default(), health.clone());
        let result = adapter.fetch(&news_request()).await.expect("valid request");
        match result.simulation_reason() {
            Some(SimulationReason::UpstreamFailure { error }) => assert!(error.contains("timed out")),
            other => panic!("expected upstream failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_answers_simulated_without_calling_upstream() {
        let health = monitor();
        let stub = Arc::new(StubLive::new(Duration::ZERO));
        let config = SourceConfig {
            rate_limit: Some(RateLimitConfig {
                max_requests: 2,
                window_secs: 60,
            }),
            ..Default::default()
        };
        let adapter = SourceAdapter::new(stub.clone(), &config, &SimulationConfig::default(), health.clone());

        assert!(adapter.fetch(&news_request()).await.expect("ok").is_live());
        assert!(adapter.fetch(&news_request()).await.expect("ok").is_live());
        let third = adapter.fetch(&news_request()).await.expect("ok");
        assert_eq!(third.simulation_reason(), Some(&SimulationReason::RateLimited));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);

        let h = health.adapter_health("news").expect("registered");
        assert_eq!(h.live_calls, 2);
        assert_eq!(h.simulated_calls, 1);
        assert_eq!(h.sample_count, 2);
    }

    #[tokio::test]
    async fn test_invalid_request_never_reaches_source() {
        let health = monitor();
        let stub = Arc::new(StubLive::new(Duration::ZERO));
        let adapter = SourceAdapter::new(stub.clone(), &SourceConfig::default(), &SimulationConfig::default(), health.clone());

        let invalid = SourceRequest::News(NewsQuery::new(vec![]));
        assert_eq!(adapter.fetch(&invalid).await.unwrap_err().field, "keywords");

        let wrong_kind = SourceRequest::Economic(EconomicQuery {
            commodities: vec!["copper".to_string()],
            ..Default::default()
        });
        assert_eq!(adapter.fetch(&wrong_kind).await.unwrap_err().field, "source");

        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
        assert_eq!(health.adapter_health("news").map(|h| h.sample_count), Some(0));
    }

    /// Body that parses both as an Alpha Vantage series and as
    /// OpenWeatherMap current conditions.
    const STUB_BODY: &str = r#"{"data":[{"value":"110"},{"value":"100"}],"wind":{"speed":5.0},"visibility":10000,"weather":[{"description":"clear sky"}],"main":{"temp":20.0}}"#;

    /// Local HTTP server answering every request with `STUB_BODY`. Returns its
    /// URL and a count of requests received.
    fn counting_server() -> (String, Arc<AtomicUsize>) {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("http://{}/query", listener.local_addr().expect("addr"));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else {
                    continue;
                };
                let mut request = Vec::new();
                let mut buffer = [0u8; 4096];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buffer) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buffer[..n]),
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    STUB_BODY.len(),
                    STUB_BODY
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        (url, hits)
    }

    fn live_config(url: &str, max_requests: u32) -> SourceConfig {
        SourceConfig {
            api_key: Some("test-key".to_string()),
            base_url: Some(url.to_string()),
            rate_limit: Some(RateLimitConfig {
                max_requests,
                window_secs: 60,
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_economic_limit_counts_every_upstream_request() {
        let (url, hits) = counting_server();
        let health = monitor();
        let adapter = SourceAdapter::from_config(
            SourceKind::Economic,
            &live_config(&url, 5),
            &SimulationConfig::default(),
            health.clone(),
        );
        let request = SourceRequest::Economic(EconomicQuery {
            indicators: vec!["inflation".to_string(), "interest rate".to_string()],
            commodities: vec!["oil".to_string(), "copper".to_string(), "aluminum".to_string()],
            currencies: Vec::new(),
        });
        assert_eq!(request.upstream_requests(), 5);

        let first = adapter.fetch(&request).await.expect("valid request");
        assert!(first.is_live(), "{:?}", first.simulation_reason());
        for _ in 0..4 {
            let next = adapter.fetch(&request).await.expect("valid request");
            assert_eq!(next.simulation_reason(), Some(&SimulationReason::RateLimited));
        }

        assert_eq!(hits.load(Ordering::SeqCst), 5);
        let h = health.adapter_health("economic").expect("registered");
        assert_eq!(h.live_calls, 1);
        assert_eq!(h.simulated_calls, 4);
        assert_eq!(h.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_weather_limit_counts_one_request_per_site() {
        let (url, hits) = counting_server();
        let health = monitor();
        let adapter = SourceAdapter::from_config(
            SourceKind::Weather,
            &live_config(&url, 5),
            &SimulationConfig::default(),
            health.clone(),
        );
        let sites = ["Shanghai", "Rotterdam", "Los Angeles"]
            .iter()
            .filter_map(|name| crate::geo::find_port(name))
            .map(WeatherSite::from)
            .collect();
        let request = SourceRequest::Weather(WeatherQuery::new(sites));

        assert!(adapter.fetch(&request).await.expect("valid request").is_live());
        let second = adapter.fetch(&request).await.expect("valid request");
        assert_eq!(second.simulation_reason(), Some(&SimulationReason::RateLimited));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_request_larger_than_limit_never_goes_live() {
        let (url, hits) = counting_server();
        let adapter = SourceAdapter::from_config(
            SourceKind::Economic,
            &live_config(&url, 2),
            &SimulationConfig::default(),
            monitor(),
        );
        let request = SourceRequest::Economic(EconomicQuery {
            commodities: vec!["oil".to_string(), "copper".to_string(), "wheat".to_string()],
            ..Default::default()
        });
        let result = adapter.fetch(&request).await.expect("valid request");
        assert_eq!(result.simulation_reason(), Some(&SimulationReason::RateLimited));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
