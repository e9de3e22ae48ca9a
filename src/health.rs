//! Per-adapter health tracking over a bounded window of recent calls.
//!
//! Each source keeps a ring buffer of its last `window_size` samples. Status
//! only escalates on a bad sample (failure or slow call) and only recovers on
//! a streak of good ones, one level at a time. Nothing is persisted; a restart
//! starts every adapter healthy.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::types::{AdapterHealth, HealthStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Rate and latency rules need at least this many samples.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_warn_error_rate")]
    pub warn_error_rate: f64,
    #[serde(default = "default_critical_error_rate")]
    pub critical_error_rate: f64,
    #[serde(default = "default_warn_latency_ms")]
    pub warn_latency_ms: u64,
    #[serde(default = "default_critical_latency_ms")]
    pub critical_latency_ms: u64,
    #[serde(default = "default_failures_before_down")]
    pub failures_before_down: u32,
    #[serde(default = "default_recovery_successes")]
    pub recovery_successes: u32,
}

fn default_window_size() -> usize {
    20
}
fn default_min_samples() -> usize {
    5
}
fn default_warn_error_rate() -> f64 {
    0.2
}
fn default_critical_error_rate() -> f64 {
    0.5
}
fn default_warn_latency_ms() -> u64 {
    5_000
}
fn default_critical_latency_ms() -> u64 {
    10_000
}
fn default_failures_before_down() -> u32 {
    5
}
fn default_recovery_successes() -> u32 {
    3
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            min_samples: default_min_samples(),
            warn_error_rate: default_warn_error_rate(),
            critical_error_rate: default_critical_error_rate(),
            warn_latency_ms: default_warn_latency_ms(),
            critical_latency_ms: default_critical_latency_ms(),
            failures_before_down: default_failures_before_down(),
            recovery_successes: default_recovery_successes(),
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        let fail = |msg: &str| Err(PipelineError::Configuration(format!("health.{}", msg)));
        if self.window_size == 0 || self.min_samples > self.window_size {
            return fail("minSamples must fit inside a non-empty window");
        }
        if !(0.0..=1.0).contains(&self.warn_error_rate)
            || !(0.0..=1.0).contains(&self.critical_error_rate)
            || self.warn_error_rate > self.critical_error_rate
        {
            return fail("error rates must satisfy 0 <= warn <= critical <= 1");
        }
        if self.warn_latency_ms > self.critical_latency_ms {
            return fail("warnLatencyMs must not exceed criticalLatencyMs");
        }
        if self.failures_before_down == 0 || self.recovery_successes == 0 {
            return fail("failure and recovery counts must be positive");
        }
        Ok(())
    }
}

/// How one adapter call ended, as seen by the monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// Payload produced; `live` is false for simulated-only sources.
    Success { latency_ms: u64, live: bool },
    /// Live call failed and the adapter fell back to simulation.
    Failure { latency_ms: u64, error: String },
    /// Skipped by the rate limiter. Neutral: no error, no recovery credit.
    RateLimited,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthTransition {
    pub source_id: String,
    pub from: HealthStatus,
    pub to: HealthStatus,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    ok: bool,
    latency_ms: u64,
}

#[derive(Debug, Default)]
struct AdapterWindow {
    samples: VecDeque<Sample>,
    status: HealthStatus,
    last_success_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    good_streak: u32,
    live_calls: u64,
    simulated_calls: u64,
    last_error: Option<String>,
}

impl AdapterWindow {
    fn push(&mut self, sample: Sample, capacity: usize) {
        if self.samples.len() >= capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    fn error_count(&self) -> usize {
        self.samples.iter().filter(|s| !s.ok).count()
    }

    fn error_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.error_count() as f64 / self.samples.len() as f64
    }

    fn mean_latency_ms(&self) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        self.samples.iter().map(|s| s.latency_ms).sum::<u64>() / self.samples.len() as u64
    }

    /// Level the current window justifies, ignoring recovery.
    ///
    /// A failure streak of half `failures_before_down` (rounded up) degrades
    /// even before `min_samples` are in, so a new adapter that fails every
    /// call passes through degraded on its way to down.
    fn escalation_level(&self, config: &HealthConfig) -> HealthStatus {
        if self.consecutive_failures >= config.failures_before_down {
            return HealthStatus::Down;
        }
        let streak = if self.consecutive_failures >= config.failures_before_down.div_ceil(2) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        if self.samples.len() < config.min_samples {
            return streak;
        }
        let rate = self.error_rate();
        let latency = self.mean_latency_ms();
        let window = if rate > config.critical_error_rate || latency > config.critical_latency_ms {
            HealthStatus::Down
        } else if rate > config.warn_error_rate || latency > config.warn_latency_ms {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        window.max(streak)
    }

    fn snapshot(&self, source_id: &str) -> AdapterHealth {
        AdapterHealth {
            source_id: source_id.to_string(),
            status: self.status,
            last_success_at: self.last_success_at,
            rolling_error_count: self.error_count() as u32,
            rolling_latency_ms: self.mean_latency_ms(),
            sample_count: self.samples.len(),
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.good_streak,
            live_calls: self.live_calls,
            simulated_calls: self.simulated_calls,
            last_error: self.last_error.clone(),
        }
    }
}

/// Source id to status, as read by the aggregation engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthView(BTreeMap<String, HealthStatus>);

impl HealthView {
    pub fn status_of(&self, source_id: &str) -> HealthStatus {
        self.0.get(source_id).copied().unwrap_or_default()
    }

    pub fn with(mut self, source_id: impl Into<String>, status: HealthStatus) -> Self {
        self.0.insert(source_id.into(), status);
        self
    }
}

pub struct HealthMonitor {
    config: HealthConfig,
    windows: DashMap<String, AdapterWindow>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Start tracking a source as healthy. Re-registering keeps existing state.
    pub fn register(&self, source_id: &str) {
        self.windows.entry(source_id.to_string()).or_default();
    }

    /// Apply one call outcome. Returns the status change, if any.
    pub fn record(&self, source_id: &str, outcome: CallOutcome) -> Option<HealthTransition> {
        let config = &self.config;
        let mut window = self.windows.entry(source_id.to_string()).or_default();
        let from = window.status;

        match outcome {
            CallOutcome::RateLimited => {
                window.simulated_calls += 1;
                return None;
            }
            CallOutcome::Success { latency_ms, live } => {
                window.push(Sample { ok: true, latency_ms }, config.window_size);
                window.last_success_at = Some(Utc::now());
                window.consecutive_failures = 0;
                if live {
                    window.live_calls += 1;
                } else {
                    window.simulated_calls += 1;
                }
                if latency_ms < config.warn_latency_ms {
                    window.good_streak += 1;
                    if window.status != HealthStatus::Healthy
                        && window.good_streak >= config.recovery_successes
                    {
                        window.status = window.status.improved();
                        window.good_streak = 0;
                    }
                } else {
                    window.good_streak = 0;
                    let level = window.escalation_level(config);
                    window.status = window.status.max(level);
                }
            }
            CallOutcome::Failure { latency_ms, error } => {
                window.push(Sample { ok: false, latency_ms }, config.window_size);
                window.consecutive_failures += 1;
                window.good_streak = 0;
                window.simulated_calls += 1;
                window.last_error = Some(error);
                let level = window.escalation_level(config);
                window.status = window.status.max(level);
            }
        }

        let to = window.status;
        (from != to).then(|| HealthTransition {
            source_id: source_id.to_string(),
            from,
            to,
        })
    }

    pub fn status(&self, source_id: &str) -> HealthStatus {
        self.windows
            .get(source_id)
            .map(|w| w.status)
            .unwrap_or_default()
    }

    pub fn adapter_health(&self, source_id: &str) -> Option<AdapterHealth> {
        self.windows.get(source_id).map(|w| w.snapshot(source_id))
    }

    /// Every tracked adapter, sorted by source id.
    pub fn snapshot(&self) -> Vec<AdapterHealth> {
        let mut all: Vec<AdapterHealth> = self
            .windows
            .iter()
            .map(|entry| entry.value().snapshot(entry.key()))
            .collect();
        all.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        all
    }

    pub fn view(&self) -> HealthView {
        HealthView(
            self.windows
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().status))
                .collect(),
        )
    }

    pub fn health_report(&self) -> HealthReport {
        let adapters = self.snapshot();
        let down: Vec<&AdapterHealth> = adapters.iter().filter(|a| a.status == HealthStatus::Down).collect();
        let degraded: Vec<&AdapterHealth> = adapters
            .iter()
            .filter(|a| a.status == HealthStatus::Degraded)
            .collect();

        let overall = if !down.is_empty() || degraded.len() * 2 > adapters.len() {
            OverallHealth::Critical
        } else if !degraded.is_empty() {
            OverallHealth::Degraded
        } else {
            OverallHealth::Healthy
        };

        let mut recommendations = Vec::new();
        for a in &down {
            recommendations.push(format!(
                "{} is down ({}); check its credentials and upstream availability. Its signals are simulated meanwhile.",
                a.source_id,
                a.last_error.as_deref().unwrap_or("repeated failures")
            ));
        }
        for a in &degraded {
            recommendations.push(format!(
                "{} is degraded ({} errors in window, {} ms mean latency); consider raising its timeout or rate limit.",
                a.source_id, a.rolling_error_count, a.rolling_latency_ms
            ));
        }

        HealthReport {
            generated_at: Utc::now(),
            overall,
            adapters,
            recommendations,
        }
    }

    pub fn quality_report(&self) -> QualityReport {
        self.quality_report_at(Utc::now())
    }

    fn quality_report_at(&self, now: DateTime<Utc>) -> QualityReport {
        let mut sources: Vec<SourceQuality> = self
            .windows
            .iter()
            .map(|entry| {
                let w = entry.value();
                let error_rate = round3(w.error_rate());
                let total_calls = w.live_calls + w.simulated_calls;
                let live_ratio = if total_calls == 0 {
                    0.0
                } else {
                    round3(w.live_calls as f64 / total_calls as f64)
                };
                let freshness = Freshness::classify(w.last_success_at, now);
                let mut latencies: Vec<u64> = w.samples.iter().map(|s| s.latency_ms).collect();
                latencies.sort_unstable();
                let overall_score = ((1.0 - error_rate) * 50.0
                    + live_ratio * 30.0
                    + freshness.score() * 20.0)
                    .round();
                SourceQuality {
                    source_id: entry.key().clone(),
                    error_rate,
                    live_ratio,
                    p95_latency_ms: percentile(&latencies, 95.0).unwrap_or(0),
                    freshness,
                    overall_score,
                }
            })
            .collect();
        sources.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        let overall_score = if sources.is_empty() {
            0.0
        } else {
            (sources.iter().map(|s| s.overall_score).sum::<f64>() / sources.len() as f64).round()
        };
        QualityReport {
            generated_at: now,
            sources,
            overall_score,
        }
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn percentile(values: &[u64], p: f64) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len();
    let rank = ((p / 100.0) * n as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(n - 1);
    Some(values[idx])
}

// =============================================================================
// Reports
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub overall: OverallHealth,
    pub adapters: Vec<AdapterHealth>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Acceptable,
    Stale,
    Never,
}

impl Freshness {
    fn classify(last_success_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        match last_success_at {
            None => Freshness::Never,
            Some(at) => match (now - at).num_minutes() {
                m if m <= 15 => Freshness::Fresh,
                m if m <= 60 => Freshness::Acceptable,
                _ => Freshness::Stale,
            },
        }
    }

    fn score(&self) -> f64 {
        match self {
            Freshness::Fresh => 1.0,
            Freshness::Acceptable => 0.6,
            Freshness::Stale => 0.2,
            Freshness::Never => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceQuality {
    pub source_id: String,
    pub error_rate: f64,
    pub live_ratio: f64,
    pub p95_latency_ms: u64,
    pub freshness: Freshness,
    /// 0–100
    pub overall_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub generated_at: DateTime<Utc>,
    pub sources: Vec<SourceQuality>,
    pub overall_score: f64,
}
