//! Periodic monitors, one per signal class.
//!
//! Each monitor is its own tokio task driving fetch → normalize → aggregate
//! for the sources of its class at a fixed interval. The cycle is awaited
//! inside the loop, so runs of one monitor never overlap. Triggers that come
//! due while a run is in progress are dropped and counted in `skipped_runs`.
//!
//! Monitors raise alerts on an mpsc channel when their tier crosses upward
//! into the alert tier, or when an adapter they use enters `down`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::alerts::Alert;
use crate::error::{PipelineError, ValidationError};
use crate::health::HealthMonitor;
use crate::pipeline::{AssessmentScope, RiskPipeline};
use crate::sources::SourceKind;
use crate::types::{HealthStatus, RiskAssessment, Severity};

// =============================================================================
// Signal classes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalClass {
    ShippingData,
    WeatherData,
    NewsMonitoring,
    PortStatus,
    EconomicData,
}

impl SignalClass {
    pub const ALL: [SignalClass; 5] = [
        SignalClass::ShippingData,
        SignalClass::WeatherData,
        SignalClass::NewsMonitoring,
        SignalClass::PortStatus,
        SignalClass::EconomicData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalClass::ShippingData => "shipping_data",
            SignalClass::WeatherData => "weather_data",
            SignalClass::NewsMonitoring => "news_monitoring",
            SignalClass::PortStatus => "port_status",
            SignalClass::EconomicData => "economic_data",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SignalClass::ShippingData => "Shipping",
            SignalClass::WeatherData => "Weather",
            SignalClass::NewsMonitoring => "News",
            SignalClass::PortStatus => "Port status",
            SignalClass::EconomicData => "Economic",
        }
    }

    /// Sources a monitor of this class queries.
    pub fn kinds(&self) -> &'static [SourceKind] {
        match self {
            SignalClass::ShippingData => &[SourceKind::Vessels],
            SignalClass::WeatherData => &[SourceKind::Weather],
            SignalClass::NewsMonitoring => &[SourceKind::News],
            SignalClass::PortStatus => &[SourceKind::Imagery],
            SignalClass::EconomicData => &[SourceKind::Economic],
        }
    }
}

impl fmt::Display for SignalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalClass {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        SignalClass::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| ValidationError::new("signal_class", format!("unknown signal class '{}'", needle)))
    }
}

// =============================================================================
// Config
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorIntervals {
    #[serde(default = "default_shipping_secs")]
    pub shipping_data: u64,
    #[serde(default = "default_weather_secs")]
    pub weather_data: u64,
    #[serde(default = "default_news_secs")]
    pub news_monitoring: u64,
    #[serde(default = "default_port_secs")]
    pub port_status: u64,
    #[serde(default = "default_economic_secs")]
    pub economic_data: u64,
}

fn default_shipping_secs() -> u64 {
    300
}
fn default_weather_secs() -> u64 {
    1800
}
fn default_news_secs() -> u64 {
    600
}
fn default_port_secs() -> u64 {
    900
}
fn default_economic_secs() -> u64 {
    3600
}

impl Default for MonitorIntervals {
    fn default() -> Self {
        Self {
            shipping_data: default_shipping_secs(),
            weather_data: default_weather_secs(),
            news_monitoring: default_news_secs(),
            port_status: default_port_secs(),
            economic_data: default_economic_secs(),
        }
    }
}

impl MonitorIntervals {
    pub fn get(&self, class: SignalClass) -> Duration {
        let secs = match class {
            SignalClass::ShippingData => self.shipping_data,
            SignalClass::WeatherData => self.weather_data,
            SignalClass::NewsMonitoring => self.news_monitoring,
            SignalClass::PortStatus => self.port_status,
            SignalClass::EconomicData => self.economic_data,
        };
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringConfig {
    #[serde(default)]
    pub intervals: MonitorIntervals,
    /// Classes started by `supplyrisk monitor`.
    #[serde(default = "default_classes")]
    pub classes: Vec<SignalClass>,
    #[serde(default = "default_alert_tier")]
    pub alert_tier: Severity,
    #[serde(default = "default_segment")]
    pub segment: String,
    #[serde(default = "default_regions")]
    pub regions: Vec<String>,
    #[serde(default = "default_time_horizon")]
    pub time_horizon: String,
    #[serde(default = "default_alert_buffer")]
    pub alert_buffer: usize,
}

fn default_classes() -> Vec<SignalClass> {
    SignalClass::ALL.to_vec()
}
fn default_alert_tier() -> Severity {
    Severity::High
}
fn default_segment() -> String {
    "general".to_string()
}
fn default_regions() -> Vec<String> {
    vec!["Asia".to_string(), "Europe".to_string(), "North America".to_string()]
}
fn default_time_horizon() -> String {
    "7d".to_string()
}
fn default_alert_buffer() -> usize {
    64
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            intervals: MonitorIntervals::default(),
            classes: default_classes(),
            alert_tier: default_alert_tier(),
            segment: default_segment(),
            regions: default_regions(),
            time_horizon: default_time_horizon(),
            alert_buffer: default_alert_buffer(),
        }
    }
}

impl MonitoringConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if SignalClass::ALL.iter().any(|c| self.intervals.get(*c).is_zero()) {
            return Err(PipelineError::Configuration(
                "monitoring.intervals must all be positive".to_string(),
            ));
        }
        if self.alert_buffer == 0 {
            return Err(PipelineError::Configuration(
                "monitoring.alertBuffer must be at least 1".to_string(),
            ));
        }
        self.scope()
            .map(|_| ())
            .map_err(|e| PipelineError::Configuration(format!("monitoring scope: {}", e)))
    }

    pub fn scope(&self) -> Result<AssessmentScope, ValidationError> {
        AssessmentScope::parse(&self.segment, &self.regions, &self.time_horizon)
    }
}

// =============================================================================
// Monitor target
// =============================================================================

/// What a monitor drives each cycle.
#[async_trait]
pub trait MonitorTarget: Send + Sync {
    async fn run_class(&self, class: SignalClass, scope: &AssessmentScope) -> Result<RiskAssessment, PipelineError>;

    fn adapter_status(&self, source_id: &str) -> HealthStatus;

    fn adapter_last_error(&self, source_id: &str) -> Option<String>;
}

#[async_trait]
impl MonitorTarget for RiskPipeline {
    async fn run_class(&self, class: SignalClass, scope: &AssessmentScope) -> Result<RiskAssessment, PipelineError> {
        self.run_cycle(class.kinds(), scope).await
    }

    fn adapter_status(&self, source_id: &str) -> HealthStatus {
        self.health().status(source_id)
    }

    fn adapter_last_error(&self, source_id: &str) -> Option<String> {
        last_error(self.health(), source_id)
    }
}

fn last_error(health: &HealthMonitor, source_id: &str) -> Option<String> {
    health.adapter_health(source_id).and_then(|h| h.last_error)
}

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Scheduled,
    Running,
    Error,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub monitor_id: String,
    pub signal_class: SignalClass,
    pub interval_secs: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub status: MonitorState,
    pub last_tier: Option<Severity>,
    pub last_error: Option<String>,
    pub runs: u64,
    pub skipped_runs: u64,
}

struct MonitorHandle {
    status: Arc<Mutex<MonitorStatus>>,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

// =============================================================================
// Scheduler
// =============================================================================

pub struct MonitorScheduler {
    target: Arc<dyn MonitorTarget>,
    scope: AssessmentScope,
    alert_tier: Severity,
    alerts: mpsc::Sender<Alert>,
    monitors: Mutex<BTreeMap<String, MonitorHandle>>,
}

impl MonitorScheduler {
    pub fn new(
        target: Arc<dyn MonitorTarget>,
        config: &MonitoringConfig,
        alerts: mpsc::Sender<Alert>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            target,
            scope: config.scope()?,
            alert_tier: config.alert_tier,
            alerts,
            monitors: Mutex::new(BTreeMap::new()),
        })
    }

    /// Scheduler plus the receiving end of its alert channel.
    pub fn with_channel(
        target: Arc<dyn MonitorTarget>,
        config: &MonitoringConfig,
    ) -> Result<(Self, mpsc::Receiver<Alert>), PipelineError> {
        let (tx, rx) = mpsc::channel(config.alert_buffer.max(1));
        Ok((Self::new(target, config, tx)?, rx))
    }

    /// Start a monitor. Must be called inside a tokio runtime.
    pub fn configure_monitor(&self, signal_class: SignalClass, interval: Duration) -> Result<String, PipelineError> {
        if interval.is_zero() {
            return Err(ValidationError::new("interval", "must be positive").into());
        }
        let monitor_id = format!("{}-{}", signal_class, &Uuid::new_v4().simple().to_string()[..8]);
        let status = Arc::new(Mutex::new(MonitorStatus {
            monitor_id: monitor_id.clone(),
            signal_class,
            interval_secs: interval.as_secs(),
            last_run: None,
            next_run: Some(Utc::now()),
            status: MonitorState::Scheduled,
            last_tier: None,
            last_error: None,
            runs: 0,
            skipped_runs: 0,
        }));
        let wake = Arc::new(Notify::new());

        let monitor = Monitor {
            monitor_id: monitor_id.clone(),
            class: signal_class,
            interval,
            target: self.target.clone(),
            scope: self.scope.clone(),
            alert_tier: self.alert_tier,
            alerts: self.alerts.clone(),
            status: status.clone(),
            wake: wake.clone(),
        };
        let task = tokio::spawn(monitor.run());

        log::info!(
            "Monitor {}: scheduled every {}s as {}",
            signal_class,
            interval.as_secs(),
            monitor_id
        );
        self.monitors
            .lock()
            .insert(monitor_id.clone(), MonitorHandle { status, wake, task });
        Ok(monitor_id)
    }

    pub fn get_monitor_status(&self, monitor_id: &str) -> Option<MonitorStatus> {
        self.monitors.lock().get(monitor_id).map(|h| h.status.lock().clone())
    }

    pub fn monitors(&self) -> Vec<MonitorStatus> {
        self.monitors.lock().values().map(|h| h.status.lock().clone()).collect()
    }

    /// Run a monitor now instead of waiting for its next tick.
    pub fn trigger_now(&self, monitor_id: &str) -> bool {
        match self.monitors.lock().get(monitor_id) {
            Some(handle) if !handle.task.is_finished() => {
                handle.wake.notify_one();
                true
            }
            _ => false,
        }
    }

    pub fn stop_monitor(&self, monitor_id: &str) -> bool {
        let monitors = self.monitors.lock();
        let Some(handle) = monitors.get(monitor_id) else {
            return false;
        };
        stop(handle);
        log::info!("Monitor {}: stopped", monitor_id);
        true
    }

    pub fn shutdown(&self) {
        let monitors = self.monitors.lock();
        for handle in monitors.values() {
            stop(handle);
        }
        if !monitors.is_empty() {
            log::info!("Monitor scheduler: stopped {} monitors", monitors.len());
        }
    }
}

impl Drop for MonitorScheduler {
    fn drop(&mut self) {
        for handle in self.monitors.get_mut().values() {
            handle.task.abort();
        }
    }
}

fn stop(handle: &MonitorHandle) {
    let mut status = handle.status.lock();
    status.status = MonitorState::Stopped;
    status.next_run = None;
    handle.task.abort();
}

// =============================================================================
// Monitor loop
// =============================================================================

struct Monitor {
    monitor_id: String,
    class: SignalClass,
    interval: Duration,
    target: Arc<dyn MonitorTarget>,
    scope: AssessmentScope,
    alert_tier: Severity,
    alerts: mpsc::Sender<Alert>,
    status: Arc<Mutex<MonitorStatus>>,
    wake: Arc<Notify>,
}

impl Monitor {
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut previous_tier: Option<Severity> = None;
        let mut down: BTreeSet<&'static str> = BTreeSet::new();
        // End of the previous run; ticks due before it were skipped.
        let mut busy_until: Option<Instant> = None;

        loop {
            let deadline = tokio::select! {
                deadline = ticker.tick() => deadline,
                _ = self.wake.notified() => {
                    log::info!("Monitor {}: woken for an immediate run", self.class);
                    Instant::now()
                },
            };
            if busy_until.is_some_and(|end| deadline < end) {
                continue;
            }

            let started = Utc::now();
            if !self.begin(started) {
                return;
            }

            let outcome = self.target.run_class(self.class, &self.scope).await;
            let ended = Instant::now();

            let skipped = missed_ticks(deadline, ended, self.interval);
            busy_until = Some(ended);
            let next_deadline = deadline + self.interval * (skipped as u32 + 1);

            let tier = outcome.as_ref().ok().map(|a| a.overall_tier);
            match &outcome {
                Ok(assessment) => {
                    if crossed_upward(previous_tier, assessment.overall_tier, self.alert_tier) {
                        log::warn!(
                            "Monitor {}: tier rose to {} ({:.1})",
                            self.class,
                            assessment.overall_tier,
                            assessment.overall_score
                        );
                        self.emit(Alert::tier_crossing(&self.monitor_id, self.class, previous_tier, assessment));
                    }
                    previous_tier = Some(assessment.overall_tier);
                }
                Err(e) => log::warn!("Monitor {}: cycle failed: {}", self.class, e),
            }
            self.check_adapters(&mut down);

            let until_next = ChronoDuration::from_std(next_deadline.saturating_duration_since(Instant::now()))
                .unwrap_or_else(|_| ChronoDuration::zero());
            let next_run = Utc::now() + until_next;
            if !self.finish(tier, outcome.err().map(|e| e.to_string()), skipped, next_run) {
                return;
            }
        }
    }

    /// Mark the monitor running. False once it has been stopped.
    fn begin(&self, started: DateTime<Utc>) -> bool {
        let mut status = self.status.lock();
        if status.status == MonitorState::Stopped {
            return false;
        }
        status.status = MonitorState::Running;
        status.last_run = Some(started);
        true
    }

    fn finish(
        &self,
        tier: Option<Severity>,
        error: Option<String>,
        skipped: u64,
        next_run: DateTime<Utc>,
    ) -> bool {
        let mut status = self.status.lock();
        if status.status == MonitorState::Stopped {
            return false;
        }
        status.runs += 1;
        status.skipped_runs += skipped;
        status.next_run = Some(next_run);
        if tier.is_some() {
            status.last_tier = tier;
        }
        status.status = if error.is_some() {
            MonitorState::Error
        } else {
            MonitorState::Scheduled
        };
        status.last_error = error;
        true
    }

    /// Alert on adapters of this class that went down since the last check.
    fn check_adapters(&self, down: &mut BTreeSet<&'static str>) {
        for kind in self.class.kinds() {
            let source_id = kind.source_id();
            if self.target.adapter_status(source_id) == HealthStatus::Down {
                if down.insert(source_id) {
                    log::warn!("Monitor {}: {} adapter is down", self.class, source_id);
                    let error = self.target.adapter_last_error(source_id);
                    self.emit(Alert::adapter_down(&self.monitor_id, self.class, source_id, error.as_deref()));
                }
            } else {
                down.remove(source_id);
            }
        }
    }

    fn emit(&self, alert: Alert) {
        match self.alerts.try_send(alert) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(alert)) => {
                log::error!("Monitor {}: alert channel full, dropped: {}", self.class, alert.title);
            }
            Err(mpsc::error::TrySendError::Closed(alert)) => {
                log::error!("Monitor {}: no alert receiver, dropped: {}", self.class, alert.title);
            }
        }
    }
}

/// Upward crossing: previous tier below the alert tier (or unknown), current at or above.
pub fn crossed_upward(previous: Option<Severity>, current: Severity, alert_tier: Severity) -> bool {
    current >= alert_tier && previous.map_or(true, |p| p < alert_tier)
}

/// Ticks that came due strictly after `deadline` and strictly before `ended`.
fn missed_ticks(deadline: Instant, ended: Instant, interval: Duration) -> u64 {
    let busy = ended.saturating_duration_since(deadline);
    if busy.is_zero() || interval.is_zero() {
        return 0;
    }
    ((busy.as_nanos() - 1) / interval.as_nanos()) as u64
}
