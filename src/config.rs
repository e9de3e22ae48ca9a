//! Runtime configuration stored in ~/.supplyrisk/config.json.
//!
//! Every section defaults, so a partial file (or no file at all) is valid.
//! Credentials are read from the environment on top of the file, which lets
//! operators keep keys out of the JSON.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregationConfig;
use crate::error::PipelineError;
use crate::health::HealthConfig;
use crate::normalize::BreakpointTables;
use crate::scheduler::MonitoringConfig;
use crate::sources::SourceKind;

/// Env var that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "SUPPLYRISK_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub breakpoints: BreakpointTables,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Upper bound on adapter calls in flight during one cycle.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
}

fn default_max_concurrent_fetches() -> usize {
    4
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent_fetches(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcesConfig {
    #[serde(default)]
    pub vessels: SourceConfig,
    #[serde(default)]
    pub weather: SourceConfig,
    #[serde(default)]
    pub news: SourceConfig,
    #[serde(default)]
    pub economic: SourceConfig,
    #[serde(default)]
    pub imagery: SourceConfig,
}

impl SourcesConfig {
    pub fn get(&self, kind: SourceKind) -> &SourceConfig {
        match kind {
            SourceKind::Vessels => &self.vessels,
            SourceKind::Weather => &self.weather,
            SourceKind::News => &self.news,
            SourceKind::Economic => &self.economic,
            SourceKind::Imagery => &self.imagery,
        }
    }

    pub fn get_mut(&mut self, kind: SourceKind) -> &mut SourceConfig {
        match kind {
            SourceKind::Vessels => &mut self.vessels,
            SourceKind::Weather => &mut self.weather,
            SourceKind::News => &mut self.news,
            SourceKind::Economic => &mut self.economic,
            SourceKind::Imagery => &mut self.imagery,
        }
    }
}

/// Per-source settings. Fields left unset fall back to the source's defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Confidence attached to payloads fetched live.
    #[serde(default = "default_live_confidence")]
    pub live_confidence: f64,
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    4_000
}

fn default_live_confidence() -> f64 {
    0.9
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            base_url: None,
            rate_limit: None,
            timeout_ms: default_timeout_ms(),
            live_confidence: default_live_confidence(),
        }
    }
}

impl SourceConfig {
    /// API key if present and non-blank.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn base_url_for(&self, kind: SourceKind) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| kind.default_base_url().to_string())
    }

    pub fn rate_limit_for(&self, kind: SourceKind) -> RateLimitConfig {
        self.rate_limit.unwrap_or_else(|| kind.default_rate_limit())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

/// Ranges for the seeded generators used when a source is simulated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    #[serde(default = "default_confidence_min")]
    pub confidence_min: f64,
    #[serde(default = "default_confidence_max")]
    pub confidence_max: f64,
    /// Mixed into every seed; change it to get a different deterministic world.
    #[serde(default)]
    pub seed_salt: u64,
}

fn default_confidence_min() -> f64 {
    0.55
}

fn default_confidence_max() -> f64 {
    0.8
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            confidence_min: default_confidence_min(),
            confidence_max: default_confidence_max(),
            seed_salt: 0,
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::home_dir()
        .unwrap_or_default()
        .join(".supplyrisk")
        .join("config.json")
}

/// Load from the default path, apply env credentials, validate.
pub fn load_config() -> Result<Config, PipelineError> {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &Path) -> Result<Config, PipelineError> {
    let mut config = if path.exists() {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Config::from_json_str(&content)?
    } else {
        log::info!("No config at {}, using defaults", path.display());
        Config::default()
    };
    config.apply_env_overrides(|name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn from_json_str(content: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(content)
            .map_err(|e| PipelineError::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Fill credentials from the environment. The lookup is injected so tests
    /// do not have to mutate process env.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for kind in SourceKind::ALL {
            let found = kind
                .credential_env_vars()
                .iter()
                .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()));
            if let Some(key) = found {
                self.sources.get_mut(kind).api_key = Some(key);
            }
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.aggregation.validate()?;
        self.breakpoints.validate()?;
        self.health.validate()?;
        self.monitoring.validate()?;
        if self.pipeline.max_concurrent_fetches == 0 {
            return Err(PipelineError::Configuration(
                "pipeline.maxConcurrentFetches must be at least 1".to_string(),
            ));
        }
        if self.simulation.confidence_min > self.simulation.confidence_max {
            return Err(PipelineError::Configuration(
                "simulation.confidenceMin must not exceed confidenceMax".to_string(),
            ));
        }
        for kind in SourceKind::ALL {
            let source = self.sources.get(kind);
            if source.timeout_ms == 0 {
                return Err(PipelineError::Configuration(format!(
                    "sources.{}.timeoutMs must be positive",
                    kind.source_id()
                )));
            }
            let limit = source.rate_limit_for(kind);
            if limit.max_requests == 0 || limit.window_secs == 0 {
                return Err(PipelineError::Configuration(format!(
                    "sources.{}.rateLimit needs a positive ceiling and window",
                    kind.source_id()
                )));
            }
        }
        Ok(())
    }

    /// Which sources will run simulated, and whether that matters.
    pub fn credential_report(&self) -> CredentialReport {
        let mut missing_keys = Vec::new();
        let mut warnings = Vec::new();
        for kind in SourceKind::ALL {
            let source = self.sources.get(kind);
            if !source.enabled || source.credential().is_some() {
                continue;
            }
            let env = kind.credential_env_vars()[0];
            if kind.credential_required() {
                missing_keys.push(env.to_string());
            } else {
                warnings.push(format!(
                    "{} not configured - {} data will be simulated",
                    env,
                    kind.source_id()
                ));
            }
        }
        CredentialReport {
            is_valid: missing_keys.is_empty(),
            missing_keys,
            warnings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialReport {
    pub is_valid: bool,
    pub missing_keys: Vec<String>,
    pub warnings: Vec<String>,
}

impl CredentialReport {
    pub fn log(&self) {
        if self.is_valid {
            log::info!("All required source credentials are configured");
        } else {
            log::warn!(
                "Missing source credentials ({}); those sources will use simulated data",
                self.missing_keys.join(", ")
            );
        }
        for warning in &self.warnings {
            log::info!("{}", warning);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = Config::from_json_str(
            r#"{ "sources": { "weather": { "apiKey": "abc", "timeoutMs": 2500 } } }"#,
        )
        .expect("parse");
        assert_eq!(config.sources.weather.credential(), Some("abc"));
        assert_eq!(config.sources.weather.timeout_ms, 2500);
        assert_eq!(config.sources.vessels.timeout_ms, 4000);
        assert_eq!(
            config.sources.news.rate_limit_for(SourceKind::News),
            RateLimitConfig { max_requests: 500, window_secs: 86_400 }
        );
        assert_eq!(config.pipeline.max_concurrent_fetches, 4);
        assert_eq!(config.aggregation.thresholds.high, 2.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_file_is_configuration_error() {
        let err = Config::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_blank_key_is_not_a_credential() {
        let mut source = SourceConfig::default();
        source.api_key = Some("   ".to_string());
        assert!(source.credential().is_none());
    }

    #[test]
    fn test_env_overrides_fill_credentials() {
        let mut config = Config::default();
        config.apply_env_overrides(|name| match name {
            "NEWSAPI_KEY" => Some("news-key".to_string()),
            "SATELLITE_API_KEY" => Some("sat-key".to_string()),
            _ => None,
        });
        assert_eq!(config.sources.news.credential(), Some("news-key"));
        assert_eq!(config.sources.imagery.credential(), Some("sat-key"));
        assert!(config.sources.vessels.credential().is_none());
    }

    #[test]
    fn test_credential_report() {
        let mut config = Config::default();
        config.sources.weather.api_key = Some("k".to_string());
        let report = config.credential_report();
        assert!(!report.is_valid);
        assert_eq!(report.missing_keys, vec!["MARINETRAFFIC_API_KEY", "NEWSAPI_KEY"]);
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.pipeline.max_concurrent_fetches = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sources.economic.rate_limit = Some(RateLimitConfig { max_requests: 0, window_secs: 60 });
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.aggregation.weights.set(Severity::High, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "aggregation": { "thresholds": { "medium": 1.5, "high": 2.0, "critical": 3.0 } } }"#,
        )
        .expect("write");
        let config = load_config_from(&path).expect("load");
        assert_eq!(config.aggregation.thresholds.critical, Some(3.0));

        let missing = load_config_from(&dir.path().join("absent.json")).expect("defaults");
        assert!(missing.aggregation.thresholds.critical.is_none());
    }
}
