//! Supply-chain risk signals from several upstream sources.
//!
//! Every source sits behind an adapter that answers from seeded simulation
//! when it has no credentials, is rate limited, or fails. A health monitor
//! watches every call; the aggregation engine discounts confidence for
//! unhealthy sources instead of failing.

pub mod aggregate;
pub mod alerts;
pub mod config;
pub mod error;
pub mod geo;
pub mod health;
pub mod normalize;
pub mod pipeline;
pub mod scheduler;
pub mod sources;
pub mod types;

pub use crate::aggregate::AggregationEngine;
pub use crate::config::{load_config, Config};
pub use crate::error::{PipelineError, UpstreamError, ValidationError};
pub use crate::health::HealthMonitor;
pub use crate::pipeline::RiskPipeline;
pub use crate::scheduler::{MonitorScheduler, SignalClass};
