//! supplyrisk CLI.
//!
//! Usage:
//!   supplyrisk assess <segment> [regions,comma,separated] [horizon]
//!   supplyrisk health
//!   supplyrisk monitor
//!
//! Config is read from `~/.supplyrisk/config.json` (or `$SUPPLYRISK_CONFIG`);
//! source credentials come from the environment.
//!
//! Pipeline errors are printed to stderr as an `ErrorView` JSON object before
//! the process exits non-zero.

use std::sync::Arc;

use anyhow::{bail, Context};

use supplyrisk_lib::config::{load_config, Config};
use supplyrisk_lib::error::{ErrorView, PipelineError};
use supplyrisk_lib::pipeline::RiskPipeline;
use supplyrisk_lib::scheduler::MonitorScheduler;

const USAGE: &str = "usage: supplyrisk <assess <segment> [regions] [horizon] | health | monitor>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = run(&args).await;
    if let Err(err) = &result {
        if let Some(pipeline_err) = err.downcast_ref::<PipelineError>() {
            eprintln!("{}", serde_json::to_string_pretty(&ErrorView::from(pipeline_err))?);
        }
    }
    result
}

async fn run(args: &[String]) -> anyhow::Result<()> {
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    let config = load_config().context("Failed to load supplyrisk config")?;
    config.credential_report().log();

    match command.as_str() {
        "assess" => assess(&config, &args[1..]).await,
        "health" => health(&config).await,
        "monitor" => monitor(&config).await,
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }
}

async fn assess(config: &Config, args: &[String]) -> anyhow::Result<()> {
    let Some(segment) = args.first() else {
        bail!(USAGE);
    };
    let regions: Vec<String> = args
        .get(1)
        .map(|r| r.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    let horizon = args.get(2).map(String::as_str).unwrap_or("30d");

    let pipeline = RiskPipeline::new(config)?;
    let assessment = pipeline.assess(segment, &regions, horizon).await?;
    println!("{}", serde_json::to_string_pretty(&assessment)?);
    Ok(())
}

/// One assessment over the monitoring scope, then both health reports.
async fn health(config: &Config) -> anyhow::Result<()> {
    let pipeline = RiskPipeline::new(config)?;
    let monitoring = &config.monitoring;
    if let Err(e) = pipeline
        .assess(&monitoring.segment, &monitoring.regions, &monitoring.time_horizon)
        .await
    {
        log::warn!("Health check assessment failed: {}", e);
    }
    let report = serde_json::json!({
        "health": pipeline.health().health_report(),
        "quality": pipeline.health().quality_report(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn monitor(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(RiskPipeline::new(config)?);
    let (scheduler, mut alerts) = MonitorScheduler::with_channel(pipeline, &config.monitoring)?;
    for class in &config.monitoring.classes {
        scheduler.configure_monitor(*class, config.monitoring.intervals.get(*class))?;
    }

    loop {
        tokio::select! {
            alert = alerts.recv() => match alert {
                Some(alert) => log::warn!("ALERT {}", alert),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("Monitor scheduler: interrupted, shutting down");
                break;
            },
        }
    }

    scheduler.shutdown();
    for status in scheduler.monitors() {
        log::info!(
            "Monitor {}: {} runs, {} skipped, last tier {}",
            status.signal_class,
            status.runs,
            status.skipped_runs,
            status.last_tier.map(|t| t.as_str()).unwrap_or("none")
        );
    }
    Ok(())
}
