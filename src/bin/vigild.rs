//! vigild - motion-gated scene analysis daemon
//!
//! 1. Captures frames from the configured source
//! 2. Gates them on frame-to-frame motion
//! 3. Verifies admitted frames with the vision service (describe, then localize)
//! 4. Persists verified alerts and notifies
//!
//! First Ctrl-C drains queued work and stops; a second one aborts.

use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use vigil::pipeline::{EndReason, StatsSnapshot};
use vigil::ui::{format_duration, Ui};
use vigil::{CliOverrides, IndexBackend, Pipeline, VigilConfig};

#[derive(Parser, Debug)]
#[command(name = "vigild", version, about = "Motion-gated scene analysis daemon")]
struct Args {
    /// Frame source: stub://name, http(s):// MJPEG/snapshot URL, or an image directory
    #[arg(long, env = "VIGIL_SOURCE_URL")]
    source: Option<String>,

    /// Minimum seconds between frames sent for analysis (0 disables throttling)
    #[arg(long, value_name = "SECS")]
    interval: Option<f64>,

    /// Run without the live status display
    #[arg(long, alias = "no-preview")]
    headless: bool,

    /// Config file (JSON, or TOML with a .toml extension); overrides VIGIL_CONFIG
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Alert index backend (json|sqlite)
    #[arg(long, value_name = "BACKEND")]
    index_backend: Option<IndexBackend>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => VigilConfig::load_with(Some(path))?,
        None => VigilConfig::load()?,
    };
    cfg.apply_overrides(&CliOverrides {
        source_url: args.source.clone(),
        interval_secs: args.interval,
        headless: args.headless,
        index_backend: args.index_backend,
    })?;

    let interactive = std::io::stderr().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), interactive, cfg.headless);
    let pipeline = {
        let _stage = ui.stage("Wire pipeline");
        Pipeline::from_config(&cfg)?
    };
    log::info!(
        "vigild {} watching {} (alerts -> {}, index -> {})",
        env!("CARGO_PKG_VERSION"),
        cfg.source_url,
        cfg.storage.alerts_dir.display(),
        cfg.storage.index_path.display()
    );

    let handle = pipeline.start()?;
    let stopper = handle.stopper();
    ctrlc::set_handler(move || {
        if stopper.is_stopping() {
            stopper.abort();
        } else {
            stopper.stop();
        }
    })
    .expect("error setting Ctrl-C handler");

    let stats = handle.stats();
    let status = ui.status(stats.clone());
    let result = handle.join();
    drop(status);

    match result {
        Ok(report) => {
            log_summary(&report.stats, Some(&report.end));
            if report.is_degraded() {
                log::warn!("one or more alerts could not be persisted during this session");
            }
            Ok(())
        }
        Err(err) => {
            log_summary(&stats.snapshot(), None);
            Err(err)
        }
    }
}

fn log_summary(stats: &StatsSnapshot, end: Option<&EndReason>) {
    let ended = match end {
        Some(EndReason::Stopped) => "stopped",
        Some(EndReason::Aborted) => "aborted",
        Some(EndReason::EndOfStream) => "end of stream",
        None => "source failure",
    };
    log::info!(
        "session summary ({}, {}): {}",
        ended,
        format_duration(std::time::Duration::from_secs_f64(stats.elapsed_secs)),
        stats.status_line()
    );
    log::info!(
        "  throttled={} invalid={} rejected={} inference_failures={} persistence_failures={}",
        stats.frames_throttled,
        stats.frames_invalid,
        stats.frames_rejected,
        stats.inference_failures,
        stats.persistence_failures
    );
}
