//! vigil_alerts - list recent alerts from the alert index.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use vigil::alert::open_index;
use vigil::notify::LogNotifier;
use vigil::{IndexBackend, VigilConfig};

#[derive(Parser, Debug)]
#[command(name = "vigil_alerts", about = "List recent alerts from the alert index")]
struct Args {
    /// Index file; defaults to the configured one
    #[arg(long, value_name = "PATH")]
    index: Option<PathBuf>,

    /// Index backend (json|sqlite); defaults to the configured one
    #[arg(long, value_name = "BACKEND")]
    backend: Option<IndexBackend>,

    /// Number of most recent alerts to show
    #[arg(long, default_value_t = 10)]
    recent: usize,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let cfg = VigilConfig::load()?;
    let backend = args.backend.unwrap_or(cfg.storage.index_backend);
    let path = args.index.unwrap_or(cfg.storage.index_path);

    let mut index = open_index(backend, &path)?;
    let alerts = index.recent(args.recent)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&alerts)?);
        return Ok(());
    }
    if alerts.is_empty() {
        println!("no alerts in {}", path.display());
        return Ok(());
    }
    println!(
        "{} of {} alert(s) in {}",
        alerts.len(),
        index.len()?,
        path.display()
    );
    for alert in &alerts {
        println!();
        println!("{}", LogNotifier::render(alert));
    }
    Ok(())
}
