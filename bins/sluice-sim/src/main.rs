//! Sluice simulator: replay a stream scenario and print the outcome.
//!
//! ```text
//! sluice-sim --scenario demos/launch.toml
//! sluice-sim --scenario launch.toml --persist --log-format json
//! ```

mod replay;
mod scenario;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use sluice_store::RocksLedger;
use sluice_stream::MemoryLedger;

use crate::replay::replay;
use crate::scenario::ScenarioConfig;

/// Sluice streaming-exchange simulator.
#[derive(Parser, Debug)]
#[command(name = "sluice-sim", version, about = "Replay a Sluice stream scenario")]
struct Args {
    /// Scenario file (TOML, JSON or YAML).
    #[arg(long)]
    scenario: PathBuf,

    /// Directory for the RocksDB stream ledger. Without it the stream lives
    /// in memory.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Persist the ledger under the platform data directory.
    #[arg(long, conflicts_with = "state_dir")]
    persist: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (text or json).
    #[arg(long, default_value = "text")]
    log_format: String,
}

impl Args {
    fn state_dir(&self) -> Option<PathBuf> {
        if self.persist {
            return Some(default_state_dir());
        }
        self.state_dir.clone()
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sluice")
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, &args.log_format);

    let scenario = ScenarioConfig::load(&args.scenario)
        .with_context(|| format!("failed to load scenario {}", args.scenario.display()))?;
    info!(
        scenario = %args.scenario.display(),
        stream = scenario.stream_id,
        actions = scenario.actions.len(),
        "loaded scenario"
    );

    let report = match args.state_dir() {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create state directory {}", dir.display()))?;
            let path = dir.join(format!("stream-{}", scenario.stream_id));
            info!(path = %path.display(), "opening stream ledger");
            let ledger = RocksLedger::open(&path)
                .with_context(|| format!("failed to open ledger at {}", path.display()))?;
            replay(&scenario, ledger)?
        }
        None => replay(&scenario, MemoryLedger::new())?,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Crates whose events follow `--log-level`; everything else logs warnings
/// only.
const SLUICE_TARGETS: &[&str] = &["sluice_sim", "sluice_stream", "sluice_store"];

fn default_directives(level: &str) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(SLUICE_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.join(",")
}

/// Log to stderr so the JSON report on stdout stays parseable. `RUST_LOG`
/// overrides the CLI level.
fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    match format {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json().with_current_span(false))
            .init(),
        _ => tracing_subscriber::registry().with(filter).with(layer.compact()).init(),
    }
}
