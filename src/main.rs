//! Binary entrypoint for the eInk frame daemon.
//!
//! Wires the store, catalog, and rotation scheduler together and runs until
//! ctrl-c. The upload/crop web surface talks to the same catalog API but
//! lives outside this binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt};

use eink_frame::catalog::Catalog;
use eink_frame::config::Configuration;
use eink_frame::display::LogDisplay;
use eink_frame::files::AssetStore;
use eink_frame::store::StateStore;
use eink_frame::tasks::rotation::RotationScheduler;

/// Simple CLI
#[derive(Debug, Parser)]
#[command(name = "eink-frame", about = "eInk photo frame rotation daemon")]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    // map -v to log level
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("eink_frame={level}").parse()?);
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let cfg = Configuration::from_yaml_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?
        .validated()
        .context("validating configuration")?;

    let assets = Arc::new(AssetStore::new(cfg.base_dir.clone()));
    assets.ensure_layout().context("preparing data directories")?;

    let store = Arc::new(StateStore::new(cfg.state_file(), cfg.default_settings()));
    let catalog = Catalog::new(store, assets);

    // Surface a corrupt state file now rather than from inside the rotation
    // task.
    let ready = catalog
        .get_ready_sorted()
        .context("loading state document")?;
    let pending = catalog.get_pending().context("loading state document")?;
    info!(
        ready = ready.len(),
        pending = pending.len(),
        state_file = %cfg.state_file().display(),
        "catalog loaded"
    );

    let mut scheduler = RotationScheduler::new(catalog, Arc::new(LogDisplay));
    scheduler.start();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("ctrl-c received; shutting down");
    scheduler.stop().await;

    Ok(())
}
