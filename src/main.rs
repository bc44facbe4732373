use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use img2prompt::cli::Cli;
use img2prompt::config::Config;
use img2prompt::pipeline;

const LOG_DIR: &str = "logs";
const LOG_FILE: &str = "logs/run.log";

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging().context("could not set up logging")?;

    let config = Config::load(&cli)?;
    let summary = pipeline::run(&config)?;

    info!(
        "done: {} prompt(s) written, {} resource(s) downloaded, {} failed",
        summary.prompts_written, summary.downloads.downloaded, summary.downloads.failed
    );
    Ok(())
}

/// Console gets INFO and up (overridable through `RUST_LOG`), the log
/// file gets everything at DEBUG. The previous run's log is kept as a
/// `.bak` file.
fn init_logging() -> io::Result<()> {
    fs::create_dir_all(LOG_DIR)?;
    rotate_previous_log(Path::new(LOG_FILE))?;
    let file = File::create(LOG_FILE)?;

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .without_time()
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        );
    let sink = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Arc::new(file))
        .with_filter(LevelFilter::DEBUG);

    tracing_subscriber::registry().with(console).with(sink).init();
    Ok(())
}

fn rotate_previous_log(path: &Path) -> io::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let backup = path.with_extension("log.bak");
    if backup.exists() {
        fs::remove_file(&backup)?;
    }
    fs::rename(path, backup)
}
