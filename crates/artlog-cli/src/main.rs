use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use artlog_cli::{Cli, Config, RunOptions};

/// Installs the tracing subscriber: `-v` is info, `-vv` debug, otherwise
/// `RUST_LOG` (default warn).
fn init_tracing(verbose: u8, log_output: Option<&Path>) -> Result<()> {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    if let Some(path) = log_output {
        let file = File::create(path)
            .with_context(|| format!("failed to create log file {}", path.display()))?;
        let _ = builder
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init();
    } else {
        let _ = builder.with_writer(std::io::stderr).try_init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_output.as_deref())?;

    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let options = RunOptions::new(&cli, &config);
    let report = artlog_cli::run(&options)?;

    println!(
        "Extracted {} tests ({} fragments) into {}",
        report.tests,
        report.fragments,
        report.output.display()
    );
    if let Some(scratch) = &report.scratch {
        println!("Scratch directory kept at {}", scratch.display());
    }
    Ok(())
}
