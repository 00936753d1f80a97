//! Command-line argument definitions.

use std::path::PathBuf;

use artlog_core::Team;
use clap::{ArgAction, Parser};

/// Split ART CI run logs into per-test bundles.
///
/// Reads the ART runner log to learn when each test ran, then cuts the engine
/// and host logs of the run into one fragment per test.
#[derive(Debug, Parser)]
#[command(name = "artlog", version, about, long_about = None)]
pub struct Cli {
    /// Jenkins job URL, artifact zip, or directory holding the run's logs.
    #[arg(short, long)]
    pub source: String,

    /// Output folder [default: ~/art-tests-logs].
    #[arg(short, long)]
    pub folder: Option<PathBuf>,

    /// Logs to split, comma separated [default: vdsm.log,supervdsm.log,engine.log].
    #[arg(short, long, value_delimiter = ',')]
    pub logs: Vec<String>,

    /// Only extract the tests of this team.
    #[arg(short, long)]
    pub team: Option<Team>,

    /// Write diagnostics to this file instead of stderr.
    #[arg(long)]
    pub log_output: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Keep the scratch directory after the run.
    #[arg(long)]
    pub no_clean: bool,

    /// Path to config file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
