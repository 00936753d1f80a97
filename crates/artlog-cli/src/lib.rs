//! ART log extraction CLI library.
//!
//! This crate provides the CLI interface: source handling, remote-log
//! unpacking and the run orchestration around `artlog-core`.

mod cli;
mod config;
pub mod extract;
pub mod remote;
pub mod source;

pub use cli::Cli;
pub use config::Config;
pub use extract::{RunOptions, RunReport, run};
