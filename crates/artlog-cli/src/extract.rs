//! One extraction run: from a source to per-test log bundles.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use artlog_core::{
    ArchiveSource, DirSource, LogPartitioner, LogSpec, PartitionConfig, Team, WindowExtractor,
    ZipSource,
};

use crate::config::expand_home;
use crate::remote::RemoteLogs;
use crate::source::{SourceKind, classify, download, url_output_folder};
use crate::{Cli, Config};

/// Name prefix of the per-run scratch directory.
const SCRATCH_PREFIX: &str = "tempdir";

/// File name of downloaded build artifacts inside the scratch directory.
const ARTIFACT_ZIP: &str = "artifact.zip";

/// Everything a run needs, after flags and configuration are merged.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub source: String,
    pub folder: PathBuf,
    pub logs: Vec<String>,
    pub team: Option<Team>,
    pub tolerance_secs: u32,
    pub accept_invalid_certs: bool,
    /// Remove the scratch directory when the run ends.
    pub clean: bool,
}

impl RunOptions {
    /// Merges command-line flags over the loaded configuration.
    pub fn new(cli: &Cli, config: &Config) -> Self {
        let folder = cli.folder.as_ref().unwrap_or(&config.output_folder);
        let logs = if cli.logs.is_empty() {
            config.logs.clone()
        } else {
            cli.logs.clone()
        };
        Self {
            source: cli.source.clone(),
            folder: expand_home(folder),
            logs,
            team: cli.team,
            tolerance_secs: config.tolerance_secs,
            accept_invalid_certs: config.accept_invalid_certs,
            clean: !cli.no_clean,
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Folder holding the per-test directories.
    pub output: PathBuf,
    pub tests: usize,
    pub fragments: usize,
    /// Scratch directory left behind when cleanup is disabled.
    pub scratch: Option<PathBuf>,
}

/// Runs window extraction and partitioning for one source.
///
/// The scratch directory is removed when the run ends, whether or not it
/// succeeded, unless cleanup is disabled.
pub fn run(options: &RunOptions) -> Result<RunReport> {
    let kind = classify(&options.source)?;
    let output = match &kind {
        SourceKind::Url(url) => url_output_folder(&options.folder, url)?,
        SourceKind::Zip(_) | SourceKind::Directory(_) => options.folder.clone(),
    };
    fs::create_dir_all(&output)
        .with_context(|| format!("failed to create {}", output.display()))?;

    let scratch = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .tempdir_in(&output)
        .context("failed to create scratch directory")?;
    tracing::debug!(scratch = %scratch.path().display(), "created scratch directory");

    let result = run_in(options, &kind, &output, scratch.path());

    let kept = if options.clean {
        if let Err(err) = scratch.close() {
            tracing::warn!(error = %err, "failed to remove scratch directory");
        }
        None
    } else {
        Some(scratch.keep())
    };

    let (tests, fragments) = result?;
    Ok(RunReport {
        output,
        tests,
        fragments,
        scratch: kept,
    })
}

fn run_in(options: &RunOptions, kind: &SourceKind, output: &Path, scratch: &Path) -> Result<(usize, usize)> {
    let source = open_source(options, kind, scratch)?;
    let specs: Vec<LogSpec> = options
        .logs
        .iter()
        .map(|name| LogSpec::from_name(name.as_str()))
        .collect();

    let windows = WindowExtractor::new(output)
        .with_team(options.team)
        .extract(source.as_ref())
        .context("failed to parse ART runner logs")?;

    let remote = RemoteLogs::unpack(source.as_ref(), &specs, scratch)?;
    let summary = LogPartitioner::new(PartitionConfig::with_tolerance_secs(options.tolerance_secs))
        .partition(&windows, &specs, &remote)
        .context("failed to split logs")?;
    tracing::info!(
        tests = windows.len(),
        fragments = summary.fragments.len(),
        members_read = summary.members_read,
        members_skipped = summary.members_skipped,
        "split logs"
    );

    // Runner fragments are written during window extraction, one per test.
    Ok((windows.len(), summary.fragments.len() + windows.len()))
}

fn open_source(options: &RunOptions, kind: &SourceKind, scratch: &Path) -> Result<Box<dyn ArchiveSource>> {
    let source: Box<dyn ArchiveSource> = match kind {
        SourceKind::Url(url) => {
            let zip = download(url, &scratch.join(ARTIFACT_ZIP), options.accept_invalid_certs)?;
            Box::new(
                ZipSource::open(&zip, scratch)
                    .with_context(|| format!("failed to open {}", zip.display()))?,
            )
        }
        SourceKind::Zip(path) => Box::new(
            ZipSource::open(path, scratch)
                .with_context(|| format!("failed to open {}", path.display()))?,
        ),
        SourceKind::Directory(path) => Box::new(DirSource::new(path)),
    };
    tracing::info!(source = source.id(), "opened log source");
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::Parser;

    fn config() -> Config {
        Config {
            output_folder: PathBuf::from("/srv/art"),
            logs: vec!["engine.log".to_string()],
            tolerance_secs: 90,
            accept_invalid_certs: true,
        }
    }

    #[test]
    fn config_fills_unset_flags() {
        let cli = Cli::try_parse_from(["artlog", "-s", "run.zip"]).unwrap();
        let options = RunOptions::new(&cli, &config());
        assert_eq!(options.folder, PathBuf::from("/srv/art"));
        assert_eq!(options.logs, vec!["engine.log"]);
        assert_eq!(options.tolerance_secs, 90);
        assert!(options.accept_invalid_certs);
        assert!(options.clean);
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "artlog",
            "-s",
            "run.zip",
            "-f",
            "/tmp/out",
            "-l",
            "vdsm.log",
            "--no-clean",
        ])
        .unwrap();
        let options = RunOptions::new(&cli, &config());
        assert_eq!(options.folder, PathBuf::from("/tmp/out"));
        assert_eq!(options.logs, vec!["vdsm.log"]);
        assert!(!options.clean);
    }

    #[test]
    fn failed_run_still_removes_scratch() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("empty-source");
        fs::create_dir_all(&source).unwrap();
        let out = temp.path().join("out");

        let options = RunOptions {
            source: source.display().to_string(),
            folder: out.clone(),
            logs: vec!["engine.log".to_string()],
            team: None,
            tolerance_secs: 60,
            accept_invalid_certs: false,
            clean: true,
        };
        let err = run(&options).unwrap_err();
        assert!(format!("{err:#}").contains("failed to find ART runner logs"));
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }
}
