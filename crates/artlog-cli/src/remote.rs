//! Engine and host tarballs gathered by the log-collection playbook.
//!
//! The artifact tree holds one directory per collected machine under
//! [`REMOTE_LOGS_DIR`]; each holds a tarball of that machine's logs. The
//! tarballs a run needs are copied into the scratch directory, renamed after
//! their machine directory, and opened for partitioning.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use artlog_core::{ArchiveEntry, ArchiveSource, LogKind, LogSpec, SourceLocator, TarGzSource};

/// Where the collected machine logs live inside the artifact tree.
pub const REMOTE_LOGS_DIR: &str = "ansible-playbooks/playbooks/ovirt-collect-logs/logs/";

/// Machine directories containing this hold hypervisor logs.
const HOST_MARKER: &str = "hypervisor";

/// Machine directories containing this hold engine logs.
const ENGINE_MARKER: &str = "engine";

const HOST_LOGS_DIR: &str = "host-logs";
const ENGINE_LOGS_DIR: &str = "engine-logs";

/// Opened tarballs, per log family.
#[derive(Debug, Default)]
pub struct RemoteLogs {
    engine: Vec<TarGzSource>,
    hosts: Vec<TarGzSource>,
}

impl RemoteLogs {
    /// Copies the tarballs needed by `specs` out of `source` into `scratch`
    /// and opens them.
    pub fn unpack(source: &dyn ArchiveSource, specs: &[LogSpec], scratch: &Path) -> Result<Self> {
        let entries = source
            .list_entries(REMOTE_LOGS_DIR)
            .with_context(|| format!("failed to list {REMOTE_LOGS_DIR} in {}", source.id()))?;
        let wants = |kind: LogKind| specs.iter().any(|spec| spec.kind == kind);

        let mut logs = Self::default();
        if wants(LogKind::Host) {
            let destination = scratch.join(HOST_LOGS_DIR);
            logs.hosts = unpack_group(source, &entries, HOST_MARKER, &destination, scratch)?;
        }
        if wants(LogKind::Engine) {
            let destination = scratch.join(ENGINE_LOGS_DIR);
            logs.engine = unpack_group(source, &entries, ENGINE_MARKER, &destination, scratch)?;
        }
        tracing::info!(
            hosts = logs.hosts.len(),
            engine = logs.engine.len(),
            "unpacked remote logs"
        );
        Ok(logs)
    }

    pub fn hosts(&self) -> &[TarGzSource] {
        &self.hosts
    }

    pub fn engine(&self) -> &[TarGzSource] {
        &self.engine
    }
}

impl SourceLocator for RemoteLogs {
    fn sources(&self, spec: &LogSpec) -> Vec<&dyn ArchiveSource> {
        let sources = match spec.kind {
            LogKind::Host => &self.hosts,
            LogKind::Engine => &self.engine,
            LogKind::Runner => return Vec::new(),
        };
        sources.iter().map(|s| s as &dyn ArchiveSource).collect()
    }
}

/// Extracts every tarball whose machine directory contains `marker`.
///
/// A tarball that cannot be extracted, renamed or opened is skipped with a
/// warning.
fn unpack_group(
    source: &dyn ArchiveSource,
    entries: &[ArchiveEntry],
    marker: &str,
    destination: &Path,
    scratch: &Path,
) -> Result<Vec<TarGzSource>> {
    let mut tarballs = Vec::new();
    for entry in entries {
        let Some(machine) = machine_dir(&entry.member).filter(|dir| dir.contains(marker)) else {
            continue;
        };
        let target = destination.join(format!("{machine}.{}", last_two_extensions(entry.basename())));
        tracing::debug!(member = %entry.member, target = %target.display(), "copying remote logs");

        let extracted = match source.extract(entry, destination) {
            Ok(path) => path,
            Err(err) => {
                tracing::warn!(member = %entry.member, error = %err, "failed to extract, skipping");
                continue;
            }
        };
        if let Err(err) = fs::rename(&extracted, &target) {
            tracing::warn!(
                from = %extracted.display(),
                to = %target.display(),
                error = %err,
                "failed to rename tarball, skipping"
            );
            let _ = fs::remove_file(&extracted);
            continue;
        }
        match TarGzSource::open(&target, scratch) {
            Ok(tarball) => tarballs.push(tarball),
            Err(err) => {
                tracing::warn!(path = %target.display(), error = %err, "unreadable tarball, skipping");
            }
        }
    }
    Ok(tarballs)
}

/// Directory directly containing a member.
fn machine_dir(member: &str) -> Option<&str> {
    let mut parts = member.trim_end_matches('/').rsplit('/');
    parts.next()?;
    parts.next()
}

/// `logs.tar.gz` -> `tar.gz`; names with fewer dots are kept whole.
fn last_two_extensions(name: &str) -> String {
    let parts: Vec<&str> = name.split('.').collect();
    parts[parts.len().saturating_sub(2)..].join(".")
}
