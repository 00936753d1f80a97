//! Partitioning of engine and host logs into per-test fragments.
//!
//! # Algorithm Summary
//!
//! 1. Collect the members of each requested log, ordered oldest first
//! 2. Group host members by host, so every host gets its own fragment set
//! 3. Walk each group's lines once against the test windows, in run order,
//!    writing each line to the fragment of the window whose tolerance band
//!    contains it
//! 4. At a window boundary, replay the lines near the end of the closing
//!    window against the next one, so lines in the overlap reach both
//!    adjacent fragments

use std::collections::VecDeque;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use thiserror::Error;

use crate::archive::{ArchiveEntry, ArchiveSource};
use crate::natural::natural_cmp;
use crate::timestamp::{Timestamp, TimestampedLine};
use crate::window::{RUNNER_LOG, TestWindow, Windows};

/// Daemon logs collected from every hypervisor.
pub const HOST_LOGS: [&str; 2] = ["vdsm.log", "supervdsm.log"];

/// Log written by the orchestration engine.
pub const ENGINE_LOG: &str = "engine.log";

/// Logs partitioned when none are requested explicitly.
pub const DEFAULT_LOGS: [&str; 3] = ["vdsm.log", "supervdsm.log", ENGINE_LOG];

/// Default slack around every window, in seconds.
pub const DEFAULT_TOLERANCE_SECS: u32 = 60;

/// Partitioning errors.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("no test windows, must run window extraction first")]
    NoWindows,
    /// Writing a fragment failed.
    #[error("failed to write fragment {}: {source}", path.display())]
    Fragment {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Family a log belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    /// The runner log itself; fragments are written during window extraction.
    Runner,
    /// One log for the whole run.
    Engine,
    /// One log per hypervisor.
    Host,
}

impl LogKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Runner => "runner",
            Self::Engine => "engine",
            Self::Host => "host",
        }
    }

    /// Kind of a requested log name.
    pub fn of(name: &str) -> Self {
        if name == RUNNER_LOG {
            Self::Runner
        } else if HOST_LOGS.iter().any(|host_log| name.contains(host_log)) {
            Self::Host
        } else {
            Self::Engine
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSpec {
    pub kind: LogKind,
    /// Member name prefixes to collect; the first also names the fragment.
    pub match_names: Vec<String>,
}

impl LogSpec {
    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind: LogKind::of(&name),
            match_names: vec![name],
        }
    }

    /// File name of this log's fragments.
    pub fn fragment_name(&self) -> &str {
        self.match_names.first().map_or("", String::as_str)
    }
}

/// Yields the archives to scan for a requested log.
pub trait SourceLocator {
    fn sources(&self, spec: &LogSpec) -> Vec<&dyn ArchiveSource>;
}

/// Configuration for partitioning.
#[derive(Debug, Clone, Copy)]
pub struct PartitionConfig {
    /// Slack added on both sides of every window.
    /// Default: 1 minute.
    pub tolerance: TimeDelta,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self::with_tolerance_secs(DEFAULT_TOLERANCE_SECS)
    }
}

impl PartitionConfig {
    pub fn with_tolerance_secs(secs: u32) -> Self {
        Self {
            tolerance: TimeDelta::seconds(i64::from(secs)),
        }
    }
}

/// What a partitioning run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionSummary {
    /// Fragments written, in creation order.
    pub fragments: Vec<PathBuf>,
    /// Members read to the end or until their group expired.
    pub members_read: usize,
    /// Members that could not be opened or were past the last window.
    pub members_skipped: usize,
}

/// Splits engine and host logs along test windows.
#[derive(Debug, Clone, Default)]
pub struct LogPartitioner {
    config: PartitionConfig,
}

/// A member together with the archive it is read from.
struct Member<'s> {
    source: &'s dyn ArchiveSource,
    entry: ArchiveEntry,
}

impl LogPartitioner {
    pub const fn new(config: PartitionConfig) -> Self {
        Self { config }
    }

    /// Writes the fragments of every requested log.
    pub fn partition(
        &self,
        windows: &Windows,
        specs: &[LogSpec],
        locator: &dyn SourceLocator,
    ) -> Result<PartitionSummary, PartitionError> {
        if windows.is_empty() {
            return Err(PartitionError::NoWindows);
        }

        let mut summary = PartitionSummary::default();
        for spec in specs {
            if spec.kind == LogKind::Runner {
                continue;
            }
            let members = collect_members(spec, &locator.sources(spec));
            if members.is_empty() {
                tracing::info!(log = spec.fragment_name(), "no members found, skipping");
                continue;
            }
            tracing::info!(log = spec.fragment_name(), members = members.len(), "partitioning");
            self.partition_members(windows, spec, &members, &mut summary)?;
        }
        Ok(summary)
    }

    fn partition_members(
        &self,
        windows: &Windows,
        spec: &LogSpec,
        members: &[Member<'_>],
        summary: &mut PartitionSummary,
    ) -> Result<(), PartitionError> {
        let mut walk: Option<(String, GroupWalk<'_>)> = None;

        for member in members {
            let prefix = match spec.kind {
                LogKind::Host => host_prefix(&member.entry.archive).to_string(),
                _ => String::new(),
            };
            if walk.as_ref().is_none_or(|(current, _)| *current != prefix) {
                if let Some((_, previous)) = walk.take() {
                    summary.fragments.extend(previous.finish()?);
                }
                let fragment_name = if prefix.is_empty() {
                    spec.fragment_name().to_string()
                } else {
                    format!("{prefix}_{}", spec.fragment_name())
                };
                walk = Some((prefix, GroupWalk::new(windows, self.config, fragment_name)));
            }
            let Some((_, group)) = walk.as_mut() else {
                continue;
            };

            if group.expired {
                tracing::debug!(member = %member.entry.member, "past the last test, skipping");
                summary.members_skipped += 1;
                continue;
            }
            let lines = match member.source.open(&member.entry) {
                Ok(lines) => lines,
                Err(err) => {
                    tracing::warn!(
                        archive = %member.entry.archive,
                        member = %member.entry.member,
                        error = %err,
                        "failed to open member, skipping"
                    );
                    summary.members_skipped += 1;
                    continue;
                }
            };
            tracing::debug!(
                archive = %member.entry.archive,
                member = %member.entry.member,
                "parsing member"
            );
            group.feed_member(lines)?;
            summary.members_read += 1;
        }

        if let Some((_, group)) = walk {
            summary.fragments.extend(group.finish()?);
        }
        Ok(())
    }
}

/// Lists the members of `spec` in every source, oldest first.
fn collect_members<'s>(spec: &LogSpec, sources: &[&'s dyn ArchiveSource]) -> Vec<Member<'s>> {
    let mut members = Vec::new();
    for source in sources {
        for name in &spec.match_names {
            match source.list_entries(name) {
                Ok(entries) => members.extend(entries.into_iter().map(|entry| Member {
                    source: *source,
                    entry,
                })),
                Err(err) => tracing::warn!(
                    archive = source.id(),
                    log = %name,
                    error = %err,
                    "failed to list members, skipping archive"
                ),
            }
        }
    }
    order_members(spec.kind, &mut members);
    members.dedup_by(|a, b| a.entry == b.entry);
    members
}

/// Orders members so rotated files are read oldest first.
///
/// Rotated host logs carry growing numeric suffixes, so descending order puts
/// the oldest first. Engine logs rotate to dated names and the live file sorts
/// first ascending, so it moves to the end.
fn order_members(kind: LogKind, members: &mut [Member<'_>]) {
    members.sort_by(|a, b| {
        natural_cmp(&b.entry.archive, &a.entry.archive)
            .then_with(|| natural_cmp(&b.entry.member, &a.entry.member))
    });
    if kind == LogKind::Engine && !members.is_empty() {
        members.sort_by(|a, b| {
            natural_cmp(&a.entry.archive, &b.entry.archive)
                .then_with(|| natural_cmp(&a.entry.member, &b.entry.member))
        });
        members.rotate_left(1);
    }
}

/// Host name of a host archive: its file name up to the first `.`.
fn host_prefix(archive: &str) -> &str {
    let name = Path::new(archive)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(archive);
    name.split('.').next().unwrap_or(name)
}

/// A line waiting to be evaluated against the current window.
#[derive(Debug, Clone)]
struct Pending {
    line: TimestampedLine,
    /// Already written to the fragment of an earlier window.
    carried: bool,
}

impl Pending {
    fn fresh(text: String) -> Self {
        Self {
            line: TimestampedLine::parse(text),
            carried: false,
        }
    }
}

/// Bounds derived from one window and the tolerance.
#[derive(Debug, Clone, Copy)]
struct Band {
    low: Timestamp,
    high: Timestamp,
    /// Lines at or after this point are replayed against the next window.
    lookback: Timestamp,
}

impl Band {
    fn new(window: &TestWindow, tolerance: TimeDelta) -> Self {
        let shift = |ts: Timestamp, delta: TimeDelta| {
            ts.checked_add_signed(delta)
                .unwrap_or(if delta < TimeDelta::zero() { Timestamp::MIN } else { Timestamp::MAX })
        };
        Self {
            low: shift(window.start, -tolerance),
            high: shift(window.end, tolerance),
            lookback: shift(window.end, -tolerance),
        }
    }
}

/// The walk of one fragment set (the engine, or one host) over the windows.
struct GroupWalk<'w> {
    windows: &'w Windows,
    tolerance: TimeDelta,
    fragment_name: String,
    index: usize,
    band: Option<Band>,
    writer: Option<BufWriter<File>>,
    writer_path: PathBuf,
    /// Whether the last timestamped line went into the current fragment.
    last_written: bool,
    capturing: bool,
    spool: Vec<Pending>,
    expired: bool,
    fragments: Vec<PathBuf>,
}

impl<'w> GroupWalk<'w> {
    fn new(windows: &'w Windows, config: PartitionConfig, fragment_name: String) -> Self {
        let mut walk = Self {
            windows,
            tolerance: config.tolerance,
            fragment_name,
            index: 0,
            band: None,
            writer: None,
            writer_path: PathBuf::new(),
            last_written: false,
            capturing: false,
            spool: Vec::new(),
            expired: false,
            fragments: Vec::new(),
        };
        walk.enter(0);
        walk
    }

    fn enter(&mut self, index: usize) {
        self.index = index;
        self.band = self
            .windows
            .get_index(index)
            .map(|window| Band::new(window, self.tolerance));
        self.expired = self.band.is_none();
        self.last_written = false;
        self.capturing = false;
    }

    fn feed_member(&mut self, lines: impl IntoIterator<Item = String>) -> Result<(), PartitionError> {
        // Continuation lines never span members.
        self.last_written = false;
        let mut queue = VecDeque::new();
        for text in lines {
            queue.push_back(Pending::fresh(text));
            while let Some(pending) = queue.pop_front() {
                self.step(pending, &mut queue)?;
                if self.expired {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn step(&mut self, pending: Pending, queue: &mut VecDeque<Pending>) -> Result<(), PartitionError> {
        let Some(band) = self.band else {
            return Ok(());
        };
        let timestamp = pending.line.timestamp;
        match timestamp {
            None => {
                if self.last_written {
                    self.write(pending)?;
                }
            }
            Some(ts) if ts < band.low => self.last_written = false,
            Some(ts) if ts <= band.high => {
                if ts >= band.lookback {
                    self.capturing = true;
                }
                self.write(pending)?;
                self.last_written = true;
            }
            Some(_) => self.advance(pending, queue)?,
        }
        Ok(())
    }

    /// Moves to the next window, queueing the captured lines and the boundary
    /// line for re-evaluation ahead of the rest of the stream.
    fn advance(&mut self, boundary: Pending, queue: &mut VecDeque<Pending>) -> Result<(), PartitionError> {
        self.close()?;
        let replay = std::mem::take(&mut self.spool);
        self.enter(self.index + 1);
        if self.expired {
            tracing::debug!(fragment = %self.fragment_name, "past the last test");
            return Ok(());
        }
        queue.push_front(boundary);
        for pending in replay.into_iter().rev() {
            queue.push_front(pending);
        }
        Ok(())
    }

    fn write(&mut self, pending: Pending) -> Result<(), PartitionError> {
        if self.writer.is_none() {
            self.open_fragment()?;
        }
        if let Some(writer) = &mut self.writer {
            writeln!(writer, "{}", pending.line.text).map_err(|source| PartitionError::Fragment {
                path: self.writer_path.clone(),
                source,
            })?;
        }
        if self.capturing && !pending.carried {
            self.spool.push(Pending {
                carried: true,
                ..pending
            });
        }
        Ok(())
    }

    fn open_fragment(&mut self) -> Result<(), PartitionError> {
        let Some(window) = self.windows.get_index(self.index) else {
            return Ok(());
        };
        let path = window.directory.join(&self.fragment_name);
        let fragment_error = |source| PartitionError::Fragment {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&window.directory).map_err(fragment_error)?;
        let file = File::create(&path).map_err(fragment_error)?;
        tracing::debug!(test = %window.name, fragment = %path.display(), "opened fragment");
        self.writer = Some(BufWriter::new(file));
        self.fragments.push(path.clone());
        self.writer_path = path;
        Ok(())
    }

    fn close(&mut self) -> Result<(), PartitionError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|source| PartitionError::Fragment {
                path: self.writer_path.clone(),
                source,
            })?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<PathBuf>, PartitionError> {
        self.close()?;
        Ok(self.fragments)
    }
}
