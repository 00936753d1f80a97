//! Test windows derived from the ART runner log.
//!
//! The runner log is the only place that says which test ran when. One
//! sequential pass over its (possibly rotated) segments yields an ordered set
//! of [`TestWindow`]s, creates one output directory per test and writes the
//! runner's own lines for each test into that directory.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use thiserror::Error;

use crate::archive::{ArchiveEntry, ArchiveError, ArchiveSource};
use crate::natural::natural_cmp;
use crate::team::{Team, test_directory};
use crate::timestamp::{Timestamp, parse_runner_timestamp};

/// File name of the runner log, and of its per-test fragment.
pub const RUNNER_LOG: &str = "art_test_runner.log";

/// Debug variant of the runner log, preferred when present.
pub const RUNNER_DEBUG_LOG: &str = "art_test_runner.log.debug";

/// Directory prefix under which runner log segments are searched.
pub const RUNNER_LOG_DIR: &str = "logs";

const SETUP_MARKERS: [&str; 2] = ["SETUP <", "--TEST START--"];
const TEARDOWN_MARKERS: [&str; 2] = ["TEARDOWN <", "--TEST END--"];
const TEST_NAME_MARKER: &str = "Test Name";

/// Separator preceding the dotted identifier on a test-name line.
const TEST_NAME_SEPARATOR: &str = ": ";

/// Window extraction errors.
#[derive(Debug, Error)]
pub enum WindowError {
    /// No runner log segment exists in the source.
    #[error("failed to find ART runner logs")]
    MissingRunnerLog,
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// When one test ran, and where its fragments go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestWindow {
    /// Dotted test identifier.
    pub name: String,
    /// Output directory for this test's fragments.
    pub directory: PathBuf,
    pub start: Timestamp,
    pub end: Timestamp,
}

/// Test windows in the order the tests were opened in the runner log.
#[derive(Debug, Clone, Default)]
pub struct Windows {
    windows: IndexMap<String, TestWindow>,
}

impl Windows {
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&TestWindow> {
        self.windows.get(name)
    }

    /// Window at `index` in run order.
    pub fn get_index(&self, index: usize) -> Option<&TestWindow> {
        self.windows.get_index(index).map(|(_, window)| window)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestWindow> {
        self.windows.values()
    }

    /// Records a window; a test seen again replaces its earlier attempt and
    /// moves to the end.
    fn push(&mut self, window: TestWindow) {
        self.windows.shift_remove(&window.name);
        self.windows.insert(window.name.clone(), window);
    }
}

impl FromIterator<TestWindow> for Windows {
    fn from_iter<I: IntoIterator<Item = TestWindow>>(iter: I) -> Self {
        let mut windows = Self::default();
        for window in iter {
            windows.push(window);
        }
        windows
    }
}

impl<'a> IntoIterator for &'a Windows {
    type Item = &'a TestWindow;
    type IntoIter = indexmap::map::Values<'a, String, TestWindow>;

    fn into_iter(self) -> Self::IntoIter {
        self.windows.values()
    }
}

/// Derives test windows from runner log segments.
#[derive(Debug, Clone)]
pub struct WindowExtractor {
    output_root: PathBuf,
    team: Option<Team>,
}

impl WindowExtractor {
    /// Creates an extractor writing test directories under `output_root`.
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            team: None,
        }
    }

    /// Restricts extraction to the contiguous block of tests of one team.
    #[must_use]
    pub const fn with_team(mut self, team: Option<Team>) -> Self {
        self.team = team;
        self
    }

    /// Locates runner log segments in `source`.
    ///
    /// The debug log wins over the plain one; segments are returned in
    /// natural descending order of their paths.
    pub fn runner_segments(source: &dyn ArchiveSource) -> Result<Vec<ArchiveEntry>, WindowError> {
        let candidates = source.list_entries(RUNNER_LOG_DIR)?;
        for name in [RUNNER_DEBUG_LOG, RUNNER_LOG] {
            let mut segments: Vec<ArchiveEntry> = candidates
                .iter()
                .filter(|entry| entry.member.contains(name))
                .cloned()
                .collect();
            if !segments.is_empty() {
                segments.sort_by(|a, b| natural_cmp(&b.member, &a.member));
                return Ok(segments);
            }
        }
        Err(WindowError::MissingRunnerLog)
    }

    /// Extracts windows from the runner log found in `source`.
    pub fn extract(&self, source: &dyn ArchiveSource) -> Result<Windows, WindowError> {
        let segments = Self::runner_segments(source)?;
        tracing::info!(segments = segments.len(), "parsing ART runner logs");

        let mut pass = RunnerPass::new(self);
        for segment in &segments {
            tracing::debug!(member = %segment.member, "parsing runner segment");
            if pass.feed_segment(source.open(segment)?)? == Flow::Stop {
                break;
            }
        }
        pass.finish()
    }

    /// Extracts windows from already opened segments, in the given order.
    pub fn extract_segments<S, L>(&self, segments: S) -> Result<Windows, WindowError>
    where
        S: IntoIterator<Item = L>,
        L: IntoIterator<Item = String>,
    {
        let mut pass = RunnerPass::new(self);
        let mut seen = false;
        for segment in segments {
            seen = true;
            if pass.feed_segment(segment)? == Flow::Stop {
                break;
            }
        }
        if !seen {
            return Err(WindowError::MissingRunnerLog);
        }
        pass.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// A relevant test whose window has not closed yet.
#[derive(Debug)]
struct OpenTest {
    name: String,
    directory: PathBuf,
    start: Timestamp,
    teardown: Option<Timestamp>,
}

/// Runner lines since the last setup marker.
///
/// Lines are held in memory only until the test name is known; from then on
/// they stream straight into the test's runner fragment.
#[derive(Debug, Default)]
struct Capture {
    buffered: Vec<String>,
    writer: Option<BufWriter<File>>,
}

impl Capture {
    fn push(&mut self, line: &str) -> io::Result<()> {
        match &mut self.writer {
            Some(writer) => writeln!(writer, "{line}"),
            None => {
                self.buffered.push(line.to_string());
                Ok(())
            }
        }
    }

    const fn is_attached(&self) -> bool {
        self.writer.is_some()
    }

    fn attach(&mut self, path: &Path) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for line in self.buffered.drain(..) {
            writeln!(writer, "{line}")?;
        }
        self.writer = Some(writer);
        Ok(())
    }

    fn finish(self) -> io::Result<()> {
        match self.writer {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

/// State of one pass over all runner segments.
struct RunnerPass<'a> {
    extractor: &'a WindowExtractor,
    windows: Windows,
    setup_ts: Option<Timestamp>,
    capture: Option<Capture>,
    current: Option<OpenTest>,
    relevant_seen: bool,
    last_line_ts: Option<Timestamp>,
    last_known_ts: Option<Timestamp>,
}

impl<'a> RunnerPass<'a> {
    fn new(extractor: &'a WindowExtractor) -> Self {
        Self {
            extractor,
            windows: Windows::default(),
            setup_ts: None,
            capture: None,
            current: None,
            relevant_seen: false,
            last_line_ts: None,
            last_known_ts: None,
        }
    }

    fn feed_segment(&mut self, lines: impl IntoIterator<Item = String>) -> Result<Flow, WindowError> {
        for line in lines {
            if self.feed_line(&line)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    fn feed_line(&mut self, line: &str) -> Result<Flow, WindowError> {
        let ts = parse_runner_timestamp(line);
        self.last_line_ts = ts;
        if ts.is_some() {
            self.last_known_ts = ts;
        }

        if SETUP_MARKERS.iter().any(|m| line.contains(m)) {
            match ts {
                Some(ts) => {
                    self.close_current(Some(ts))?;
                    self.setup_ts = Some(ts);
                    self.capture = Some(Capture::default());
                }
                None => tracing::warn!(line, "setup marker without timestamp, ignoring"),
            }
        }

        if let Some(capture) = &mut self.capture {
            capture.push(line)?;
        }

        let attached = self.capture.as_ref().is_some_and(Capture::is_attached);
        if line.contains(TEST_NAME_MARKER) && !attached {
            let relevant = self.setup_ts.is_some()
                && self.extractor.team.is_none_or(|team| team.matches(line));
            if relevant {
                self.open_test(line)?;
            } else {
                self.capture = None;
                if self.relevant_seen {
                    tracing::debug!(line, "end of matching tests, stop parsing");
                    return Ok(Flow::Stop);
                }
            }
        }

        if TEARDOWN_MARKERS.iter().any(|m| line.contains(m)) {
            if let (Some(current), Some(ts)) = (&mut self.current, ts) {
                current.teardown = Some(ts);
            }
        }

        Ok(Flow::Continue)
    }

    fn open_test(&mut self, line: &str) -> Result<(), WindowError> {
        let Some(start) = self.setup_ts else {
            return Ok(());
        };
        let name = line
            .rsplit(TEST_NAME_SEPARATOR)
            .next()
            .unwrap_or(line)
            .trim()
            .to_string();
        let directory = test_directory(&self.extractor.output_root, &name);
        fs::create_dir_all(&directory)?;
        tracing::debug!(test = %name, directory = %directory.display(), "opened test window");

        if let Some(capture) = &mut self.capture {
            capture.attach(&directory.join(RUNNER_LOG))?;
        }
        self.current = Some(OpenTest {
            name,
            directory,
            start,
            teardown: None,
        });
        self.relevant_seen = true;
        Ok(())
    }

    /// Closes the open test (if any) and its runner fragment.
    ///
    /// The window ends at the test's last teardown marker, else at `boundary`.
    fn close_current(&mut self, boundary: Option<Timestamp>) -> Result<(), WindowError> {
        if let Some(test) = self.current.take() {
            let end = test.teardown.or(boundary).unwrap_or(test.start).max(test.start);
            self.windows.push(TestWindow {
                name: test.name,
                directory: test.directory,
                start: test.start,
                end,
            });
        }
        if let Some(capture) = self.capture.take() {
            capture.finish()?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Windows, WindowError> {
        let boundary = self.last_line_ts.or(self.last_known_ts);
        self.close_current(boundary)?;
        tracing::info!(tests = self.windows.len(), "extracted test windows");
        Ok(self.windows)
    }
}
