//! Core logic for slicing CI run logs into per-test bundles.
//!
//! This crate contains:
//! - Archive access: one interface over directories, zip archives and tarballs
//! - Window extraction: when each test ran, from the ART runner log
//! - Partitioning: engine and host log lines assigned to test fragments

pub mod archive;
mod decoder;
mod natural;
pub mod partition;
pub mod team;
pub mod timestamp;
pub mod window;

pub use archive::{
    ArchiveEntry, ArchiveError, ArchiveSource, DirSource, LineStream, TarGzSource, ZipSource,
};
pub use decoder::{DEFAULT_CHUNK_SIZE, LzmaLines, ReaderLines};
pub use natural::natural_cmp;
pub use partition::{
    DEFAULT_LOGS, DEFAULT_TOLERANCE_SECS, LogKind, LogPartitioner, LogSpec, PartitionConfig,
    PartitionError, PartitionSummary, SourceLocator,
};
pub use team::{Team, UnknownTeam, test_directory};
pub use timestamp::{Timestamp, TimestampedLine};
pub use window::{TestWindow, WindowError, WindowExtractor, Windows};
