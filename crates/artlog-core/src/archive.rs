//! Uniform access to log files stored in a directory tree, a zip archive or a
//! gzip-compressed tarball.
//!
//! Windowing and partitioning only ever see [`ArchiveSource`]; backend quirks
//! (hard-linking, zip path flattening, gzip-in-tar materialization) stay in
//! this module.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::read::{GzDecoder, MultiGzDecoder};
use thiserror::Error;
use walkdir::WalkDir;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::decoder::{LzmaLines, ReaderLines};

/// Suffix of LZMA-compressed members.
const XZ_SUFFIX: &str = ".xz";

/// Suffix of gzip-compressed members.
const GZ_SUFFIX: &str = ".gz";

/// Lines of one archive member, without terminators.
pub type LineStream = Box<dyn Iterator<Item = String>>;

/// Archive access errors.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The requested member does not exist.
    #[error("{member} not found in {archive}")]
    NotFound { archive: String, member: String },
    /// Writing a member to its destination failed.
    #[error("failed to extract {member} to {}", destination.display())]
    Extraction {
        member: String,
        destination: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] ZipError),
}

/// A readable unit inside a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveEntry {
    /// Identifier of the owning archive (see [`ArchiveSource::id`]).
    pub archive: String,
    /// `/`-separated path of the member inside the archive.
    pub member: String,
}

impl ArchiveEntry {
    /// File name of the member, without its internal directory path.
    pub fn basename(&self) -> &str {
        basename(&self.member)
    }
}

/// Capabilities shared by every log storage backend.
pub trait ArchiveSource {
    /// Identifier of this archive, recorded in every entry it lists.
    fn id(&self) -> &str;

    /// Lists readable members selected by `prefix`.
    ///
    /// Directory trees walk `root/prefix` recursively, zip archives keep names
    /// containing `prefix`, and tarballs keep members whose basename starts
    /// with `prefix`.
    fn list_entries(&self, prefix: &str) -> Result<Vec<ArchiveEntry>, ArchiveError>;

    /// Opens a member as a line stream, decompressing `.xz` and `.gz` members.
    fn open(&self, entry: &ArchiveEntry) -> Result<LineStream, ArchiveError>;

    /// Writes a member into `destination` under its basename and returns the
    /// resulting path.
    fn extract(&self, entry: &ArchiveEntry, destination: &Path) -> Result<PathBuf, ArchiveError>;
}

/// Logs laid out on disk, as in a CI workspace.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
    id: String,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let id = root.display().to_string();
        Self { root, id }
    }

    fn member_path(&self, entry: &ArchiveEntry) -> PathBuf {
        self.root.join(&entry.member)
    }

    fn not_found(&self, member: &str) -> ArchiveError {
        ArchiveError::NotFound {
            archive: self.id.clone(),
            member: member.to_string(),
        }
    }
}

impl ArchiveSource for DirSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn list_entries(&self, prefix: &str) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let base = self.root.join(prefix);
        if !base.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for item in WalkDir::new(&base).sort_by_file_name() {
            let item = item.map_err(io::Error::from)?;
            if !item.file_type().is_file() {
                continue;
            }
            let Ok(relative) = item.path().strip_prefix(&self.root) else {
                continue;
            };
            let member = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            entries.push(ArchiveEntry {
                archive: self.id.clone(),
                member,
            });
        }
        Ok(entries)
    }

    fn open(&self, entry: &ArchiveEntry) -> Result<LineStream, ArchiveError> {
        let path = self.member_path(entry);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(self.not_found(&entry.member));
            }
            Err(err) => return Err(err.into()),
        };
        line_stream(file, &entry.member)
    }

    fn extract(&self, entry: &ArchiveEntry, destination: &Path) -> Result<PathBuf, ArchiveError> {
        let source = self.member_path(entry);
        if !source.is_file() {
            return Err(self.not_found(&entry.member));
        }
        let target = destination.join(entry.basename());
        let extraction = |source: io::Error| ArchiveError::Extraction {
            member: entry.member.clone(),
            destination: destination.to_path_buf(),
            source,
        };

        fs::create_dir_all(destination).map_err(extraction)?;
        if target.exists() {
            fs::remove_file(&target).map_err(extraction)?;
        }
        // Hard links keep large logs from being duplicated; across filesystems
        // they are not possible, so copy instead.
        if let Err(err) = fs::hard_link(&source, &target) {
            tracing::debug!(error = %err, source = %source.display(), "hard link failed, copying");
            fs::copy(&source, &target).map_err(extraction)?;
        }
        Ok(target)
    }
}

/// A zip archive, typically the CI build artifact.
///
/// Members are spooled into `scratch` when opened, because zip readers borrow
/// the archive they read from.
#[derive(Debug, Clone)]
pub struct ZipSource {
    path: PathBuf,
    id: String,
    names: Vec<String>,
    scratch: PathBuf,
}

impl ZipSource {
    pub fn open(path: impl Into<PathBuf>, scratch: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let path = path.into();
        let archive = ZipArchive::new(BufReader::new(File::open(&path)?))?;
        let mut names: Vec<String> = archive
            .file_names()
            .filter(|name| !name.ends_with('/'))
            .map(str::to_string)
            .collect();
        names.sort();
        tracing::debug!(path = %path.display(), members = names.len(), "indexed zip archive");

        Ok(Self {
            id: path.display().to_string(),
            path,
            names,
            scratch: scratch.into(),
        })
    }

    fn archive(&self) -> Result<ZipArchive<BufReader<File>>, ArchiveError> {
        Ok(ZipArchive::new(BufReader::new(File::open(&self.path)?))?)
    }

    /// Copies a member into `writer`.
    fn copy_member(&self, member: &str, writer: &mut impl io::Write) -> Result<(), ArchiveError> {
        let mut archive = self.archive()?;
        let mut file = match archive.by_name(member) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => {
                return Err(ArchiveError::NotFound {
                    archive: self.id.clone(),
                    member: member.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        io::copy(&mut file, writer)?;
        Ok(())
    }
}

impl ArchiveSource for ZipSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn list_entries(&self, prefix: &str) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        Ok(self
            .names
            .iter()
            .filter(|name| name.contains(prefix))
            .map(|name| ArchiveEntry {
                archive: self.id.clone(),
                member: name.clone(),
            })
            .collect())
    }

    fn open(&self, entry: &ArchiveEntry) -> Result<LineStream, ArchiveError> {
        let mut spool = tempfile::tempfile_in(&self.scratch)?;
        self.copy_member(&entry.member, &mut spool)?;
        spool.seek(SeekFrom::Start(0))?;
        line_stream(spool, &entry.member)
    }

    fn extract(&self, entry: &ArchiveEntry, destination: &Path) -> Result<PathBuf, ArchiveError> {
        let target = destination.join(entry.basename());
        let extraction = |source: io::Error| ArchiveError::Extraction {
            member: entry.member.clone(),
            destination: destination.to_path_buf(),
            source,
        };

        fs::create_dir_all(destination).map_err(extraction)?;
        let mut file = File::create(&target).map_err(extraction)?;
        match self.copy_member(&entry.member, &mut file) {
            Ok(()) => Ok(target),
            Err(err) => {
                drop(file);
                let _ = fs::remove_file(&target);
                match err {
                    ArchiveError::Io(source) => Err(extraction(source)),
                    other => Err(other),
                }
            }
        }
    }
}

/// A gzip-compressed tarball of one host's (or the engine's) log directory.
#[derive(Debug, Clone)]
pub struct TarGzSource {
    path: PathBuf,
    id: String,
    members: Vec<String>,
    scratch: PathBuf,
}

impl TarGzSource {
    /// Opens a tarball and indexes its regular-file members.
    pub fn open(path: impl Into<PathBuf>, scratch: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let path = path.into();
        let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(File::open(&path)?)));
        let mut members = Vec::new();
        for entry in archive.entries()? {
            let entry = entry?;
            if entry.header().entry_type().is_file() {
                members.push(entry.path()?.to_string_lossy().into_owned());
            }
        }
        tracing::debug!(path = %path.display(), members = members.len(), "indexed tarball");

        Ok(Self {
            id: path.display().to_string(),
            path,
            members,
            scratch: scratch.into(),
        })
    }

    /// Hands the reader of `member` to `f`.
    ///
    /// Gzip streams cannot seek, so every call rescans the tarball from the
    /// start.
    fn with_member<T>(
        &self,
        member: &str,
        f: impl FnOnce(&mut dyn Read) -> io::Result<T>,
    ) -> Result<T, ArchiveError> {
        let mut archive =
            tar::Archive::new(GzDecoder::new(BufReader::new(File::open(&self.path)?)));
        for entry in archive.entries()? {
            let mut entry = entry?;
            if entry.path()?.to_string_lossy() == member {
                return Ok(f(&mut entry)?);
            }
        }
        Err(ArchiveError::NotFound {
            archive: self.id.clone(),
            member: member.to_string(),
        })
    }
}

impl ArchiveSource for TarGzSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn list_entries(&self, prefix: &str) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        Ok(self
            .members
            .iter()
            .filter(|member| basename(member).starts_with(prefix))
            .map(|member| ArchiveEntry {
                archive: self.id.clone(),
                member: member.clone(),
            })
            .collect())
    }

    fn open(&self, entry: &ArchiveEntry) -> Result<LineStream, ArchiveError> {
        let mut spool = tempfile::tempfile_in(&self.scratch)?;
        self.with_member(&entry.member, |reader| io::copy(reader, &mut spool))?;
        spool.seek(SeekFrom::Start(0))?;

        if !entry.member.ends_with(GZ_SUFFIX) {
            return line_stream(spool, &entry.member);
        }

        // Gzip framing is not split incrementally inside a tar stream; the
        // member is inflated into its own scratch file first.
        let mut inflated = tempfile::tempfile_in(&self.scratch)?;
        if let Err(err) = io::copy(&mut MultiGzDecoder::new(spool), &mut inflated) {
            tracing::warn!(member = %entry.member, error = %err, "corrupt gzip member, truncating");
        }
        inflated.seek(SeekFrom::Start(0))?;
        Ok(Box::new(ReaderLines::new(BufReader::new(inflated))))
    }

    fn extract(&self, entry: &ArchiveEntry, destination: &Path) -> Result<PathBuf, ArchiveError> {
        let target = destination.join(entry.basename());
        let extraction = |source: io::Error| ArchiveError::Extraction {
            member: entry.member.clone(),
            destination: destination.to_path_buf(),
            source,
        };

        fs::create_dir_all(destination).map_err(extraction)?;
        let result = self.with_member(&entry.member, |reader| {
            let mut file = File::create(&target)?;
            io::copy(reader, &mut file)
        });
        match result {
            Ok(_) => Ok(target),
            Err(ArchiveError::Io(source)) => {
                let _ = fs::remove_file(&target);
                Err(extraction(source))
            }
            Err(err) => Err(err),
        }
    }
}

/// File name part of a `/`-separated member path.
pub fn basename(member: &str) -> &str {
    member.rsplit('/').next().unwrap_or(member)
}

/// Wraps an opened member in the line reader matching its suffix.
fn line_stream(file: File, member: &str) -> Result<LineStream, ArchiveError> {
    if member.ends_with(XZ_SUFFIX) {
        return Ok(Box::new(LzmaLines::new(file)?));
    }
    if member.ends_with(GZ_SUFFIX) {
        let reader = BufReader::new(MultiGzDecoder::new(file));
        return Ok(Box::new(ReaderLines::new(reader)));
    }
    Ok(Box::new(ReaderLines::new(BufReader::new(file))))
}
