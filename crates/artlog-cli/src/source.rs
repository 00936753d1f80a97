//! Where a run's logs come from, and fetching them when they are remote.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::Url;

/// Path of the all-artifacts zip, relative to a Jenkins job URL.
const ARTIFACT_ZIP_PATH: &str = "artifact/*zip*/archive.zip";

/// Connection timeout for artifact downloads; the transfer itself is unbounded.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// A classified `--source` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Jenkins job URL whose artifacts are downloaded.
    Url(Url),
    /// Artifact zip already on disk.
    Zip(PathBuf),
    /// Directory laid out like the artifact tree.
    Directory(PathBuf),
}

/// Classifies a source as a job URL, a zip file or a directory.
pub fn classify(source: &str) -> Result<SourceKind> {
    if let Ok(url) = Url::parse(source) {
        if matches!(url.scheme(), "http" | "https") {
            return Ok(SourceKind::Url(url));
        }
    }

    let path = Path::new(source);
    if path.is_dir() {
        return Ok(SourceKind::Directory(path.to_path_buf()));
    }
    let is_zip = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
    if path.is_file() && is_zip {
        return Ok(SourceKind::Zip(path.to_path_buf()));
    }
    bail!("unsupported source {source}: expected an http(s) job URL, a .zip file or a directory")
}

/// Output folder for a job URL: `<folder>/<job>/<build>`.
pub fn url_output_folder(folder: &Path, url: &Url) -> Result<PathBuf> {
    let segments: Vec<&str> = url
        .path_segments()
        .map(|segments| segments.collect())
        .unwrap_or_default();
    match (segments.get(1), segments.get(2)) {
        (Some(job), Some(build)) if !job.is_empty() && !build.is_empty() => {
            Ok(folder.join(job).join(build))
        }
        _ => bail!("cannot find job name and build number in {url}"),
    }
}

/// URL of the zip holding every artifact of a job build.
pub fn artifact_url(job_url: &Url) -> Result<Url> {
    let base = job_url.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}/{ARTIFACT_ZIP_PATH}"))
        .with_context(|| format!("invalid artifact URL for {job_url}"))
}

/// Downloads the build artifacts of `job_url` into `destination`.
pub fn download(job_url: &Url, destination: &Path, accept_invalid_certs: bool) -> Result<PathBuf> {
    let url = artifact_url(job_url)?;
    tracing::info!(%url, destination = %destination.display(), "downloading build artifacts");

    let client = reqwest::blocking::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(None)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
        .context("failed to build HTTP client")?;
    let mut response = client
        .get(url.clone())
        .send()
        .and_then(reqwest::blocking::Response::error_for_status)
        .with_context(|| format!("failed to download {url}"))?;

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut file = File::create(destination)
        .with_context(|| format!("failed to create {}", destination.display()))?;
    let bytes = response
        .copy_to(&mut file)
        .with_context(|| format!("failed to download {url}"))?;
    tracing::info!(bytes, "downloaded build artifacts");

    Ok(destination.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_job_url() {
        let kind = classify("https://jenkins.example.com/job/ge-storage/42/").unwrap();
        assert!(matches!(kind, SourceKind::Url(url) if url.host_str() == Some("jenkins.example.com")));
    }

    #[test]
    fn classifies_paths() {
        let temp = tempfile::tempdir().unwrap();
        let zip = temp.path().join("archive.ZIP");
        std::fs::write(&zip, b"").unwrap();

        assert_eq!(
            classify(temp.path().to_str().unwrap()).unwrap(),
            SourceKind::Directory(temp.path().to_path_buf())
        );
        assert_eq!(classify(zip.to_str().unwrap()).unwrap(), SourceKind::Zip(zip.clone()));
    }

    #[test]
    fn rejects_other_sources() {
        let temp = tempfile::tempdir().unwrap();
        let text = temp.path().join("notes.txt");
        std::fs::write(&text, b"").unwrap();

        assert!(classify(text.to_str().unwrap()).is_err());
        assert!(classify(temp.path().join("absent.zip").to_str().unwrap()).is_err());
        assert!(classify("ftp://example.com/archive.zip").is_err());
    }

    #[test]
    fn url_folder_uses_job_and_build() {
        let url = Url::parse("https://jenkins.example.com/job/ge-storage/42/").unwrap();
        let folder = url_output_folder(Path::new("/out"), &url).unwrap();
        assert_eq!(folder, PathBuf::from("/out/ge-storage/42"));

        let url = Url::parse("https://jenkins.example.com/job/").unwrap();
        assert!(url_output_folder(Path::new("/out"), &url).is_err());
    }

    #[test]
    fn artifact_url_ignores_trailing_slash() {
        for job in [
            "https://jenkins.example.com/job/ge-storage/42",
            "https://jenkins.example.com/job/ge-storage/42/",
        ] {
            let url = artifact_url(&Url::parse(job).unwrap()).unwrap();
            assert_eq!(
                url.as_str(),
                "https://jenkins.example.com/job/ge-storage/42/artifact/*zip*/archive.zip"
            );
        }
    }
}
