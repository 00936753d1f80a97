//! Configuration loading and management.

use std::path::{Path, PathBuf};

use artlog_core::{DEFAULT_LOGS, DEFAULT_TOLERANCE_SECS};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Name of the default output folder, under the home directory.
const DEFAULT_OUTPUT_DIR: &str = "art-tests-logs";

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Folder the per-test bundles are written under.
    pub output_folder: PathBuf,

    /// Logs split when `--logs` is not given.
    pub logs: Vec<String>,

    /// Slack around every test window, in seconds.
    pub tolerance_secs: u32,

    /// Accept self-signed certificates when downloading build artifacts.
    pub accept_invalid_certs: bool,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            output_folder: home.join(DEFAULT_OUTPUT_DIR),
            logs: DEFAULT_LOGS.iter().map(ToString::to_string).collect(),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
            accept_invalid_certs: false,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (ARTLOG_*)
        figment = figment.merge(Env::prefixed("ARTLOG_"));

        figment.extract()
    }
}

/// Returns the platform-specific config directory for artlog.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("artlog"))
}

/// Expands a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    dirs::home_dir().map_or_else(|| path.to_path_buf(), |home| home.join(rest))
}
