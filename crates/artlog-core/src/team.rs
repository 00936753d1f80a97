//! Teams as namespaces inside dotted test identifiers.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

/// Organizational namespace found inside a test's dotted identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Team {
    Compute,
    Networking,
    Storage,
    System,
    Coresystem,
    Sla,
    Virt,
}

impl Team {
    /// All teams, in the order they are searched for in a test path.
    pub const ALL: [Self; 7] = [
        Self::Compute,
        Self::Networking,
        Self::Storage,
        Self::System,
        Self::Coresystem,
        Self::Sla,
        Self::Virt,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Networking => "networking",
            Self::Storage => "storage",
            Self::System => "system",
            Self::Coresystem => "coresystem",
            Self::Sla => "sla",
            Self::Virt => "virt",
        }
    }

    /// Whether a runner `Test Name` line belongs to this team.
    pub fn matches(&self, line: &str) -> bool {
        line.contains(&format!(".{}.", self.as_str()))
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Team {
    type Err = UnknownTeam;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|team| team.as_str() == s)
            .ok_or_else(|| UnknownTeam(s.to_string()))
    }
}

/// Error type for unknown team strings.
#[derive(Debug, Clone, Error)]
#[error("unknown team: {0}")]
pub struct UnknownTeam(String);

/// Output directory for a dotted test identifier.
///
/// Components before the first team found (teams are tried in [`Team::ALL`]
/// order) are dropped; without a team component the whole path is kept.
pub fn test_directory(root: &Path, test_name: &str) -> PathBuf {
    let components: Vec<&str> = test_name.trim().split('.').collect();
    let team_index = Team::ALL
        .iter()
        .find_map(|team| components.iter().position(|c| *c == team.as_str()))
        .unwrap_or(0);

    components[team_index..]
        .iter()
        .fold(root.to_path_buf(), |path, component| path.join(component))
}
