//! Pre-merge validation command resolution.
//!
//! A repo can configure an explicit command; otherwise a test runner is
//! auto-detected from project marker files in the rebased worktree. When
//! neither applies the check passes vacuously with a recorded reason.

use std::path::Path;

/// What will run (or why nothing will) before a merge is allowed.
#[derive(Debug, Clone)]
pub struct PremergePlan {
    pub command: Option<String>,
    /// How the command was chosen, or why none will run.
    pub reason: String,
}

impl PremergePlan {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            command: None,
            reason: reason.into(),
        }
    }
}

/// Marker files checked in order; first match wins.
const MARKERS: &[(&str, &str)] = &[
    ("Cargo.toml", "cargo test"),
    ("package.json", "npm test"),
    ("pyproject.toml", "python -m pytest"),
    ("pytest.ini", "python -m pytest"),
    ("setup.py", "python -m pytest"),
    ("go.mod", "go test ./..."),
    ("Makefile", "make test"),
];

/// Resolve the pre-merge command for a worktree.
pub fn resolve(configured: Option<&str>, worktree: &Path) -> PremergePlan {
    if let Some(cmd) = configured {
        return PremergePlan {
            command: Some(cmd.to_string()),
            reason: "configured premerge_cmd".into(),
        };
    }

    for (marker, cmd) in MARKERS {
        if worktree.join(marker).exists() {
            return PremergePlan {
                command: Some((*cmd).to_string()),
                reason: format!("auto-detected from {marker}"),
            };
        }
    }

    PremergePlan::skipped("no test runner detected")
}
