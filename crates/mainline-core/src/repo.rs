use crate::task::RepoName;
use serde::Deserialize;
use std::path::PathBuf;

/// How merges into this repo's main are gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Every in_approval task is eligible immediately.
    Auto,
    /// Eligible only once the current review verdict is approved.
    Manual,
    /// Unrecognized value in repos.toml. The scanner skips these with a
    /// warning instead of failing config load.
    #[serde(other)]
    Unknown,
}

impl Default for ApprovalMode {
    fn default() -> Self {
        ApprovalMode::Manual
    }
}

/// Configuration for a managed repository.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoConfig {
    pub name: RepoName,
    /// Path to the persistent clone. Its primary working directory is never
    /// checked out to a different branch by this system.
    pub path: PathBuf,
    #[serde(default)]
    pub approval: ApprovalMode,
    /// Pre-merge validation command, run inside the rebased temp worktree.
    /// When absent, a runner is auto-detected from project marker files.
    #[serde(default)]
    pub premerge_cmd: Option<String>,
    /// Seconds allowed for the pre-merge command (default 300).
    #[serde(default = "default_premerge_timeout")]
    pub premerge_timeout_secs: u64,
}

fn default_premerge_timeout() -> u64 {
    300
}

/// Top-level repos configuration (parsed from repos.toml).
#[derive(Debug, Clone, Deserialize)]
pub struct ReposConfig {
    pub repo: Vec<RepoConfig>,
}

impl ReposConfig {
    /// Load from a TOML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ReposConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Find config for a specific repo.
    pub fn get(&self, name: &RepoName) -> Option<&RepoConfig> {
        self.repo.iter().find(|r| &r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_repos_toml() {
        let config: ReposConfig = toml::from_str(
            r#"
            [[repo]]
            name = "myrepo"
            path = "/srv/repos/myrepo"
            approval = "auto"
            premerge_cmd = "cargo test"

            [[repo]]
            name = "webapp"
            path = "/srv/repos/webapp"
            approval = "manual"
            "#,
        )
        .unwrap();

        assert_eq!(config.repo.len(), 2);
        let myrepo = config.get(&RepoName::new("myrepo")).unwrap();
        assert_eq!(myrepo.approval, ApprovalMode::Auto);
        assert_eq!(myrepo.premerge_cmd.as_deref(), Some("cargo test"));
        assert_eq!(myrepo.premerge_timeout_secs, 300);

        let webapp = config.get(&RepoName::new("webapp")).unwrap();
        assert_eq!(webapp.approval, ApprovalMode::Manual);
        assert!(webapp.premerge_cmd.is_none());
    }

    #[test]
    fn unknown_approval_mode_parses_not_crashes() {
        let config: ReposConfig = toml::from_str(
            r#"
            [[repo]]
            name = "myrepo"
            path = "/srv/repos/myrepo"
            approval = "consensus"
            "#,
        )
        .unwrap();
        assert_eq!(config.repo[0].approval, ApprovalMode::Unknown);
    }

    #[test]
    fn approval_defaults_to_manual() {
        let config: ReposConfig = toml::from_str(
            r#"
            [[repo]]
            name = "myrepo"
            path = "/srv/repos/myrepo"
            "#,
        )
        .unwrap();
        assert_eq!(config.repo[0].approval, ApprovalMode::Manual);
    }
}
