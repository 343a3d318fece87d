use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

/// Output from a subprocess execution.
#[derive(Debug, Clone)]
pub struct SubprocessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl SubprocessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// stdout and stderr concatenated, for failure reports.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Run a shell command string with a timeout.
///
/// Used for pre-merge check commands, which are configured as a single
/// shell-tokenized string.
pub async fn run_shell(cmd: &str, cwd: &Path, timeout: Duration) -> Result<SubprocessOutput> {
    tracing::debug!(cmd, ?cwd, ?timeout, "spawning shell subprocess");

    let child = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .current_dir(cwd)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context(format!("failed to spawn: {cmd}"))?;

    wait_with_timeout(child, timeout, cmd).await
}

/// Run a program with an argv list and a timeout. Git plumbing goes through
/// here — no shell involved, so paths and refs never need quoting.
pub async fn run_argv(
    program: &str,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> Result<SubprocessOutput> {
    tracing::debug!(program, ?args, ?cwd, "spawning subprocess");

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context(format!("failed to spawn: {program} {}", args.join(" ")))?;

    wait_with_timeout(child, timeout, program).await
}

async fn wait_with_timeout(
    child: tokio::process::Child,
    timeout: Duration,
    label: &str,
) -> Result<SubprocessOutput> {
    // kill_on_drop is set on every spawn, so the timeout branch dropping
    // the wait future kills the child instead of leaking it.
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let result = SubprocessOutput {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                timed_out: false,
            };
            tracing::debug!(
                exit_code = result.exit_code,
                stdout_len = result.stdout.len(),
                "subprocess completed"
            );
            Ok(result)
        }
        Ok(Err(e)) => Err(e).context(format!("subprocess failed: {label}")),
        Err(_) => {
            tracing::warn!(label, ?timeout, "subprocess timed out");
            Ok(SubprocessOutput {
                stdout: String::new(),
                stderr: format!("process timed out after {timeout:?}"),
                exit_code: -1,
                timed_out: true,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shell_captures_output_and_exit() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_shell("echo hi; exit 3", dir.path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "hi");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn timeout_reported_not_errored() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_shell("sleep 5", dir.path(), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn timed_out_child_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_shell(
            "sleep 1 && touch marker",
            dir.path(),
            Duration::from_millis(100),
        )
        .await
        .unwrap();
        assert!(out.timed_out);

        // If the child had survived the timeout it would finish the sleep
        // and create the marker.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn argv_runs_without_shell() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_argv("echo", &["a b"], dir.path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "a b");
    }

    #[tokio::test]
    async fn combined_joins_streams() {
        let out = SubprocessOutput {
            stdout: "out".into(),
            stderr: "err".into(),
            exit_code: 1,
            timed_out: false,
        };
        assert_eq!(out.combined(), "out\nerr");
    }
}
