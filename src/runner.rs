//! External collaborator processes and the scratch state they leave behind.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{ScanError, ScanResult};

/// Settings shared by every tool invocation of one scan.
#[derive(Debug, Clone, Copy)]
pub struct ToolRunner {
    timeout: Duration,
    quiet: bool,
}

impl ToolRunner {
    pub fn new(timeout: Duration, quiet: bool) -> Self {
        ToolRunner { timeout, quiet }
    }

    /// Start building an invocation of `program` inside `dir`.
    pub fn command(&self, program: impl Into<String>, dir: &Path) -> ToolCommand {
        ToolCommand {
            runner: *self,
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            dir: dir.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolCommand {
    runner: ToolRunner,
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    dir: PathBuf,
}

impl ToolCommand {
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn spinner(&self) -> ProgressBar {
        if self.runner.quiet {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(self.display());
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    }

    async fn exec(&self) -> ScanResult<Output> {
        let started = Instant::now();
        debug!(tool = %self.display(), dir = %self.dir.display(), "running");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }

        let pb = self.spinner();
        let result = timeout(self.runner.timeout, cmd.output()).await;
        pb.finish_and_clear();

        match result {
            Ok(Ok(output)) => {
                debug!(
                    tool = %self.program,
                    status = ?output.status.code(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "finished"
                );
                Ok(output)
            }
            Ok(Err(source)) => Err(ScanError::ToolUnavailable {
                tool: self.program.clone(),
                source,
            }),
            Err(_) => Err(ScanError::ToolTimeout {
                tool: self.display(),
                timeout: self.runner.timeout,
            }),
        }
    }

    fn failed(&self, output: &Output) -> ScanError {
        ScanError::ToolFailed {
            tool: self.display(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }

    /// Run for side effects; a non-zero exit is an error.
    pub async fn run(&self) -> ScanResult<()> {
        let output = self.exec().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(self.failed(&output))
        }
    }

    /// Run and return stdout.
    ///
    /// A non-zero exit is tolerated when stdout still carries a document, as
    /// `npm ls` does for an unmet peer dependency.
    pub async fn capture(&self) -> ScanResult<String> {
        let output = self.exec().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() {
            return Err(if output.status.success() {
                ScanError::EmptyOutput {
                    tool: self.display(),
                }
            } else {
                self.failed(&output)
            });
        }
        if !output.status.success() {
            warn!(
                tool = %self.display(),
                status = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "tool reported an error; using its output anyway"
            );
        }
        Ok(stdout)
    }
}

/// Removes paths a collaborator created inside the project when dropped.
#[derive(Debug, Default)]
pub struct CleanupGuard {
    paths: Vec<PathBuf>,
}

impl CleanupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `path` for removal unless it already exists. Returns whether it
    /// was tracked.
    pub fn track_if_absent(&mut self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        if path.exists() {
            return false;
        }
        self.paths.push(path);
        true
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        for path in self.paths.drain(..).rev() {
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else if path.exists() {
                std::fs::remove_file(&path)
            } else {
                continue;
            };
            match result {
                Ok(()) => debug!(path = %path.display(), "removed"),
                Err(e) => warn!(path = %path.display(), error = %e, "cleanup failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn runner(secs: u64) -> ToolRunner {
        ToolRunner::new(Duration::from_secs(secs), true)
    }

    #[tokio::test]
    async fn test_capture_stdout() {
        let dir = TempDir::new().unwrap();
        let out = runner(10)
            .command("sh", dir.path())
            .args(["-c", "echo '{\"a\": 1}'"])
            .capture()
            .await
            .unwrap();
        assert_eq!(out.trim(), "{\"a\": 1}");
    }

    #[tokio::test]
    async fn test_nonzero_exit_with_document_is_accepted() {
        let dir = TempDir::new().unwrap();
        let out = runner(10)
            .command("sh", dir.path())
            .args(["-c", "echo '{}'; echo 'peer missing' >&2; exit 1"])
            .capture()
            .await
            .unwrap();
        assert_eq!(out.trim(), "{}");
    }

    #[tokio::test]
    async fn test_failures() {
        let dir = TempDir::new().unwrap();
        let r = runner(10);

        let empty = r.command("sh", dir.path()).args(["-c", "true"]).capture().await;
        assert!(matches!(empty, Err(ScanError::EmptyOutput { .. })));

        let failed = r.command("sh", dir.path()).args(["-c", "exit 2"]).run().await;
        assert!(matches!(failed, Err(ScanError::ToolFailed { status: 2, .. })));

        let missing = r.command("dep-checkr-no-such-tool", dir.path()).run().await;
        assert!(matches!(missing, Err(ScanError::ToolUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = TempDir::new().unwrap();
        let result = ToolRunner::new(Duration::from_millis(100), true)
            .command("sleep", dir.path())
            .arg("5")
            .run()
            .await;
        assert!(matches!(result, Err(ScanError::ToolTimeout { .. })));
    }

    #[tokio::test]
    async fn test_env_is_passed() {
        let dir = TempDir::new().unwrap();
        let out = runner(10)
            .command("sh", dir.path())
            .args(["-c", "echo $DEP_CHECKR_TEST"])
            .env("DEP_CHECKR_TEST", "hello")
            .capture()
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_cleanup_guard_removes_only_new_paths() {
        let dir = TempDir::new().unwrap();
        let existing = dir.path().join("existing");
        std::fs::create_dir(&existing).unwrap();
        let created = dir.path().join("node_modules");

        {
            let mut guard = CleanupGuard::new();
            assert!(!guard.track_if_absent(&existing));
            assert!(guard.track_if_absent(&created));
            std::fs::create_dir_all(created.join("left-pad")).unwrap();
        }

        assert!(existing.exists());
        assert!(!created.exists());
    }
}
