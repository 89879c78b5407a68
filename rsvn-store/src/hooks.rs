//! Commit hook support
//!
//! The loader runs two hooks around each replayed commit:
//! - pre-commit: runs before a transaction is committed (can reject)
//! - post-commit: runs after the commit is durable (notification)
//!
//! Hook scripts receive data on stdin and must exit with code 0 to
//! succeed. On non-zero exit the script's stderr (or stdout) becomes the
//! error message.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Error, Result};
use crate::store::Revnum;

/// Hook seam used by the loader. A pre-commit failure aborts the pending
/// transaction; a post-commit failure cannot roll anything back and is
/// reported distinctly.
pub trait HookRunner {
    fn run_pre_commit(&self, base_rev: Revnum) -> Result<()>;
    fn run_post_commit(&self, rev: Revnum) -> Result<()>;
}

/// Runs no hooks; every operation is allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl HookRunner for NoopHooks {
    fn run_pre_commit(&self, _base_rev: Revnum) -> Result<()> {
        Ok(())
    }

    fn run_post_commit(&self, _rev: Revnum) -> Result<()> {
        Ok(())
    }
}

/// Runs hook scripts out of a repository's `hooks/` directory. A missing
/// script counts as success.
pub struct HookManager {
    hooks_dir: PathBuf,
}

impl HookManager {
    /// Hooks are expected in `<repo_root>/hooks/`.
    pub fn new(repo_path: PathBuf) -> Self {
        Self {
            hooks_dir: repo_path.join("hooks"),
        }
    }

    pub fn hook_path(&self, name: &str) -> PathBuf {
        self.hooks_dir.join(name)
    }

    fn hook_exists(&self, name: &str) -> Option<PathBuf> {
        let p = self.hook_path(name);
        if p.exists() { Some(p) } else { None }
    }

    /// Execute a hook script, piping `stdin_data` to its stdin.
    fn run_hook(&self, name: &str, stdin_data: &str) -> Result<()> {
        let hook_path = match self.hook_exists(name) {
            Some(p) => p,
            None => return Ok(()), // No hook installed — allow
        };

        let mut child = Command::new(&hook_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env(
                "RSVN_REPO",
                self.hooks_dir.parent().unwrap_or(Path::new(".")),
            )
            .spawn()
            .map_err(|e| Error::HookFailed {
                hook: name.to_string(),
                message: format!("failed to execute: {e}"),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(stdin_data.as_bytes());
        }

        let output = child.wait_with_output().map_err(|e| Error::HookFailed {
            hook: name.to_string(),
            message: format!("failed to wait: {e}"),
        })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = if !stderr.is_empty() {
            stderr.trim().to_string()
        } else if !stdout.is_empty() {
            stdout.trim().to_string()
        } else {
            format!("exited with code {}", output.status.code().unwrap_or(-1))
        };
        Err(Error::HookFailed {
            hook: name.to_string(),
            message,
        })
    }

}

impl HookRunner for HookManager {
    fn run_pre_commit(&self, base_rev: Revnum) -> Result<()> {
        self.run_hook("pre-commit", &format!("BASE-REVISION: {base_rev}\n"))
    }

    fn run_post_commit(&self, rev: Revnum) -> Result<()> {
        self.run_hook("post-commit", &format!("REVISION: {rev}\n"))
    }
}
