// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! How git is actually invoked.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::trace;

use crate::error::GitError;

/// Runs one git command and returns its trimmed stdout.
///
/// On a non-zero exit the error carries both stderr and stdout, since git
/// reports merge conflicts on stdout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitExecutor: Send + Sync {
    async fn run(&self, args: Vec<String>) -> Result<String, GitError>;
}

/// Spawns the `git` binary in a working directory.
///
/// There is no timeout: a hung git process blocks the caller.
#[derive(Debug, Clone)]
pub struct ProcessGitExecutor {
    repo_root: PathBuf,
}

impl ProcessGitExecutor {
    pub fn new(repo_root: impl AsRef<Path>) -> Self {
        Self {
            repo_root: repo_root.as_ref().to_path_buf(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }
}

#[async_trait]
impl GitExecutor for ProcessGitExecutor {
    async fn run(&self, args: Vec<String>) -> Result<String, GitError> {
        trace!(?args, "git");
        let output = Command::new("git")
            .args(&args)
            .current_dir(&self.repo_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let combined = match (stderr.is_empty(), stdout.is_empty()) {
                (false, false) => format!("{}\n{}", stderr, stdout),
                (false, true) => stderr,
                _ => stdout,
            };
            Err(GitError::CommandFailed {
                command: args.first().cloned().unwrap_or_default(),
                stderr: combined,
            })
        }
    }
}
