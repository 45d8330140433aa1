// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Instrumented git operations.
//!
//! Each wrapped operation records `HEAD` before and after, computes numstat
//! diff statistics on success, and publishes a `git_operation` event whether
//! the operation succeeded or not.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::GitError;
use crate::events::{EventBus, GitOperationData, GitOperationKind};

use super::diff::{parse_numstat, DiffStats};
use super::executor::{GitExecutor, ProcessGitExecutor};

/// Hash of git's empty tree, used as the "before" side of a first commit.
const EMPTY_TREE_SHA: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Outcome of one wrapped operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitOperationResult {
    pub operation: GitOperationKind,
    pub success: bool,
    pub sha_before: Option<String>,
    pub sha_after: Option<String>,
    pub stats: DiffStats,
    pub conflicted: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// True when nothing was run (commit on a clean tree).
    pub skipped: bool,
}

impl GitOperationResult {
    fn to_event_data(&self, branch: Option<String>) -> GitOperationData {
        GitOperationData {
            operation: self.operation,
            sha_before: self.sha_before.clone(),
            sha_after: self.sha_after.clone(),
            branch,
            files_changed: self.stats.files_changed,
            insertions: self.stats.insertions,
            deletions: self.stats.deletions,
            conflicted: self.conflicted,
            success: self.success,
            duration_ms: self.duration_ms,
            error_message: self.error.clone(),
        }
    }
}

/// Where published events are attributed.
#[derive(Clone)]
struct EventTarget {
    bus: Arc<EventBus>,
    session_id: String,
    iteration_id: String,
}

/// Git wrapper bound to one working directory.
#[derive(Clone)]
pub struct GitInstrumentation {
    repo_root: PathBuf,
    executor: Arc<dyn GitExecutor>,
    target: Option<EventTarget>,
}

impl GitInstrumentation {
    /// Use the `git` binary in `repo_root`.
    pub fn new(repo_root: impl AsRef<Path>) -> Self {
        let executor = Arc::new(ProcessGitExecutor::new(repo_root.as_ref()));
        Self::with_executor(repo_root, executor)
    }

    pub fn with_executor(repo_root: impl AsRef<Path>, executor: Arc<dyn GitExecutor>) -> Self {
        Self {
            repo_root: repo_root.as_ref().to_path_buf(),
            executor,
            target: None,
        }
    }

    /// Publish operation events to `bus` under the given iteration.
    pub fn with_bus(
        mut self,
        bus: Arc<EventBus>,
        session_id: impl Into<String>,
        iteration_id: impl Into<String>,
    ) -> Self {
        self.target = Some(EventTarget {
            bus,
            session_id: session_id.into(),
            iteration_id: iteration_id.into(),
        });
        self
    }

    /// Re-target events to another iteration of the same session.
    pub fn for_iteration(&self, iteration_id: impl Into<String>) -> Self {
        let mut next = self.clone();
        if let Some(target) = next.target.as_mut() {
            target.iteration_id = iteration_id.into();
        }
        next
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    async fn git(&self, args: &[&str]) -> Result<String, GitError> {
        self.executor
            .run(args.iter().map(|s| s.to_string()).collect())
            .await
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub async fn head_sha(&self) -> Result<String, GitError> {
        let sha = self.git(&["rev-parse", "HEAD"]).await?;
        if sha.is_empty() {
            return Err(GitError::UnexpectedOutput("empty rev-parse output".to_string()));
        }
        Ok(sha)
    }

    pub async fn current_branch(&self) -> Result<String, GitError> {
        self.git(&["branch", "--show-current"]).await
    }

    /// Whether the working tree has anything to commit.
    pub async fn has_changes(&self) -> Result<bool, GitError> {
        let status = self.git(&["status", "--porcelain"]).await?;
        Ok(!status.trim().is_empty())
    }

    /// Diff statistics between two revisions (defaults `HEAD~1`..`HEAD`).
    pub async fn diff_stats(&self, from: Option<&str>, to: Option<&str>) -> Result<DiffStats, GitError> {
        let from = from.unwrap_or("HEAD~1");
        let to = to.unwrap_or("HEAD");
        let output = self.git(&["diff", "--numstat", from, to]).await?;
        Ok(parse_numstat(&output))
    }

    /// Staged plus unstaged changes against `HEAD`.
    pub async fn uncommitted_changes(&self) -> Result<DiffStats, GitError> {
        let output = self.git(&["diff", "--numstat", "HEAD"]).await?;
        Ok(parse_numstat(&output))
    }

    // ------------------------------------------------------------------------
    // Wrapped operations
    // ------------------------------------------------------------------------

    /// Stage everything and commit.
    ///
    /// A clean working tree is a no-op: nothing is committed or published,
    /// and a successful zero-stat result is returned.
    #[instrument(skip(self, message), fields(repo = %self.repo_root.display()))]
    pub async fn commit(&self, message: &str) -> GitOperationResult {
        let start = Instant::now();

        match self.has_changes().await {
            Ok(false) => {
                debug!("Nothing to commit, skipping");
                let head = self.head_sha().await.ok();
                return GitOperationResult {
                    operation: GitOperationKind::Commit,
                    success: true,
                    sha_before: head.clone(),
                    sha_after: head,
                    stats: DiffStats::default(),
                    conflicted: false,
                    duration_ms: start.elapsed().as_millis() as u64,
                    error: None,
                    skipped: true,
                };
            }
            Ok(true) => {}
            // let the commit itself report the failure
            Err(e) => warn!(error = %e, "git status failed"),
        }

        let steps = vec![
            vec!["add".to_string(), "-A".to_string()],
            vec!["commit".to_string(), "-m".to_string(), message.to_string()],
        ];
        self.run_instrumented(GitOperationKind::Commit, steps, None, start)
            .await
    }

    #[instrument(skip(self), fields(repo = %self.repo_root.display()))]
    pub async fn merge(&self, branch: &str) -> GitOperationResult {
        let steps = vec![vec![
            "merge".to_string(),
            "--no-edit".to_string(),
            branch.to_string(),
        ]];
        self.run_instrumented(
            GitOperationKind::Merge,
            steps,
            Some(branch.to_string()),
            Instant::now(),
        )
        .await
    }

    #[instrument(skip(self), fields(repo = %self.repo_root.display()))]
    pub async fn rebase(&self, onto: &str) -> GitOperationResult {
        let steps = vec![vec!["rebase".to_string(), onto.to_string()]];
        self.run_instrumented(
            GitOperationKind::Rebase,
            steps,
            Some(onto.to_string()),
            Instant::now(),
        )
        .await
    }

    #[instrument(skip(self), fields(repo = %self.repo_root.display()))]
    pub async fn checkout(&self, reference: &str) -> GitOperationResult {
        let steps = vec![vec!["checkout".to_string(), reference.to_string()]];
        self.run_instrumented(
            GitOperationKind::Checkout,
            steps,
            Some(reference.to_string()),
            Instant::now(),
        )
        .await
    }

    async fn run_instrumented(
        &self,
        operation: GitOperationKind,
        steps: Vec<Vec<String>>,
        branch: Option<String>,
        start: Instant,
    ) -> GitOperationResult {
        let sha_before = match self.head_sha().await {
            Ok(sha) => Some(sha),
            Err(e) => {
                debug!(error = %e, "No HEAD before operation");
                None
            }
        };

        let mut failure = None;
        for args in steps {
            if let Err(e) = self.executor.run(args).await {
                failure = Some(e);
                break;
            }
        }

        let mut result = GitOperationResult {
            operation,
            success: failure.is_none(),
            sha_before,
            sha_after: None,
            stats: DiffStats::default(),
            conflicted: false,
            duration_ms: 0,
            error: None,
            skipped: false,
        };

        match failure {
            None => {
                result.sha_after = self.head_sha().await.ok();
                if let Some(after) = result.sha_after.as_deref() {
                    let before = result.sha_before.as_deref().unwrap_or(EMPTY_TREE_SHA);
                    result.stats = match self.diff_stats(Some(before), Some(after)).await {
                        Ok(stats) => stats,
                        Err(e) => {
                            warn!(error = %e, "Diff stats failed, recording zero stats");
                            DiffStats::default()
                        }
                    };
                }
                info!(
                    operation = %operation,
                    files = result.stats.files_changed,
                    insertions = result.stats.insertions,
                    deletions = result.stats.deletions,
                    "git operation succeeded"
                );
            }
            Some(e) => {
                result.conflicted = e.is_conflict();
                result.error = Some(e.message());
                warn!(
                    operation = %operation,
                    conflicted = result.conflicted,
                    error = %e,
                    "git operation failed"
                );
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        self.publish(&result, branch).await;
        result
    }

    async fn publish(&self, result: &GitOperationResult, branch: Option<String>) {
        let Some(target) = &self.target else {
            return;
        };
        target
            .bus
            .publish_git_operation(
                &target.session_id,
                &target.iteration_id,
                result.to_event_data(branch),
            )
            .await;
    }
}
