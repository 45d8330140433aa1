// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Git instrumentation against a real repository.
//!
//! Skipped when no `git` binary is on the PATH.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use agentmeter::events::{EventKind, EventPayload, GitOperationKind};
use agentmeter::{EventBus, GitInstrumentation, MemorySink};
use tempfile::TempDir;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap()
        .status;
    assert!(status.success(), "git {:?} failed", args);
}

fn init_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    git(dir.path(), &["init", "-q"]);
    git(dir.path(), &["config", "user.name", "Test"]);
    git(dir.path(), &["config", "user.email", "test@example.com"]);
    git(dir.path(), &["config", "commit.gpgsign", "false"]);
    std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
    git(dir.path(), &["add", "-A"]);
    git(dir.path(), &["commit", "-q", "-m", "init"]);
    dir
}

#[tokio::test]
async fn test_commit_publishes_diff_stats() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let repo = init_repo();
    let memory = Arc::new(MemorySink::new("memory"));
    let bus = Arc::new(EventBus::new().with_sink(memory.clone()));
    let git = GitInstrumentation::new(repo.path()).with_bus(bus, "s1", "i1");

    std::fs::write(repo.path().join("README.md"), "hello\nworld\n").unwrap();
    std::fs::write(repo.path().join("new.txt"), "a\nb\nc\n").unwrap();

    let result = git.commit("add things").await;
    assert!(result.success, "commit failed: {:?}", result.error);
    assert!(!result.skipped);
    assert_ne!(result.sha_before, result.sha_after);
    assert_eq!(result.stats.files_changed, 2);
    assert_eq!(result.stats.insertions, 4);
    assert_eq!(result.stats.deletions, 0);

    let events = memory.events().await;
    assert_eq!(events.len(), 1);
    match &events[0].payload {
        EventPayload::GitOperation(op) => {
            assert_eq!(op.operation, GitOperationKind::Commit);
            assert_eq!(op.files_changed, 2);
            assert!(op.success);
            assert!(!op.conflicted);
        }
        other => panic!("Expected GitOperation, got {:?}", other),
    }
    assert_eq!(events[0].iteration_id.as_deref(), Some("i1"));
}

#[tokio::test]
async fn test_clean_tree_commit_is_skipped() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let repo = init_repo();
    let memory = Arc::new(MemorySink::new("memory"));
    let bus = Arc::new(EventBus::new().with_sink(memory.clone()));
    let git = GitInstrumentation::new(repo.path()).with_bus(bus, "s1", "i1");

    let result = git.commit("nothing").await;
    assert!(result.success);
    assert!(result.skipped);
    assert!(result.stats.is_empty());
    assert_eq!(result.sha_before, result.sha_after);
    assert_eq!(memory.count_kind(EventKind::GitOperation).await, 0);
}

#[tokio::test]
async fn test_failed_checkout_is_published() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let repo = init_repo();
    let memory = Arc::new(MemorySink::new("memory"));
    let bus = Arc::new(EventBus::new().with_sink(memory.clone()));
    let git = GitInstrumentation::new(repo.path()).with_bus(bus, "s1", "i1");

    let result = git.checkout("no-such-branch").await;
    assert!(!result.success);
    assert!(result.error.is_some());
    assert!(result.stats.is_empty());

    let events = memory.events().await;
    match &events[0].payload {
        EventPayload::GitOperation(op) => {
            assert_eq!(op.operation, GitOperationKind::Checkout);
            assert_eq!(op.branch.as_deref(), Some("no-such-branch"));
            assert!(!op.success);
        }
        other => panic!("Expected GitOperation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_diff_stats_and_uncommitted_changes() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let repo = init_repo();
    std::fs::write(repo.path().join("README.md"), "changed\n").unwrap();
    git(repo.path(), &["commit", "-q", "-am", "edit"]);

    let git = GitInstrumentation::new(repo.path());
    let stats = git.diff_stats(None, None).await.unwrap();
    assert_eq!(stats.files_changed, 1);
    assert_eq!(stats.insertions, 1);
    assert_eq!(stats.deletions, 1);

    assert!(git.uncommitted_changes().await.unwrap().is_empty());
    std::fs::write(repo.path().join("README.md"), "changed\nagain\n").unwrap();
    let pending = git.uncommitted_changes().await.unwrap();
    assert_eq!(pending.insertions, 1);
    assert!(git.has_changes().await.unwrap());
}
