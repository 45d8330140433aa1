// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Git instrumentation.
//!
//! Wraps `commit`, `merge`, `rebase` and `checkout` with before/after
//! revision tracking and numstat diff statistics, publishing a
//! `git_operation` event for every attempt.
//!
//! Conflict detection is a substring match (`CONFLICT` / `conflict`) on the
//! failure text. It is an approximation that can miss localized git output.
//!
//! ```rust,ignore
//! use agentmeter::git::GitInstrumentation;
//!
//! let git = GitInstrumentation::new("/path/to/repo").with_bus(bus, "session", "iteration");
//! let result = git.commit("feat: wire the bus").await;
//! println!("{} files changed", result.stats.files_changed);
//! ```

mod diff;
mod executor;
mod instrumentation;

pub use diff::{parse_numstat, DiffStats};
pub use executor::{GitExecutor, ProcessGitExecutor};
pub use instrumentation::{GitInstrumentation, GitOperationResult};
