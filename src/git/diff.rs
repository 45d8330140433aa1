// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `git diff --numstat` parsing.

use serde::{Deserialize, Serialize};

/// Aggregate line statistics for a diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffStats {
    pub files_changed: u64,
    pub insertions: u64,
    pub deletions: u64,
}

impl DiffStats {
    pub fn is_empty(&self) -> bool {
        self.files_changed == 0
    }
}

impl std::ops::Add for DiffStats {
    type Output = DiffStats;

    fn add(self, other: DiffStats) -> DiffStats {
        DiffStats {
            files_changed: self.files_changed + other.files_changed,
            insertions: self.insertions + other.insertions,
            deletions: self.deletions + other.deletions,
        }
    }
}

/// Parse numstat output: `added<TAB>deleted<TAB>path` per line.
///
/// Binary files report `-` for both counts and contribute zero lines but
/// still count as a changed file. Lines without three tab-separated fields
/// are ignored.
pub fn parse_numstat(output: &str) -> DiffStats {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(3, '\t');
            let added = fields.next()?;
            let deleted = fields.next()?;
            let path = fields.next()?;
            if path.trim().is_empty() {
                return None;
            }
            Some(DiffStats {
                files_changed: 1,
                insertions: parse_count(added),
                deletions: parse_count(deleted),
            })
        })
        .fold(DiffStats::default(), |acc, file| acc + file)
}

fn parse_count(field: &str) -> u64 {
    field.trim().parse().unwrap_or(0)
}
