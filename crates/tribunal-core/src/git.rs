//! Git process helpers used by the repository investigator.

use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::domain::error::{AuditError, Result};

/// One line of `git log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub hash: String,
    pub timestamp: String,
    pub message: String,
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Shallow-clone `url` into `dest`.
///
/// Arguments are passed as a vector, never through a shell.
pub fn clone_shallow(url: &str, dest: &Path, depth: u32) -> Result<()> {
    let depth = depth.to_string();
    let output = Command::new("git")
        .args(["clone", "--depth", &depth, "--", url])
        .arg(dest)
        .output()
        .map_err(|e| AuditError::Resolution {
            target: url.to_string(),
            reason: format!("failed to run git: {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AuditError::Resolution {
            target: url.to_string(),
            reason: format!("git clone failed: {}", stderr.trim()),
        });
    }
    Ok(())
}

/// Oldest-first commit log, at most `max_count` entries.
pub fn commit_log(repo_dir: &Path, max_count: usize) -> Result<Vec<CommitSummary>> {
    let output = Command::new("git")
        .args([
            "log",
            "--reverse",
            &format!("--max-count={max_count}"),
            "--date=iso-strict",
            "--pretty=%h|%ad|%s",
        ])
        .current_dir(repo_dir)
        .output()
        .map_err(|e| AuditError::Collaborator(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AuditError::Collaborator(format!(
            "git log failed: {}",
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '|');
            let hash = parts.next()?.trim();
            let timestamp = parts.next()?.trim();
            let message = parts.next()?.trim();
            if hash.is_empty() {
                return None;
            }
            Some(CommitSummary {
                hash: hash.to_string(),
                timestamp: timestamp.to_string(),
                message: message.to_string(),
            })
        })
        .collect())
}
