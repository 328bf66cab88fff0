//! Per-dialog content-addressed versioning.
//!
//! Each dialog owns a bare repository under its state directory; the mirrored
//! working tree is the user's workspace, so the user's own version control is
//! never touched. Checkpoints live on `refs/heads/session_N` branches;
//! `refs/heads/main` tracks the approved baseline.

mod diff;
mod engine;

pub use diff::{DiffStats, is_binary, unified_diff};
pub use engine::{TrackOp, VersioningEngine};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the versioning engine.
#[derive(Debug, Error)]
pub enum VersioningError {
    #[error("repository error: {0}")]
    Repository(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("invalid commit id: {0}")]
    InvalidCommitId(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no active session for dialog")]
    NoActiveSession,

    #[error("nothing approved yet: main is unset")]
    NoApprovedCommit,

    #[error("no edit transaction in progress")]
    NoTransaction,

    #[error(transparent)]
    Session(#[from] crate::session::SessionError),

    #[error("blocking task panicked")]
    TaskPanicked,
}

pub type VersioningResult<T> = Result<T, VersioningError>;

/// One checkpoint on the session branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointInfo {
    pub commit_id: String,
    pub message: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeStatus {
    Added,
    Modified,
    Deleted,
}

/// A changed file between two trees (or between a tree and staging).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub status: FileChangeStatus,
    pub additions: usize,
    pub deletions: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// Result of [`VersioningEngine::approve_all`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApproveOutcome {
    pub approved_commit: String,
    pub new_session: String,
    pub commits_approved: usize,
}

/// Result of [`VersioningEngine::restore_checkpoint`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestoreOutcome {
    /// Paths written or deleted on disk.
    pub restored_paths: Vec<String>,
    /// Checkpoint created after the restore, making it reversible.
    pub new_checkpoint: String,
}

/// Result of [`VersioningEngine::reset_to_approved`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResetOutcome {
    pub reset_to: String,
    pub new_session: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_reset_checkpoint: Option<String>,
}

/// Normalize a path for use as a repository key: forward slashes, relative to
/// the project root.
pub fn normalize_path(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    normalized
        .trim_start_matches("./")
        .trim_start_matches('/')
        .to_string()
}
