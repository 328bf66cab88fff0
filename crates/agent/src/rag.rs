//! The retrieval-index capability consumed at the core boundary.
//!
//! The embedding/vector store itself lives outside this crate; the core only
//! needs to tell it about file changes and to reconcile it before a turn.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of a [`RAGIndex::sync`] reconciliation pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStats {
    /// Files whose freshness was checked
    pub checked: usize,
    /// Files re-embedded because their content changed
    pub reindexed: usize,
    /// Index entries removed because the source file is gone
    pub removed: usize,
}

/// Error reported by the retrieval index.
#[derive(Debug, thiserror::Error)]
#[error("rag index error: {0}")]
pub struct RagError(pub String);

/// Retrieval-index operations the core invokes.
///
/// All methods take forward-slash paths relative to the project root.
#[async_trait]
pub trait RAGIndex: Send + Sync {
    /// Index a new file.
    async fn index(&self, path: &str) -> Result<(), RagError>;

    /// Re-embed a file whose content changed.
    async fn reindex(&self, path: &str) -> Result<(), RagError>;

    /// Drop all entries sourced from a file.
    async fn delete_by_source(&self, path: &str) -> Result<(), RagError>;

    /// Reconcile the index against the workspace.
    async fn sync(&self) -> Result<SyncStats, RagError>;
}

/// No-op index used when retrieval is disabled and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRagIndex;

#[async_trait]
impl RAGIndex for NoopRagIndex {
    async fn index(&self, _path: &str) -> Result<(), RagError> {
        Ok(())
    }

    async fn reindex(&self, _path: &str) -> Result<(), RagError> {
        Ok(())
    }

    async fn delete_by_source(&self, _path: &str) -> Result<(), RagError> {
        Ok(())
    }

    async fn sync(&self) -> Result<SyncStats, RagError> {
        Ok(SyncStats::default())
    }
}
