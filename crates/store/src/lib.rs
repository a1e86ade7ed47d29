//! Workflow aggregate persistence.
//!
//! [`WorkflowStore`] is the single durability boundary of the ingestion
//! pipeline: `save` must be atomic across the workflow row, all version
//! rows, and all file rows (whole-aggregate upsert).
//!
//! Two implementations:
//! - [`PgWorkflowStore`] — Postgres via sqlx, used in production.
//! - [`MemoryWorkflowStore`] — in-memory map, used by tests and local dev.

pub mod memory;
pub mod pg;

use flowhub_core::Workflow;

pub use memory::MemoryWorkflowStore;
pub use pg::PgWorkflowStore;

/// Errors from the persistence boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("workflow {workflow_id} not found in workspace {workspace_id}")]
    NotFound {
        workspace_id: String,
        workflow_id: String,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Repository for [`Workflow`] aggregates.
#[async_trait::async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Load a workflow aggregate with all its versions and files.
    async fn get(&self, workspace_id: &str, workflow_id: &str) -> Result<Workflow, StoreError>;

    /// Persist the whole aggregate atomically (upsert).
    async fn save(&self, workflow: &Workflow) -> Result<(), StoreError>;

    /// Delete the workflow and, cascading, all its versions and files.
    async fn delete(&self, workspace_id: &str, workflow_id: &str) -> Result<(), StoreError>;
}
