//! In-memory [`WorkflowStore`] for tests and local development.

use std::collections::HashMap;
use std::sync::Arc;

use flowhub_core::Workflow;
use tokio::sync::RwLock;

use crate::{StoreError, WorkflowStore};

/// Map-backed store keyed by `(workspace_id, workflow_id)`.
///
/// Clones on get/save so callers never observe each other's in-flight
/// mutations, mirroring the isolation a database row gives.
#[derive(Default, Clone)]
pub struct MemoryWorkflowStore {
    inner: Arc<RwLock<HashMap<(String, String), Workflow>>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored workflows (test helper).
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether the store is empty (test helper).
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn get(&self, workspace_id: &str, workflow_id: &str) -> Result<Workflow, StoreError> {
        let key = (workspace_id.to_string(), workflow_id.to_string());
        self.inner
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                workspace_id: workspace_id.to_string(),
                workflow_id: workflow_id.to_string(),
            })
    }

    async fn save(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let key = (workflow.workspace_id.clone(), workflow.id.clone());
        self.inner.write().await.insert(key, workflow.clone());
        Ok(())
    }

    async fn delete(&self, workspace_id: &str, workflow_id: &str) -> Result<(), StoreError> {
        let key = (workspace_id.to_string(), workflow_id.to_string());
        self.inner
            .write()
            .await
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                workspace_id: workspace_id.to_string(),
                workflow_id: workflow_id.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
