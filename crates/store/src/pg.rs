//! Postgres [`WorkflowStore`] backed by sqlx.
//!
//! The aggregate spans three tables (`workflows`, `workflow_versions`,
//! `workflow_files`); `save` upserts all of them inside one transaction so
//! a crash mid-save never leaves a version without its files.

use std::collections::HashMap;
use std::str::FromStr;

use flowhub_core::{
    Workflow, WorkflowFile, WorkflowParam, WorkflowSource, WorkflowVersion,
    WorkflowVersionStatus,
};
use flowhub_core::types::Timestamp;
use sqlx::{PgPool, Row};

use crate::{StoreError, WorkflowStore};

/// Column list for workflow_versions queries.
const VERSION_COLUMNS: &str = "id, workflow_id, status, message, language, language_version, \
    main_workflow_path, source, metadata, inputs, outputs, graph, created_at, updated_at";

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn get(&self, workspace_id: &str, workflow_id: &str) -> Result<Workflow, StoreError> {
        let row = sqlx::query(
            "SELECT id, workspace_id, name, description, latest_version_id, created_at, updated_at
             FROM workflows WHERE workspace_id = $1 AND id = $2",
        )
        .bind(workspace_id)
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            workspace_id: workspace_id.to_string(),
            workflow_id: workflow_id.to_string(),
        })?;

        let mut workflow = Workflow {
            id: row.try_get("id")?,
            workspace_id: row.try_get("workspace_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            latest_version_id: row.try_get("latest_version_id")?,
            versions: HashMap::new(),
            created_at: row.try_get::<Timestamp, _>("created_at")?,
            updated_at: row.try_get::<Timestamp, _>("updated_at")?,
        };

        let query = format!(
            "SELECT {VERSION_COLUMNS} FROM workflow_versions WHERE workflow_id = $1"
        );
        let version_rows = sqlx::query(&query)
            .bind(workflow_id)
            .fetch_all(&self.pool)
            .await?;

        for row in version_rows {
            let version = version_from_row(&row)?;
            workflow.versions.insert(version.id.clone(), version);
        }

        let file_rows = sqlx::query(
            "SELECT f.id, f.version_id, f.path, f.content, f.created_at, f.updated_at
             FROM workflow_files f
             JOIN workflow_versions v ON v.id = f.version_id
             WHERE v.workflow_id = $1",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        for row in file_rows {
            let version_id: String = row.try_get("version_id")?;
            let file = WorkflowFile {
                id: row.try_get("id")?,
                path: row.try_get("path")?,
                content: row.try_get("content")?,
                created_at: row.try_get::<Timestamp, _>("created_at")?,
                updated_at: row.try_get::<Timestamp, _>("updated_at")?,
            };
            if let Some(version) = workflow.versions.get_mut(&version_id) {
                version.files.insert(file.id.clone(), file);
            }
        }

        Ok(workflow)
    }

    async fn save(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO workflows
                (id, workspace_id, name, description, latest_version_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                latest_version_id = EXCLUDED.latest_version_id,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(&workflow.id)
        .bind(&workflow.workspace_id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(&workflow.latest_version_id)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&mut *tx)
        .await?;

        for version in workflow.versions.values() {
            sqlx::query(
                "INSERT INTO workflow_versions
                    (id, workflow_id, status, message, language, language_version,
                     main_workflow_path, source, metadata, inputs, outputs, graph,
                     created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                 ON CONFLICT (id) DO UPDATE SET
                    status = EXCLUDED.status,
                    message = EXCLUDED.message,
                    language_version = EXCLUDED.language_version,
                    metadata = EXCLUDED.metadata,
                    inputs = EXCLUDED.inputs,
                    outputs = EXCLUDED.outputs,
                    graph = EXCLUDED.graph,
                    updated_at = EXCLUDED.updated_at",
            )
            .bind(&version.id)
            .bind(&workflow.id)
            .bind(version.status.as_str())
            .bind(&version.message)
            .bind(version.language.as_str())
            .bind(&version.language_version)
            .bind(&version.main_workflow_path)
            .bind(version.source.as_str())
            .bind(serde_json::to_value(&version.metadata)?)
            .bind(serde_json::to_value(&version.inputs)?)
            .bind(serde_json::to_value(&version.outputs)?)
            .bind(&version.graph)
            .bind(version.created_at)
            .bind(version.updated_at)
            .execute(&mut *tx)
            .await?;

            for file in version.files.values() {
                sqlx::query(
                    "INSERT INTO workflow_files
                        (id, version_id, path, content, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     ON CONFLICT (version_id, path) DO UPDATE SET
                        content = EXCLUDED.content,
                        updated_at = EXCLUDED.updated_at",
                )
                .bind(&file.id)
                .bind(&version.id)
                .bind(&file.path)
                .bind(&file.content)
                .bind(file.created_at)
                .bind(file.updated_at)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, workspace_id: &str, workflow_id: &str) -> Result<(), StoreError> {
        // Versions and files go with the workflow via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM workflows WHERE workspace_id = $1 AND id = $2")
            .bind(workspace_id)
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                workspace_id: workspace_id.to_string(),
                workflow_id: workflow_id.to_string(),
            });
        }
        Ok(())
    }
}

/// Build a [`WorkflowVersion`] from a row (files are attached separately).
fn version_from_row(row: &sqlx::postgres::PgRow) -> Result<WorkflowVersion, StoreError> {
    let status: String = row.try_get("status")?;
    let language: String = row.try_get("language")?;
    let source: String = row.try_get("source")?;

    let metadata: serde_json::Value = row.try_get("metadata")?;
    let inputs: serde_json::Value = row.try_get("inputs")?;
    let outputs: serde_json::Value = row.try_get("outputs")?;

    Ok(WorkflowVersion {
        id: row.try_get("id")?,
        status: WorkflowVersionStatus::from_str(&status)
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
        message: row.try_get("message")?,
        language: flowhub_core::WorkflowLanguage::from_str(&language)
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
        language_version: row.try_get("language_version")?,
        main_workflow_path: row.try_get("main_workflow_path")?,
        source: WorkflowSource::from_str(&source)
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
        metadata: serde_json::from_value::<HashMap<String, String>>(metadata)?,
        inputs: serde_json::from_value::<Vec<WorkflowParam>>(inputs)?,
        outputs: serde_json::from_value::<Vec<WorkflowParam>>(outputs)?,
        graph: row.try_get("graph")?,
        files: HashMap::new(),
        created_at: row.try_get::<Timestamp, _>("created_at")?,
        updated_at: row.try_get::<Timestamp, _>("updated_at")?,
    })
}
