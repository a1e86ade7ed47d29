//! Version ingestion orchestrator.
//!
//! Subscribes to `workflow.version.added` events and drives the declared
//! version through the pipeline state machine:
//!
//! ```text
//! Pending ──ingest──▶ Success | Failed
//! ```
//!
//! Steps run strictly in order, each gated on the previous: resolve the
//! source directory, confirm the main file, detect the dialect, validate
//! and snapshot files, extract parameters and the graph. Any step failure
//! aborts the remaining steps, but the terminal save still happens
//! exactly once per attempt. The version's status/message pair is the
//! sole externally observable outcome.
//!
//! Events are delivered at least once, so the handler is idempotent: a
//! version already in `Success` short-circuits to a no-op with zero tool
//! invocations, while `Pending` and `Failed` versions re-run the full
//! pipeline from scratch.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use flowhub_core::{Workflow, WorkflowSource, WorkflowVersionStatus};
use flowhub_events::bus::DomainEvent;
use flowhub_events::VersionAddedPayload;
use flowhub_parsers::{collect_files, ExecError, ParserError, ParserRegistry, RegistryError};
use flowhub_store::{StoreError, WorkflowStore};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::git::{GitCloner, GitError};

/// Message recorded on a fully successful ingestion.
const SUCCESS_MESSAGE: &str = "success";

/// Errors from a single ingestion attempt.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The event references a version the aggregate does not contain.
    #[error("version {version_id} not found on workflow {workflow_id}")]
    VersionNotFound {
        workflow_id: String,
        version_id: String,
    },

    /// The declared main workflow file is absent from the resolved source
    /// directory. Distinct from a generic I/O error.
    #[error("main workflow file not found: {0}")]
    MainFileMissing(String),

    /// The version carries no usable source descriptor.
    #[error("version has no usable source: {0}")]
    SourceMissing(&'static str),
}

impl IngestError {
    /// Whether the attempt was cut short by shutdown rather than failing.
    fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::Parser(ParserError::Exec(ExecError::Cancelled))
                | Self::Git(GitError::Exec(ExecError::Cancelled))
        )
    }
}

/// Event handler driving the per-version ingestion state machine.
pub struct VersionIngestor {
    store: Arc<dyn WorkflowStore>,
    registry: Arc<ParserRegistry>,
    cloner: Arc<dyn GitCloner>,
    /// Per-workflow locks: the aggregate mutation plus save is a single
    /// critical section, so concurrent ingestion of two versions of the
    /// same workflow cannot corrupt the versions map. Entries are pruned
    /// once the last attempt releases them, bounding the map by in-flight
    /// ingestions rather than by workflows ever touched.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl VersionIngestor {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        registry: Arc<ParserRegistry>,
        cloner: Arc<dyn GitCloner>,
    ) -> Self {
        Self {
            store,
            registry,
            cloner,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run the ingestion loop until the cancellation token is triggered
    /// or the event bus closes.
    pub async fn run(
        &self,
        mut receiver: broadcast::Receiver<DomainEvent>,
        cancel: CancellationToken,
    ) {
        tracing::info!("Version ingestor started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Version ingestor shutting down");
                    break;
                }
                msg = receiver.recv() => match msg {
                    Ok(event) => {
                        let Some(payload) = VersionAddedPayload::from_event(&event) else {
                            continue;
                        };
                        if let Err(e) = self.handle(&cancel, &payload).await {
                            tracing::error!(
                                workflow_id = %payload.workflow_id,
                                version_id = %payload.version_id,
                                error = %e,
                                "Version ingestion failed",
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Ingestor lagged, some events were missed");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event bus closed, ingestor shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Ingest one version end to end.
    ///
    /// Exactly one terminal save per attempt; a cancelled attempt saves
    /// nothing and leaves the version `Pending` for the next delivery.
    pub async fn handle(
        &self,
        cancel: &CancellationToken,
        payload: &VersionAddedPayload,
    ) -> Result<(), IngestError> {
        let lock = self.workflow_lock(&payload.workflow_id).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.ingest_locked(cancel, payload).await
        };
        drop(lock);
        self.release_workflow_lock(&payload.workflow_id).await;
        outcome
    }

    /// The body of one attempt, run under the workflow's lock.
    async fn ingest_locked(
        &self,
        cancel: &CancellationToken,
        payload: &VersionAddedPayload,
    ) -> Result<(), IngestError> {
        let mut workflow = self
            .store
            .get(&payload.workspace_id, &payload.workflow_id)
            .await?;

        let version =
            workflow
                .version(&payload.version_id)
                .ok_or_else(|| IngestError::VersionNotFound {
                    workflow_id: payload.workflow_id.clone(),
                    version_id: payload.version_id.clone(),
                })?;

        // Idempotence: redelivery of an already-ingested version is a
        // no-op, with zero tool invocations.
        if version.status == WorkflowVersionStatus::Success {
            tracing::info!(
                workflow_id = %payload.workflow_id,
                version_id = %payload.version_id,
                "Version already ingested, skipping",
            );
            return Ok(());
        }

        let outcome = self.run_pipeline(cancel, &mut workflow, payload).await;

        if let Err(e) = &outcome {
            if e.is_cancellation() {
                // Shutdown mid-pipeline: leave the version Pending so the
                // next delivery retries from scratch.
                return outcome;
            }
        }

        let version =
            workflow
                .version_mut(&payload.version_id)
                .ok_or_else(|| IngestError::VersionNotFound {
                    workflow_id: payload.workflow_id.clone(),
                    version_id: payload.version_id.clone(),
                })?;

        match &outcome {
            Ok(()) => {
                version.finish(WorkflowVersionStatus::Success, SUCCESS_MESSAGE);
                tracing::info!(
                    workflow_id = %payload.workflow_id,
                    version_id = %payload.version_id,
                    dialect = %version.language_version,
                    files = version.files.len(),
                    "Version ingested",
                );
            }
            Err(e) => {
                version.finish(WorkflowVersionStatus::Failed, e.to_string());
                tracing::warn!(
                    workflow_id = %payload.workflow_id,
                    version_id = %payload.version_id,
                    error = %e,
                    "Version ingestion reached Failed",
                );
            }
        }

        self.store.save(&workflow).await?;
        outcome
    }

    /// The pipeline steps. Mutates the in-memory version as each step
    /// succeeds; the terminal status is the caller's responsibility.
    async fn run_pipeline(
        &self,
        cancel: &CancellationToken,
        workflow: &mut Workflow,
        payload: &VersionAddedPayload,
    ) -> Result<(), IngestError> {
        let version = workflow
            .version(&payload.version_id)
            .ok_or_else(|| IngestError::VersionNotFound {
                workflow_id: payload.workflow_id.clone(),
                version_id: payload.version_id.clone(),
            })?;
        let language = version.language;
        let main_path = version.main_workflow_path.clone();

        // Step 1: resolve the source directory. A caller-provided local
        // directory is used as-is (the caller owns its lifecycle); a git
        // source is shallow-cloned into a temporary directory removed
        // when this function returns, regardless of outcome.
        let (_clone_dir, base_dir): (Option<tempfile::TempDir>, PathBuf) =
            match &payload.local_dir {
                Some(dir) => (None, PathBuf::from(dir)),
                None => match version.source {
                    WorkflowSource::Git => {
                        let url = version
                            .git_url()
                            .ok_or(IngestError::SourceMissing("git url metadata"))?
                            .to_string();
                        let tag = version
                            .git_tag()
                            .ok_or(IngestError::SourceMissing("git tag metadata"))?
                            .to_string();
                        let token = version.git_token().map(str::to_string);

                        let tmp = tempfile::tempdir()?;
                        let target = tmp.path().join("repo");
                        self.cloner
                            .clone_ref(cancel, &target, &url, token.as_deref(), &tag)
                            .await?;
                        (Some(tmp), target)
                    }
                    WorkflowSource::File => {
                        return Err(IngestError::SourceMissing(
                            "file source event carries no local directory",
                        ))
                    }
                },
            };

        // Step 2: the declared main file must exist under the source.
        let main_file = base_dir.join(&main_path);
        if !main_file.is_file() {
            return Err(IngestError::MainFileMissing(main_path));
        }

        let parser = self.registry.get(language)?;

        // Step 3: detect the dialect.
        let dialect = parser.parse_workflow_version(cancel, &main_file).await?;
        self.version_mut(workflow, payload)?.language_version = dialect;

        // Step 4: validate and snapshot the dependent files.
        let manifest = parser
            .validate_workflow_files(cancel, &base_dir, &main_path)
            .await?;
        collect_files(&base_dir, &manifest, self.version_mut(workflow, payload)?).await?;

        // Step 5: parameters and graph, each overwriting its field as it
        // succeeds.
        let inputs = parser.get_workflow_inputs(cancel, &main_file).await?;
        self.version_mut(workflow, payload)?.inputs = inputs;

        let outputs = parser.get_workflow_outputs(cancel, &main_file).await?;
        self.version_mut(workflow, payload)?.outputs = outputs;

        let graph = parser.get_workflow_graph(cancel, &main_file).await?;
        self.version_mut(workflow, payload)?.graph = graph;

        Ok(())
    }

    fn version_mut<'a>(
        &self,
        workflow: &'a mut Workflow,
        payload: &VersionAddedPayload,
    ) -> Result<&'a mut flowhub_core::WorkflowVersion, IngestError> {
        workflow
            .version_mut(&payload.version_id)
            .ok_or_else(|| IngestError::VersionNotFound {
                workflow_id: payload.workflow_id.clone(),
                version_id: payload.version_id.clone(),
            })
    }

    /// Lock guarding aggregate mutation + save for one workflow.
    async fn workflow_lock(&self, workflow_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(workflow_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry once no other attempt holds or awaits it.
    ///
    /// The strong count is checked under the map mutex, so a concurrent
    /// `workflow_lock` call cannot race the removal.
    async fn release_workflow_lock(&self, workflow_id: &str) {
        let mut locks = self.locks.lock().await;
        if locks
            .get(workflow_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(workflow_id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
