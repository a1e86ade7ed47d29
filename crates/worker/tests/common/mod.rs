//! Shared fixtures for ingestion integration tests.
//!
//! The ingestor is exercised end to end against the in-memory store and a
//! stub parser, so no external toolchain (womtool/cwltool/nextflow) and no
//! git remote is required.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use flowhub_core::{
    Workflow, WorkflowLanguage, WorkflowParam, WorkflowSource, WorkflowVersion,
};
use flowhub_events::VersionAddedPayload;
use flowhub_parsers::{ExecError, ParserError, ParserRegistry, WorkflowParser};
use flowhub_store::{MemoryWorkflowStore, WorkflowStore};
use flowhub_worker::{GitCloner, GitError, VersionIngestor};

/// Scripted [`WorkflowParser`] with per-operation call counters.
pub struct StubParser {
    pub language: WorkflowLanguage,
    pub dialect: String,
    /// Manifest returned by validation; paths must exist under the base
    /// directory for the file snapshot step to succeed.
    pub manifest: Vec<String>,
    /// When set, validation fails with this diagnostic.
    pub validate_error: Option<String>,
    pub inputs: Vec<WorkflowParam>,
    pub outputs: Vec<WorkflowParam>,
    pub graph: String,
    pub calls: AtomicUsize,
}

impl StubParser {
    pub fn valid(language: WorkflowLanguage) -> Self {
        Self {
            language,
            dialect: "1.0".into(),
            manifest: vec!["main.wdl".into()],
            validate_error: None,
            inputs: vec![param("sample_name", "String", false, None)],
            outputs: vec![param("report", "File", true, None)],
            graph: "digraph main {}".into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn invalid(language: WorkflowLanguage, diagnostic: &str) -> Self {
        Self {
            validate_error: Some(diagnostic.to_string()),
            ..Self::valid(language)
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkflowParser for StubParser {
    fn language(&self) -> WorkflowLanguage {
        self.language
    }

    async fn parse_workflow_version(
        &self,
        _cancel: &CancellationToken,
        _main_file: &Path,
    ) -> Result<String, ParserError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.dialect.clone())
    }

    async fn validate_workflow_files(
        &self,
        _cancel: &CancellationToken,
        _base_dir: &Path,
        _main_path: &str,
    ) -> Result<Vec<String>, ParserError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.validate_error {
            Some(diagnostic) => Err(ParserError::Invalid(diagnostic.clone())),
            None => Ok(self.manifest.clone()),
        }
    }

    async fn get_workflow_inputs(
        &self,
        _cancel: &CancellationToken,
        _main_file: &Path,
    ) -> Result<Vec<WorkflowParam>, ParserError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.inputs.clone())
    }

    async fn get_workflow_outputs(
        &self,
        _cancel: &CancellationToken,
        _main_file: &Path,
    ) -> Result<Vec<WorkflowParam>, ParserError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.outputs.clone())
    }

    async fn get_workflow_graph(
        &self,
        _cancel: &CancellationToken,
        _main_file: &Path,
    ) -> Result<String, ParserError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.graph.clone())
    }
}

/// [`GitCloner`] that materializes a fixed file tree instead of cloning,
/// recording the URL and ref it was asked for.
pub struct StubCloner {
    /// `(relative path, content)` pairs written under the target dir.
    pub files: Vec<(String, String)>,
    pub requests: std::sync::Mutex<Vec<(String, String)>>,
}

impl StubCloner {
    pub fn with_files(files: Vec<(String, String)>) -> Self {
        Self {
            files,
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// A cloner that must never be reached.
    pub fn rejecting() -> Self {
        Self::with_files(Vec::new())
    }
}

#[async_trait]
impl GitCloner for StubCloner {
    async fn clone_ref(
        &self,
        _cancel: &CancellationToken,
        dir: &Path,
        url: &str,
        _token: Option<&str>,
        reference: &str,
    ) -> Result<(), GitError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), reference.to_string()));
        if self.files.is_empty() {
            return Err(GitError::CloneFailed("no fixture files configured".into()));
        }
        for (path, content) in &self.files {
            let full = dir.join(path);
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(ExecError::Io)?;
            }
            tokio::fs::write(&full, content)
                .await
                .map_err(ExecError::Io)?;
        }
        Ok(())
    }
}

fn param(name: &str, param_type: &str, optional: bool, default: Option<&str>) -> WorkflowParam {
    WorkflowParam {
        name: name.to_string(),
        param_type: param_type.to_string(),
        optional,
        default: default.map(str::to_string),
    }
}

/// Seed the store with one workflow holding one `Pending` version and
/// return `(store, payload for that version)`.
pub async fn seed_version(
    language: WorkflowLanguage,
    main_path: &str,
    source: WorkflowSource,
    metadata: HashMap<String, String>,
    local_dir: Option<String>,
) -> (Arc<MemoryWorkflowStore>, VersionAddedPayload) {
    let store = Arc::new(MemoryWorkflowStore::new());

    let mut workflow = Workflow::new("ws-1", "variant-calling", None);
    let version_id =
        workflow.add_version(WorkflowVersion::new(language, main_path, source, metadata));
    let payload = VersionAddedPayload {
        workspace_id: workflow.workspace_id.clone(),
        workflow_id: workflow.id.clone(),
        version_id,
        local_dir,
    };
    store.save(&workflow).await.unwrap();

    (store, payload)
}

/// Wire an ingestor around a single stub parser and cloner.
pub fn build_ingestor(
    store: Arc<MemoryWorkflowStore>,
    parser: Arc<StubParser>,
    cloner: Arc<StubCloner>,
) -> VersionIngestor {
    let mut parsers: HashMap<WorkflowLanguage, Arc<dyn WorkflowParser>> = HashMap::new();
    let language = parser.language;
    parsers.insert(language, parser);
    VersionIngestor::new(store, Arc::new(ParserRegistry::from_parsers(parsers)), cloner)
}
