//! Workflow aggregate: workflows, versions, files, and parameters.
//!
//! A [`Workflow`] owns every [`WorkflowVersion`] ever ingested for it, and
//! each version owns an immutable snapshot of the definition files it was
//! validated against. The aggregate is mutated in memory by the ingestion
//! pipeline and persisted as a whole through the store crate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{new_id, Timestamp};

// ---------------------------------------------------------------------------
// Metadata keys
// ---------------------------------------------------------------------------

/// Metadata key holding the git clone URL for `Source::Git` versions.
pub const METADATA_GIT_URL: &str = "git_url";

/// Metadata key holding the git tag or branch for `Source::Git` versions.
pub const METADATA_GIT_TAG: &str = "git_tag";

/// Metadata key holding the access token for `Source::Git` versions.
pub const METADATA_GIT_TOKEN: &str = "git_token";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Ingestion status of a workflow version.
///
/// Every version starts `Pending` and transitions exactly once per
/// ingestion attempt to a terminal state. A `Success` version is never
/// re-ingested; `Pending` and `Failed` versions re-run the full pipeline
/// when their trigger event is redelivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowVersionStatus {
    Pending,
    Success,
    Failed,
}

impl WorkflowVersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for WorkflowVersionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::Validation(format!(
                "unknown version status: {other}"
            ))),
        }
    }
}

/// Workflow definition language family.
///
/// `Snakemake` is reserved: it can be stored but no parser is registered
/// for it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkflowLanguage {
    Wdl,
    Cwl,
    Nextflow,
    Snakemake,
}

impl WorkflowLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wdl => "WDL",
            Self::Cwl => "CWL",
            Self::Nextflow => "Nextflow",
            Self::Snakemake => "Snakemake",
        }
    }
}

impl std::str::FromStr for WorkflowLanguage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WDL" => Ok(Self::Wdl),
            "CWL" => Ok(Self::Cwl),
            "Nextflow" => Ok(Self::Nextflow),
            "Snakemake" => Ok(Self::Snakemake),
            other => Err(CoreError::Validation(format!(
                "unknown workflow language: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for WorkflowLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a version's definition files come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowSource {
    /// A git repository (URL/tag/token in version metadata).
    Git,
    /// An already-materialized local file tree owned by the caller.
    File,
}

impl WorkflowSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::File => "file",
        }
    }
}

impl std::str::FromStr for WorkflowSource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git" => Ok(Self::Git),
            "file" => Ok(Self::File),
            other => Err(CoreError::Validation(format!(
                "unknown workflow source: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A normalized declared input or output parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowParam {
    pub name: String,
    /// Capitalized canonical type name, e.g. `String`, `Boolean`, `File`.
    pub param_type: String,
    pub optional: bool,
    /// `None` means no default was captured.
    pub default: Option<String>,
}

/// A path + base64-encoded content snapshot belonging to one version.
///
/// Two files with the same `(version, path)` are the same logical file
/// across re-validation attempts; content is replaced, never duplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowFile {
    pub id: String,
    /// Path relative to the version's base directory.
    pub path: String,
    /// File bytes, base64-encoded.
    pub content: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// One immutable configuration of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowVersion {
    pub id: String,
    pub status: WorkflowVersionStatus,
    /// Human-readable outcome, set on every terminal transition.
    pub message: String,
    pub language: WorkflowLanguage,
    /// Detected dialect string such as `"1.0"`, `"draft-2"`, `"DSL2"`.
    pub language_version: String,
    /// Entry-point definition file, relative to the base directory.
    pub main_workflow_path: String,
    pub source: WorkflowSource,
    /// Source descriptor details (git URL/tag/token when `source` is git).
    pub metadata: HashMap<String, String>,
    /// Declared inputs, ordered by extraction.
    pub inputs: Vec<WorkflowParam>,
    /// Declared outputs, ordered by extraction.
    pub outputs: Vec<WorkflowParam>,
    /// Graph-description document, or the "graph unavailable" sentinel.
    pub graph: String,
    /// File snapshots keyed by file id.
    pub files: HashMap<String, WorkflowFile>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl WorkflowVersion {
    /// Create a new `Pending` version.
    pub fn new(
        language: WorkflowLanguage,
        main_workflow_path: impl Into<String>,
        source: WorkflowSource,
        metadata: HashMap<String, String>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: new_id(),
            status: WorkflowVersionStatus::Pending,
            message: String::new(),
            language,
            language_version: String::new(),
            main_workflow_path: main_workflow_path.into(),
            source,
            metadata,
            inputs: Vec::new(),
            outputs: Vec::new(),
            graph: String::new(),
            files: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this version has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status != WorkflowVersionStatus::Pending
    }

    /// Record a terminal outcome for the current ingestion attempt.
    pub fn finish(&mut self, status: WorkflowVersionStatus, message: impl Into<String>) {
        self.status = status;
        self.message = message.into();
        self.updated_at = chrono::Utc::now();
    }

    /// Insert or replace the file snapshot for `path`.
    ///
    /// Lookup is by path, so re-collecting the same path across ingestion
    /// attempts replaces content in place and keeps the original file id.
    pub fn upsert_file(&mut self, path: impl Into<String>, content: impl Into<String>) {
        let path = path.into();
        let now = chrono::Utc::now();

        if let Some(file) = self.files.values_mut().find(|f| f.path == path) {
            file.content = content.into();
            file.updated_at = now;
            return;
        }

        let id = new_id();
        self.files.insert(
            id.clone(),
            WorkflowFile {
                id,
                path,
                content: content.into(),
                created_at: now,
                updated_at: now,
            },
        );
    }

    /// Git clone URL from metadata, if present.
    pub fn git_url(&self) -> Option<&str> {
        self.metadata.get(METADATA_GIT_URL).map(String::as_str)
    }

    /// Git tag or branch from metadata, if present.
    pub fn git_tag(&self) -> Option<&str> {
        self.metadata.get(METADATA_GIT_TAG).map(String::as_str)
    }

    /// Git access token from metadata, if present.
    pub fn git_token(&self) -> Option<&str> {
        self.metadata.get(METADATA_GIT_TOKEN).map(String::as_str)
    }
}

/// Aggregate root owning all versions of one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub workspace_id: String,
    pub description: Option<String>,
    /// Id of the most recently added version; must key into `versions`.
    pub latest_version_id: Option<String>,
    pub versions: HashMap<String, WorkflowVersion>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Workflow {
    /// Create a new workflow with no versions.
    pub fn new(
        workspace_id: impl Into<String>,
        name: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: new_id(),
            name: name.into(),
            workspace_id: workspace_id.into(),
            description,
            latest_version_id: None,
            versions: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Register a new version and make it the latest.
    ///
    /// Returns the id of the added version.
    pub fn add_version(&mut self, version: WorkflowVersion) -> String {
        let id = version.id.clone();
        self.versions.insert(id.clone(), version);
        self.latest_version_id = Some(id.clone());
        self.updated_at = chrono::Utc::now();
        id
    }

    /// Look up a version by id.
    pub fn version(&self, version_id: &str) -> Option<&WorkflowVersion> {
        self.versions.get(version_id)
    }

    /// Look up a version by id, mutably.
    pub fn version_mut(&mut self, version_id: &str) -> Option<&mut WorkflowVersion> {
        self.versions.get_mut(version_id)
    }

    /// Check the aggregate invariant: `latest_version_id`, when set, must
    /// key into `versions`.
    pub fn check_invariants(&self) -> Result<(), CoreError> {
        if let Some(latest) = &self.latest_version_id {
            if !self.versions.contains_key(latest) {
                return Err(CoreError::Conflict(format!(
                    "latest_version_id {latest} does not key into versions"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
