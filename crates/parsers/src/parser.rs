//! The common per-language parser contract.

use std::path::Path;

use flowhub_core::{WorkflowLanguage, WorkflowParam};
use tokio_util::sync::CancellationToken;

use crate::error::ParserError;

/// Fixed placeholder graph document.
///
/// Substituted whenever graph rendering fails or yields nothing; graph
/// unavailability must never block an otherwise-successful ingestion.
/// Consumers can detect it by exact match.
pub const GRAPH_UNAVAILABLE: &str = "digraph unavailable {}";

/// One external-toolchain integration.
///
/// All three language parsers implement this five-operation contract; the
/// ingestion orchestrator stays entirely ignorant of tool-specific output
/// formats.
#[async_trait::async_trait]
pub trait WorkflowParser: Send + Sync {
    /// The language this parser handles.
    fn language(&self) -> WorkflowLanguage;

    /// Detect the concrete dialect of the definition at `main_file`.
    ///
    /// Scans the file line by line for the language's version pragma and
    /// returns the first match. Absence of a pragma is not an error: each
    /// language has a documented default dialect.
    async fn parse_workflow_version(
        &self,
        cancel: &CancellationToken,
        main_file: &Path,
    ) -> Result<String, ParserError>;

    /// Validate the definition rooted at `main_path` under `base_dir` and
    /// return the manifest of files it depends on, as paths relative to
    /// `base_dir` (including the main file and any required sidecars).
    ///
    /// Returns [`ParserError::Invalid`] with the tool's diagnostic text
    /// when the definition is structurally invalid.
    async fn validate_workflow_files(
        &self,
        cancel: &CancellationToken,
        base_dir: &Path,
        main_path: &str,
    ) -> Result<Vec<String>, ParserError>;

    /// Extract the declared inputs, ordered lexicographically by name.
    async fn get_workflow_inputs(
        &self,
        cancel: &CancellationToken,
        main_file: &Path,
    ) -> Result<Vec<WorkflowParam>, ParserError>;

    /// Extract the declared outputs, ordered lexicographically by name.
    async fn get_workflow_outputs(
        &self,
        cancel: &CancellationToken,
        main_file: &Path,
    ) -> Result<Vec<WorkflowParam>, ParserError>;

    /// Render the dependency graph document.
    ///
    /// Tool failure degrades to [`GRAPH_UNAVAILABLE`] instead of an error.
    async fn get_workflow_graph(
        &self,
        cancel: &CancellationToken,
        main_file: &Path,
    ) -> Result<String, ParserError>;
}

impl std::fmt::Debug for dyn WorkflowParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowParser")
            .field("language", &self.language())
            .finish()
    }
}

/// Read `main_file` and return the first capture of `pragma` per line,
/// or `default` when no line matches.
///
/// Shared by the WDL and CWL dialect detectors.
pub(crate) async fn detect_by_line_pragma(
    main_file: &Path,
    pragma: &regex::Regex,
    default: &str,
) -> Result<String, ParserError> {
    let content = tokio::fs::read_to_string(main_file).await?;
    for line in content.lines() {
        if let Some(caps) = pragma.captures(line) {
            if let Some(m) = caps.get(1) {
                return Ok(m.as_str().to_string());
            }
        }
    }
    Ok(default.to_string())
}

/// Sort parameters lexicographically by name so repeated ingestion of an
/// unchanged source is reproducible.
pub(crate) fn sort_params(mut params: Vec<WorkflowParam>) -> Vec<WorkflowParam> {
    params.sort_by(|a, b| a.name.cmp(&b.name));
    params
}
