//! WDL parser backed by the JVM workflow toolchain (womtool).
//!
//! Tool protocol:
//! - `validate -l <main>` prints `Success!` (checked case-insensitively),
//!   a header line, then one absolute path per dependent file.
//! - `inputs <main>` / `outputs <main>` print one JSON object mapping
//!   parameter name to a compact `Type (optional, default = …)` encoding.
//! - `graph <main>` prints a graph-description document verbatim.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use flowhub_core::param_encoding;
use flowhub_core::{WorkflowLanguage, WorkflowParam};
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::error::ParserError;
use crate::exec::{path_arg, ToolRunner};
use crate::parser::{detect_by_line_pragma, sort_params, WorkflowParser, GRAPH_UNAVAILABLE};

/// Dialect reported when the main file carries no `version` pragma.
pub const DEFAULT_WDL_VERSION: &str = "draft-2";

static VERSION_PRAGMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^version\s+(\S+)").expect("valid regex"));

/// Parser for WDL workflow definitions.
pub struct WdlParser {
    tool_path: String,
    timeout: Duration,
    runner: Arc<dyn ToolRunner>,
}

impl WdlParser {
    pub fn new(tool_path: String, timeout: Duration, runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            tool_path,
            timeout,
            runner,
        }
    }

    /// Run one womtool subcommand against the main file.
    async fn run_tool(
        &self,
        cancel: &CancellationToken,
        cwd: &Path,
        subcommand: &str,
        extra: &[&str],
        main_file: &Path,
    ) -> Result<crate::exec::ToolOutput, ParserError> {
        let mut args = vec![subcommand.to_string()];
        args.extend(extra.iter().map(|s| s.to_string()));
        args.push(path_arg(main_file));
        Ok(self
            .runner
            .run(cancel, Some(cwd), self.timeout, &self.tool_path, &args)
            .await?)
    }

    /// Extract parameters from an inputs/outputs introspection run.
    async fn introspect_params(
        &self,
        cancel: &CancellationToken,
        main_file: &Path,
        subcommand: &str,
    ) -> Result<Vec<WorkflowParam>, ParserError> {
        let cwd = main_dir(main_file);
        let out = self
            .run_tool(cancel, cwd, subcommand, &[], main_file)
            .await?;
        if !out.success() {
            return Err(ParserError::Invalid(out.combined()));
        }
        parse_params_json(&out.stdout)
    }
}

#[async_trait::async_trait]
impl WorkflowParser for WdlParser {
    fn language(&self) -> WorkflowLanguage {
        WorkflowLanguage::Wdl
    }

    async fn parse_workflow_version(
        &self,
        _cancel: &CancellationToken,
        main_file: &Path,
    ) -> Result<String, ParserError> {
        detect_by_line_pragma(main_file, &VERSION_PRAGMA, DEFAULT_WDL_VERSION).await
    }

    async fn validate_workflow_files(
        &self,
        cancel: &CancellationToken,
        base_dir: &Path,
        main_path: &str,
    ) -> Result<Vec<String>, ParserError> {
        let main_file = base_dir.join(main_path);
        let out = self
            .run_tool(cancel, base_dir, "validate", &["-l"], &main_file)
            .await?;

        let dependencies = parse_validation_transcript(&out.combined())?;

        let mut manifest: Vec<String> = Vec::new();
        for abs in &dependencies {
            match relativize_path(abs, base_dir) {
                Some(rel) => manifest.push(rel),
                None => {
                    // The tool can report symlink-resolved prefixes; a path
                    // that does not contain the base directory name at all
                    // is outside the snapshot and skipped.
                    tracing::warn!(path = %abs, "Dependency path outside base directory, skipped");
                }
            }
        }
        if !manifest.iter().any(|p| p == main_path) {
            manifest.push(main_path.to_string());
        }
        Ok(manifest)
    }

    async fn get_workflow_inputs(
        &self,
        cancel: &CancellationToken,
        main_file: &Path,
    ) -> Result<Vec<WorkflowParam>, ParserError> {
        self.introspect_params(cancel, main_file, "inputs").await
    }

    async fn get_workflow_outputs(
        &self,
        cancel: &CancellationToken,
        main_file: &Path,
    ) -> Result<Vec<WorkflowParam>, ParserError> {
        self.introspect_params(cancel, main_file, "outputs").await
    }

    async fn get_workflow_graph(
        &self,
        cancel: &CancellationToken,
        main_file: &Path,
    ) -> Result<String, ParserError> {
        let cwd = main_dir(main_file);
        match self.run_tool(cancel, cwd, "graph", &[], main_file).await {
            Ok(out) if out.success() && !out.stdout.trim().is_empty() => {
                Ok(out.stdout.trim().to_string())
            }
            Ok(out) => {
                tracing::warn!(
                    exit_code = out.exit_code,
                    "womtool graph failed, substituting placeholder"
                );
                Ok(GRAPH_UNAVAILABLE.to_string())
            }
            Err(e @ ParserError::Exec(crate::exec::ExecError::Cancelled)) => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "womtool graph errored, substituting placeholder");
                Ok(GRAPH_UNAVAILABLE.to_string())
            }
        }
    }
}

/// Directory containing the main file (falls back to `.`).
fn main_dir(main_file: &Path) -> &Path {
    main_file.parent().unwrap_or_else(|| Path::new("."))
}

/// Parse a womtool validation transcript.
///
/// Line 0 must be `success!` (case-insensitive); lines before index 2 are
/// header lines. The remainder is one absolute dependency path per line
/// (non-path lines like `None` are skipped).
fn parse_validation_transcript(output: &str) -> Result<Vec<String>, ParserError> {
    let lines: Vec<&str> = output.lines().collect();
    let first = lines.first().map(|l| l.trim()).unwrap_or_default();
    if !first.eq_ignore_ascii_case("success!") {
        return Err(ParserError::Invalid(output.to_string()));
    }

    Ok(lines
        .iter()
        .skip(2)
        .map(|l| l.trim())
        .filter(|l| l.starts_with('/'))
        .map(str::to_string)
        .collect())
}

/// Convert an absolute dependency path to a path relative to `base_dir`
/// by locating the last occurrence of the base-directory name inside it.
///
/// String search instead of prefix-stripping defends against the tool
/// reporting a symlink-resolved prefix.
fn relativize_path(abs: &str, base_dir: &Path) -> Option<String> {
    let base_name = base_dir.file_name()?.to_str()?;
    let needle = format!("/{base_name}/");
    let idx = abs.rfind(&needle)?;
    let rel = &abs[idx + needle.len()..];
    if rel.is_empty() {
        None
    } else {
        Some(rel.to_string())
    }
}

/// Parse the JSON object printed by an inputs/outputs introspection run.
///
/// The object maps parameter name → compact encoding; a `BTreeMap` keeps
/// the result lexicographically ordered by name. Tools may print warnings
/// before the JSON, so parsing starts at the first `{`.
fn parse_params_json(stdout: &str) -> Result<Vec<WorkflowParam>, ParserError> {
    let start = stdout
        .find('{')
        .ok_or_else(|| ParserError::Parse("no JSON object in tool output".to_string()))?;
    let end = stdout
        .rfind('}')
        .ok_or_else(|| ParserError::Parse("unterminated JSON object in tool output".to_string()))?;

    let map: BTreeMap<String, String> = serde_json::from_str(&stdout[start..=end])
        .map_err(|e| ParserError::Parse(format!("invalid parameter JSON: {e}")))?;

    let params = map
        .into_iter()
        .map(|(name, encoded)| {
            let decoded = param_encoding::decode(&encoded);
            WorkflowParam {
                name,
                param_type: decoded.param_type,
                optional: decoded.optional,
                default: decoded.default,
            }
        })
        .collect();
    Ok(sort_params(params))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
