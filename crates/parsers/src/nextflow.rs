//! Nextflow parser backed by the workflow engine's own CLI.
//!
//! Tool protocol:
//! - validation runs the engine in preview mode with DAG export enabled,
//!   writing an HTML artifact next to the main file;
//! - parameters come from the `nextflow_schema.json` companion document
//!   (a JSON Schema dialect), not from the engine;
//! - the graph is the text of the first `mermaid`-classed element in the
//!   previously written DAG HTML.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use flowhub_core::{WorkflowLanguage, WorkflowParam};
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::ParserError;
use crate::exec::{path_arg, ToolRunner};
use crate::parser::{sort_params, WorkflowParser, GRAPH_UNAVAILABLE};

/// Dialect reported when the main file carries no DSL pragma.
pub const DEFAULT_NEXTFLOW_DSL: &str = "DSL2";

/// Required companion files in the base directory.
pub const SCHEMA_FILE_NAME: &str = "nextflow_schema.json";
pub const CONFIG_FILE_NAME: &str = "nextflow.config";

/// Name of the DAG HTML artifact written during validation.
pub const DAG_FILE_NAME: &str = "dag.html";

static DSL_PRAGMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"nextflow\.enable\.dsl\s*=\s*(\d+)").expect("valid regex"));

static MERMAID_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<\w+[^>]*class="[^"]*mermaid[^"]*"[^>]*>(.*?)</"#).expect("valid regex")
});

/// Parser for Nextflow workflow definitions.
pub struct NextflowParser {
    tool_path: String,
    timeout: Duration,
    runner: Arc<dyn ToolRunner>,
}

impl NextflowParser {
    pub fn new(tool_path: String, timeout: Duration, runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            tool_path,
            timeout,
            runner,
        }
    }

    /// Read and split the schema document next to the main file.
    async fn schema_params(
        &self,
        main_file: &Path,
    ) -> Result<(Vec<WorkflowParam>, Vec<WorkflowParam>), ParserError> {
        let base_dir = main_file.parent().unwrap_or_else(|| Path::new("."));
        let schema_path = base_dir.join(SCHEMA_FILE_NAME);
        if !schema_path.is_file() {
            return Err(ParserError::MissingFile(SCHEMA_FILE_NAME.to_string()));
        }
        let text = tokio::fs::read_to_string(&schema_path).await?;
        parse_schema_params(&text)
    }
}

#[async_trait::async_trait]
impl WorkflowParser for NextflowParser {
    fn language(&self) -> WorkflowLanguage {
        WorkflowLanguage::Nextflow
    }

    async fn parse_workflow_version(
        &self,
        _cancel: &CancellationToken,
        main_file: &Path,
    ) -> Result<String, ParserError> {
        let content = tokio::fs::read_to_string(main_file).await?;
        detect_dsl(&content)
    }

    async fn validate_workflow_files(
        &self,
        cancel: &CancellationToken,
        base_dir: &Path,
        main_path: &str,
    ) -> Result<Vec<String>, ParserError> {
        // Companion files are required before the engine is even invoked.
        for required in [SCHEMA_FILE_NAME, CONFIG_FILE_NAME] {
            if !base_dir.join(required).is_file() {
                return Err(ParserError::MissingFile(required.to_string()));
            }
        }

        // The DAG artifact must land next to the main file, where
        // `get_workflow_graph` later reads it; a bare file name would
        // land in the run's cwd instead.
        let main_file = base_dir.join(main_path);
        let dag_path = main_file
            .parent()
            .unwrap_or(base_dir)
            .join(DAG_FILE_NAME);
        let args = vec![
            "run".to_string(),
            path_arg(&main_file),
            "-preview".to_string(),
            "-with-dag".to_string(),
            path_arg(&dag_path),
        ];
        let out = self
            .runner
            .run(cancel, Some(base_dir), self.timeout, &self.tool_path, &args)
            .await?;
        if !out.success() {
            return Err(ParserError::Invalid(out.combined()));
        }

        let mut manifest = vec![SCHEMA_FILE_NAME.to_string(), CONFIG_FILE_NAME.to_string()];
        manifest.extend(find_nf_files(base_dir, base_dir)?);
        Ok(manifest)
    }

    async fn get_workflow_inputs(
        &self,
        _cancel: &CancellationToken,
        main_file: &Path,
    ) -> Result<Vec<WorkflowParam>, ParserError> {
        let (inputs, _outputs) = self.schema_params(main_file).await?;
        Ok(inputs)
    }

    async fn get_workflow_outputs(
        &self,
        _cancel: &CancellationToken,
        main_file: &Path,
    ) -> Result<Vec<WorkflowParam>, ParserError> {
        let (_inputs, outputs) = self.schema_params(main_file).await?;
        Ok(outputs)
    }

    async fn get_workflow_graph(
        &self,
        _cancel: &CancellationToken,
        main_file: &Path,
    ) -> Result<String, ParserError> {
        let base_dir = main_file.parent().unwrap_or_else(|| Path::new("."));
        let dag_path = base_dir.join(DAG_FILE_NAME);

        match tokio::fs::read_to_string(&dag_path).await {
            Ok(html) => Ok(extract_mermaid(&html).unwrap_or_else(|| {
                tracing::warn!(path = %dag_path.display(), "No mermaid element in DAG artifact");
                GRAPH_UNAVAILABLE.to_string()
            })),
            Err(e) => {
                tracing::warn!(error = %e, "DAG artifact unreadable, substituting placeholder");
                Ok(GRAPH_UNAVAILABLE.to_string())
            }
        }
    }
}

/// Detect the DSL dialect from the main file content.
///
/// A well-formed pragma yields `DSL<digit>`; no pragma yields the default.
/// A pragma line whose value is not a digit token is the one malformed
/// shape that fails dialect detection.
fn detect_dsl(content: &str) -> Result<String, ParserError> {
    for line in content.lines() {
        if !line.contains("nextflow.enable.dsl") {
            continue;
        }
        return match DSL_PRAGMA.captures(line) {
            Some(caps) => Ok(format!("DSL{}", &caps[1])),
            None => Err(ParserError::MalformedDialect(line.trim().to_string())),
        };
    }
    Ok(DEFAULT_NEXTFLOW_DSL.to_string())
}

/// Recursively list `*.nf` files under `dir`, as paths relative to `base`.
///
/// The walk is multi-level; single-level is all most pipelines need, but
/// module layouts nest `modules/<name>/main.nf`.
fn find_nf_files(dir: &Path, base: &Path) -> Result<Vec<String>, ParserError> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            found.extend(find_nf_files(&path, base)?);
        } else if path.extension().is_some_and(|ext| ext == "nf") {
            if let Ok(rel) = path.strip_prefix(base) {
                found.push(rel.to_string_lossy().into_owned());
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Text of the first element carrying a `mermaid` class.
fn extract_mermaid(html: &str) -> Option<String> {
    MERMAID_ELEMENT
        .captures(html)
        .map(|caps| caps[1].trim().to_string())
        .filter(|text| !text.is_empty())
}

// ---------------------------------------------------------------------------
// Schema document
// ---------------------------------------------------------------------------

/// `nextflow_schema.json` root (JSON Schema dialect).
#[derive(Debug, Deserialize)]
struct NextflowSchema {
    #[serde(default)]
    definitions: BTreeMap<String, SchemaDefinition>,
}

#[derive(Debug, Deserialize)]
struct SchemaDefinition {
    #[serde(default)]
    required: Vec<String>,
    #[serde(default)]
    properties: BTreeMap<String, SchemaProperty>,
}

#[derive(Debug, Deserialize)]
struct SchemaProperty {
    #[serde(rename = "type", default)]
    prop_type: String,
    /// Marks the property as an output parameter.
    #[serde(default)]
    out: bool,
    #[serde(default, alias = "MIMEType")]
    mimetype: Option<String>,
    #[serde(default)]
    default: Option<serde_json::Value>,
}

/// Convert the schema document into (inputs, outputs) parameter lists.
fn parse_schema_params(
    text: &str,
) -> Result<(Vec<WorkflowParam>, Vec<WorkflowParam>), ParserError> {
    let schema: NextflowSchema = serde_json::from_str(text)
        .map_err(|e| ParserError::Parse(format!("invalid {SCHEMA_FILE_NAME}: {e}")))?;

    let mut inputs = Vec::new();
    let mut outputs = Vec::new();

    for definition in schema.definitions.values() {
        for (name, prop) in &definition.properties {
            let optional = !definition.required.iter().any(|r| r == name);

            let param_type = if prop.mimetype.as_deref().is_some_and(|m| !m.is_empty()) {
                "File".to_string()
            } else {
                title_case(&prop.prop_type)
            };

            // Defaults are only captured for required properties with a
            // concrete (non-null) schema default.
            let default = if optional {
                None
            } else {
                prop.default
                    .as_ref()
                    .filter(|v| !v.is_null())
                    .map(|v| format_schema_default(&prop.prop_type, v))
            };

            let param = WorkflowParam {
                name: name.clone(),
                param_type,
                optional,
                default,
            };
            if prop.out {
                outputs.push(param);
            } else {
                inputs.push(param);
            }
        }
    }

    Ok((sort_params(inputs), sort_params(outputs)))
}

/// Render a schema default according to the declared primitive type.
fn format_schema_default(prop_type: &str, value: &serde_json::Value) -> String {
    match prop_type {
        "boolean" => value.as_bool().map(|b| b.to_string()),
        "number" => value.as_f64().map(|f| format!("{f:.10}")),
        "integer" => value.as_i64().map(|i| i.to_string()),
        "string" => value.as_str().map(str::to_string),
        _ => None,
    }
    .unwrap_or_else(|| value.to_string())
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const SCHEMA_FIXTURE: &str = r#"{
        "definitions": {
            "io_options": {
                "required": ["reads", "threshold"],
                "properties": {
                    "reads": {
                        "type": "string",
                        "mimetype": "text/fastq",
                        "default": "reads.fq"
                    },
                    "threshold": {
                        "type": "number",
                        "default": 0.5
                    },
                    "report": {
                        "type": "string",
                        "out": true
                    }
                }
            },
            "tuning": {
                "required": ["iterations"],
                "properties": {
                    "iterations": {
                        "type": "integer",
                        "default": 4
                    },
                    "verbose": {
                        "type": "boolean",
                        "default": true
                    }
                }
            }
        }
    }"#;

    #[test]
    fn detects_dsl_digit() {
        assert_eq!(detect_dsl("nextflow.enable.dsl = 2\n").unwrap(), "DSL2");
        assert_eq!(detect_dsl("nextflow.enable.dsl=1\n").unwrap(), "DSL1");
    }

    #[test]
    fn missing_pragma_defaults_to_dsl2() {
        assert_eq!(
            detect_dsl("workflow { main: true }\n").unwrap(),
            DEFAULT_NEXTFLOW_DSL
        );
    }

    #[test]
    fn malformed_pragma_is_an_error() {
        let err = detect_dsl("nextflow.enable.dsl = x2\n").unwrap_err();
        assert_matches!(err, ParserError::MalformedDialect(line) if line.contains("x2"));
    }

    #[test]
    fn schema_splits_inputs_and_outputs() {
        let (inputs, outputs) = parse_schema_params(SCHEMA_FIXTURE).unwrap();

        let names: Vec<&str> = inputs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["iterations", "reads", "threshold", "verbose"]);

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].name, "report");
        assert!(outputs[0].optional, "not in required list");
    }

    #[test]
    fn mimetype_overrides_type_to_file() {
        let (inputs, _) = parse_schema_params(SCHEMA_FIXTURE).unwrap();
        let reads = inputs.iter().find(|p| p.name == "reads").unwrap();
        assert_eq!(reads.param_type, "File");
        assert!(!reads.optional);
        assert_eq!(reads.default.as_deref(), Some("reads.fq"));
    }

    #[test]
    fn defaults_follow_declared_primitive_type() {
        let (inputs, _) = parse_schema_params(SCHEMA_FIXTURE).unwrap();

        let threshold = inputs.iter().find(|p| p.name == "threshold").unwrap();
        assert_eq!(threshold.param_type, "Number");
        assert_eq!(threshold.default.as_deref(), Some("0.5000000000"));

        let iterations = inputs.iter().find(|p| p.name == "iterations").unwrap();
        assert_eq!(iterations.default.as_deref(), Some("4"));

        // `verbose` is optional (not required), so no default is captured.
        let verbose = inputs.iter().find(|p| p.name == "verbose").unwrap();
        assert!(verbose.optional);
        assert_eq!(verbose.default, None);
        assert_eq!(verbose.param_type, "Boolean");
    }

    #[test]
    fn mermaid_element_text_is_extracted() {
        let html = r#"<html><body>
            <pre class="mermaid" id="graph">
            flowchart TB
            a --> b
            </pre>
        </body></html>"#;
        let text = extract_mermaid(html).unwrap();
        assert!(text.starts_with("flowchart TB"));
        assert!(text.contains("a --> b"));

        assert_eq!(extract_mermaid("<html><body>no dag</body></html>"), None);
    }

    #[test]
    fn nf_files_are_walked_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.nf"), "workflow {}\n").unwrap();
        std::fs::create_dir_all(dir.path().join("modules/align")).unwrap();
        std::fs::write(dir.path().join("modules/align/main.nf"), "process A {}\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "docs\n").unwrap();

        let files = find_nf_files(dir.path(), dir.path()).unwrap();
        assert_eq!(
            files,
            vec!["main.nf".to_string(), "modules/align/main.nf".to_string()]
        );
    }

    #[tokio::test]
    async fn missing_schema_is_a_domain_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.nf"), "workflow {}\n").unwrap();
        // nextflow.config present, schema missing.
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "process {}\n").unwrap();

        let parser = NextflowParser::new(
            "nextflow".to_string(),
            Duration::from_secs(1),
            Arc::new(crate::exec::SubprocessRunner),
        );
        let cancel = CancellationToken::new();
        let err = parser
            .validate_workflow_files(&cancel, dir.path(), "main.nf")
            .await
            .expect_err("schema is required");
        assert_matches!(err, ParserError::MissingFile(f) if f == SCHEMA_FILE_NAME);
    }

    #[tokio::test]
    async fn dag_artifact_is_requested_next_to_a_nested_main_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/main.nf"), "workflow {}\n").unwrap();
        std::fs::write(dir.path().join(SCHEMA_FILE_NAME), "{}").unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "process {}\n").unwrap();

        let runner = Arc::new(crate::exec::testing::ScriptedRunner::succeeding(""));
        let parser = NextflowParser::new(
            "nextflow".to_string(),
            Duration::from_secs(1),
            Arc::clone(&runner) as Arc<dyn crate::exec::ToolRunner>,
        );
        parser
            .validate_workflow_files(&CancellationToken::new(), dir.path(), "sub/main.nf")
            .await
            .unwrap();

        let invocations = runner.invocations.lock().unwrap();
        let dag_arg = invocations[0].last().unwrap().clone();
        assert_eq!(
            Path::new(&dag_arg),
            dir.path().join("sub").join(DAG_FILE_NAME)
        );
    }

    #[tokio::test]
    async fn graph_reads_dag_artifact_from_the_main_file_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        let main = dir.path().join("sub/main.nf");
        std::fs::write(&main, "workflow {}\n").unwrap();
        std::fs::write(
            dir.path().join("sub").join(DAG_FILE_NAME),
            "<pre class=\"mermaid\">\nflowchart TB\na --> b\n</pre>",
        )
        .unwrap();

        let parser = NextflowParser::new(
            "nextflow".to_string(),
            Duration::from_secs(1),
            Arc::new(crate::exec::SubprocessRunner),
        );
        let graph = parser
            .get_workflow_graph(&CancellationToken::new(), &main)
            .await
            .unwrap();
        assert!(graph.starts_with("flowchart TB"));
    }

    #[tokio::test]
    async fn missing_dag_artifact_yields_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.nf");
        std::fs::write(&main, "workflow {}\n").unwrap();

        let parser = NextflowParser::new(
            "nextflow".to_string(),
            Duration::from_secs(1),
            Arc::new(crate::exec::SubprocessRunner),
        );
        let graph = parser
            .get_workflow_graph(&CancellationToken::new(), &main)
            .await
            .unwrap();
        assert_eq!(graph, GRAPH_UNAVAILABLE);
    }
}
