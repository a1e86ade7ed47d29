//! CWL parser backed by the Python workflow toolchain (cwltool).
//!
//! Tool protocol:
//! - `--validate <main>`: the last-but-one output line contains
//!   `is valid CWL` on success.
//! - `--print-deps <main>`: JSON-ish dump mined for `"location": "…"`
//!   pairs (full structured parsing is deliberately skipped).
//! - `--print-rdf <main>`: RDF dump mined for `cwl:inputs` /
//!   `cwl:outputs` node lists and per-node parameter sections.
//! - `--print-dot <main>`: mined for a `digraph … { … }` block.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use flowhub_core::{WorkflowLanguage, WorkflowParam};
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::error::ParserError;
use crate::exec::{path_arg, ToolOutput, ToolRunner};
use crate::parser::{detect_by_line_pragma, sort_params, WorkflowParser, GRAPH_UNAVAILABLE};

/// Dialect reported when the main file carries no `cwlVersion` pragma.
pub const DEFAULT_CWL_VERSION: &str = "v1.0";

/// Substring present in a successful `--validate` transcript.
const VALID_MARKER: &str = "is valid CWL";

/// Token marking a nullable (optional) parameter type in the RDF dump.
const NULLABLE_MARKER: &str = "sld:null";

static VERSION_PRAGMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^cwlVersion\s*:\s*"?([^"\s]+)"?"#).expect("valid regex"));

static LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""location":\s*"([^"]+)""#).expect("valid regex"));

static INPUTS_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"cwl:inputs\s+\(([^)]*)\)").expect("valid regex"));

static OUTPUTS_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"cwl:outputs\s+\(([^)]*)\)").expect("valid regex"));

static TYPE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"sld:type\s+(\[\s*a\s+\S+|\S+)").expect("valid regex"));

static DEFAULT_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"cwl:default\s+("[^"]*"|\S+)"#).expect("valid regex"));

static DIGRAPH_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)digraph[^{]*\{.*\}").expect("valid regex"));

/// Which parameter set to mine from the RDF dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamDirection {
    Inputs,
    Outputs,
}

/// Parser for CWL workflow definitions.
pub struct CwlParser {
    tool_path: String,
    timeout: Duration,
    runner: Arc<dyn ToolRunner>,
}

impl CwlParser {
    pub fn new(tool_path: String, timeout: Duration, runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            tool_path,
            timeout,
            runner,
        }
    }

    async fn run_tool(
        &self,
        cancel: &CancellationToken,
        cwd: &Path,
        flag: &str,
        main_file: &Path,
    ) -> Result<ToolOutput, ParserError> {
        let args = vec![flag.to_string(), path_arg(main_file)];
        Ok(self
            .runner
            .run(cancel, Some(cwd), self.timeout, &self.tool_path, &args)
            .await?)
    }

    async fn rdf_params(
        &self,
        cancel: &CancellationToken,
        main_file: &Path,
        direction: ParamDirection,
    ) -> Result<Vec<WorkflowParam>, ParserError> {
        let cwd = main_file.parent().unwrap_or_else(|| Path::new("."));
        let out = self
            .run_tool(cancel, cwd, "--print-rdf", main_file)
            .await?;
        if !out.success() {
            return Err(ParserError::Invalid(out.combined()));
        }
        Ok(parse_rdf_params(&out.stdout, direction))
    }
}

#[async_trait::async_trait]
impl WorkflowParser for CwlParser {
    fn language(&self) -> WorkflowLanguage {
        WorkflowLanguage::Cwl
    }

    async fn parse_workflow_version(
        &self,
        _cancel: &CancellationToken,
        main_file: &Path,
    ) -> Result<String, ParserError> {
        detect_by_line_pragma(main_file, &VERSION_PRAGMA, DEFAULT_CWL_VERSION).await
    }

    async fn validate_workflow_files(
        &self,
        cancel: &CancellationToken,
        base_dir: &Path,
        main_path: &str,
    ) -> Result<Vec<String>, ParserError> {
        let main_file = base_dir.join(main_path);

        let out = self
            .run_tool(cancel, base_dir, "--validate", &main_file)
            .await?;
        if !transcript_reports_valid(&out.combined()) {
            return Err(ParserError::Invalid(out.combined()));
        }

        let deps_out = self
            .run_tool(cancel, base_dir, "--print-deps", &main_file)
            .await?;
        if !deps_out.success() {
            return Err(ParserError::Invalid(deps_out.combined()));
        }

        let main_dir = main_file.parent().unwrap_or(base_dir);
        let mut manifest = discover_dependencies(&deps_out.combined(), main_dir, base_dir);
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
        self.rdf_params(cancel, main_file, ParamDirection::Inputs)
            .await
    }

    async fn get_workflow_outputs(
        &self,
        cancel: &CancellationToken,
        main_file: &Path,
    ) -> Result<Vec<WorkflowParam>, ParserError> {
        self.rdf_params(cancel, main_file, ParamDirection::Outputs)
            .await
    }

    async fn get_workflow_graph(
        &self,
        cancel: &CancellationToken,
        main_file: &Path,
    ) -> Result<String, ParserError> {
        let cwd = main_file.parent().unwrap_or_else(|| Path::new("."));
        match self.run_tool(cancel, cwd, "--print-dot", main_file).await {
            Ok(out) if out.success() => Ok(extract_digraph(&out.stdout)
                .unwrap_or_else(|| GRAPH_UNAVAILABLE.to_string())),
            Ok(out) => {
                tracing::warn!(
                    exit_code = out.exit_code,
                    "cwltool --print-dot failed, substituting placeholder"
                );
                Ok(GRAPH_UNAVAILABLE.to_string())
            }
            Err(e @ ParserError::Exec(crate::exec::ExecError::Cancelled)) => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "cwltool --print-dot errored, substituting placeholder");
                Ok(GRAPH_UNAVAILABLE.to_string())
            }
        }
    }
}

/// Whether a `--validate` transcript reports success.
///
/// cwltool prints the verdict on the last-but-one line (the final line is
/// empty because the transcript ends with a newline).
fn transcript_reports_valid(output: &str) -> bool {
    let lines: Vec<&str> = output.split('\n').collect();
    if lines.len() < 2 {
        return false;
    }
    lines[lines.len() - 2].contains(VALID_MARKER)
}

/// Mine `"location": "…"` pairs from a `--print-deps` dump and resolve
/// them to existing files relative to `base_dir`.
fn discover_dependencies(output: &str, main_dir: &Path, base_dir: &Path) -> Vec<String> {
    let mut seen: BTreeSet<String> = BTreeSet::new();

    for caps in LOCATION.captures_iter(output) {
        let loc = caps[1].trim_start_matches("file://");
        let abs = if Path::new(loc).is_absolute() {
            clean_path(Path::new(loc))
        } else {
            clean_path(&main_dir.join(loc))
        };
        if !abs.is_file() {
            continue;
        }
        if let Ok(rel) = abs.strip_prefix(base_dir) {
            seen.insert(rel.to_string_lossy().into_owned());
        }
    }

    seen.into_iter().collect()
}

/// Lexically normalize a path (drop `.`, resolve `..`).
fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

/// Extract the `digraph … { … }` block from a `--print-dot` dump.
fn extract_digraph(output: &str) -> Option<String> {
    DIGRAPH_BLOCK
        .find(output)
        .map(|m| m.as_str().trim().to_string())
}

/// Mine parameter declarations from a `--print-rdf` dump.
///
/// The dump lists the ordered parameter nodes in `cwl:inputs ( … )` /
/// `cwl:outputs ( … )` blocks and describes each node in its own
/// paragraph-like section separated by blank lines.
fn parse_rdf_params(rdf: &str, direction: ParamDirection) -> Vec<WorkflowParam> {
    let block_re = match direction {
        ParamDirection::Inputs => &INPUTS_BLOCK,
        ParamDirection::Outputs => &OUTPUTS_BLOCK,
    };

    let Some(block) = block_re.captures(rdf) else {
        return Vec::new();
    };
    let nodes: Vec<&str> = block[1].split_whitespace().collect();
    if nodes.is_empty() {
        return Vec::new();
    }

    let sections: Vec<&str> = rdf.split("\n\n").collect();

    let mut params = Vec::new();
    for node in nodes {
        let Some(section) = sections.iter().find(|s| s.trim_start().starts_with(node)) else {
            continue;
        };
        let Some(name) = short_param_name(node) else {
            continue;
        };

        let param_type = section_param_type(section);

        let (optional, default) = match direction {
            // Output defaults are not exposed meaningfully by the RDF
            // dump, and outputs are always nullable from the caller's
            // point of view.
            ParamDirection::Outputs => (true, None),
            ParamDirection::Inputs => {
                let optional = section.contains(NULLABLE_MARKER);
                let default = if param_type == "Record" {
                    None
                } else {
                    section_default(section)
                };
                (optional, default)
            }
        };

        params.push(WorkflowParam {
            name,
            param_type,
            optional,
            default,
        });
    }

    sort_params(params)
}

/// Short parameter name from a `…#name>` node token.
///
/// Some tool versions nest an extra path segment (`#main/name`), so
/// everything up to a trailing `/` is stripped.
fn short_param_name(node: &str) -> Option<String> {
    let hash = node.rfind('#')?;
    let after = &node[hash + 1..];
    let after = after.strip_suffix('>').unwrap_or(after);
    let name = match after.rfind('/') {
        Some(slash) => &after[slash + 1..],
        None => after,
    };
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Canonical type name for one parameter section.
///
/// Prefers the last `sld:type` match; a `[` in the matched token marks a
/// container schema (Array/Enum/Record).
fn section_param_type(section: &str) -> String {
    let Some(token) = TYPE_TOKEN
        .captures_iter(section)
        .last()
        .map(|caps| caps[1].to_string())
    else {
        return String::new();
    };

    if token.contains('[') {
        if token.contains("Enum") {
            return "Enum".to_string();
        }
        if token.contains("Record") {
            return "Record".to_string();
        }
        return "Array".to_string();
    }

    // Plain token like `xsd:string` or `cwl:File`: keep the local part and
    // capitalize the first letter.
    let local = token
        .rsplit(|c| c == ':' || c == '#')
        .next()
        .unwrap_or(&token)
        .trim_matches(|c| c == ';' || c == '.' || c == ',' || c == '"');
    capitalize(local)
}

/// Default value for one parameter section, if declared.
fn section_default(section: &str) -> Option<String> {
    let caps = DEFAULT_TOKEN.captures(section)?;
    let raw = caps[1].trim_matches(|c| c == ';' || c == ',');
    Some(raw.trim_matches('"').to_string())
}

fn capitalize(s: &str) -> String {
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
    use super::*;

    const RDF_FIXTURE: &str = r#"@prefix cwl: <https://w3id.org/cwl/cwl#> .
@prefix sld: <https://w3id.org/cwl/salad#> .

<file:///ws/echo.cwl> a cwl:Workflow ;
    cwl:inputs ( <file:///ws/echo.cwl#message> <file:///ws/echo.cwl#main/count> <file:///ws/echo.cwl#samples> ) ;
    cwl:outputs ( <file:///ws/echo.cwl#result> ) .

<file:///ws/echo.cwl#message> a cwl:WorkflowInputParameter ;
    sld:type xsd:string ;
    cwl:default "hello" .

<file:///ws/echo.cwl#main/count> a cwl:WorkflowInputParameter ;
    sld:null "true" ;
    sld:type xsd:int .

<file:///ws/echo.cwl#samples> a cwl:WorkflowInputParameter ;
    sld:type [ a sld:ArraySchema ;
            sld:items cwl:File ] .

<file:///ws/echo.cwl#result> a cwl:WorkflowOutputParameter ;
    sld:type cwl:File .
"#;

    #[tokio::test]
    async fn detects_cwl_version_pragma() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("wf.cwl");
        std::fs::write(&main, "cwlVersion: v1.2\nclass: Workflow\n").unwrap();
        let detected = detect_by_line_pragma(&main, &VERSION_PRAGMA, DEFAULT_CWL_VERSION)
            .await
            .unwrap();
        assert_eq!(detected, "v1.2");
    }

    #[tokio::test]
    async fn missing_cwl_version_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("wf.cwl");
        std::fs::write(&main, "class: Workflow\n").unwrap();
        let detected = detect_by_line_pragma(&main, &VERSION_PRAGMA, DEFAULT_CWL_VERSION)
            .await
            .unwrap();
        assert_eq!(detected, DEFAULT_CWL_VERSION);
    }

    #[test]
    fn valid_transcript_is_detected_on_last_but_one_line() {
        let transcript = "INFO resolving wf.cwl\nwf.cwl is valid CWL.\n";
        assert!(transcript_reports_valid(transcript));

        let bad = "ERROR wf.cwl:3:1: invalid field\n";
        assert!(!transcript_reports_valid(bad));
    }

    #[test]
    fn rdf_inputs_are_mined_named_and_sorted() {
        let params = parse_rdf_params(RDF_FIXTURE, ParamDirection::Inputs);
        assert_eq!(params.len(), 3);

        // Sorted lexicographically: count, message, samples.
        assert_eq!(params[0].name, "count");
        assert_eq!(params[0].param_type, "Int");
        assert!(params[0].optional, "nullable marker implies optional");
        assert_eq!(params[0].default, None);

        assert_eq!(params[1].name, "message");
        assert_eq!(params[1].param_type, "String");
        assert!(!params[1].optional);
        assert_eq!(params[1].default.as_deref(), Some("hello"));

        assert_eq!(params[2].name, "samples");
        assert_eq!(params[2].param_type, "Array");
        assert!(!params[2].optional);
    }

    #[test]
    fn rdf_outputs_are_always_optional_without_defaults() {
        let params = parse_rdf_params(RDF_FIXTURE, ParamDirection::Outputs);
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "result");
        assert_eq!(params[0].param_type, "File");
        assert!(params[0].optional);
        assert_eq!(params[0].default, None);
    }

    #[test]
    fn nested_name_segment_is_stripped() {
        assert_eq!(
            short_param_name("<file:///ws/echo.cwl#main/count>"),
            Some("count".to_string())
        );
        assert_eq!(
            short_param_name("<file:///ws/echo.cwl#plain>"),
            Some("plain".to_string())
        );
        assert_eq!(short_param_name("<file:///ws/echo.cwl>"), None);
    }

    #[test]
    fn container_type_prefers_last_match_and_keyword() {
        let record = "sld:type [ a sld:RecordSchema ; sld:fields () ]";
        assert_eq!(section_param_type(record), "Record");
        let enum_ = "sld:type [ a sld:EnumSchema ; sld:symbols () ]";
        assert_eq!(section_param_type(enum_), "Enum");
    }

    #[test]
    fn deps_are_resolved_deduped_and_filtered_to_existing() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        std::fs::write(base.join("wf.cwl"), "cwlVersion: v1.2\n").unwrap();
        std::fs::create_dir(base.join("tools")).unwrap();
        std::fs::write(base.join("tools/echo.cwl"), "class: CommandLineTool\n").unwrap();

        let dump = format!(
            r#"{{"location": "file://{base}/wf.cwl",
                "secondaryFiles": [
                  {{"location": "tools/echo.cwl"}},
                  {{"location": "./tools/../tools/echo.cwl"}},
                  {{"location": "missing.cwl"}}
                ]}}"#,
            base = base.display()
        );

        let deps = discover_dependencies(&dump, base, base);
        assert_eq!(
            deps,
            vec!["tools/echo.cwl".to_string(), "wf.cwl".to_string()]
        );
    }

    #[test]
    fn digraph_block_is_extracted_or_placeholder_applies() {
        let dot = "INFO rendering\ndigraph G {\n  a -> b;\n}\ntrailing";
        let got = extract_digraph(dot).unwrap();
        assert!(got.starts_with("digraph G {"));
        assert!(got.ends_with('}'));

        assert_eq!(extract_digraph("no graph here"), None);
    }

    fn parser_with(runner: crate::exec::testing::ScriptedRunner) -> CwlParser {
        CwlParser::new("cwltool".to_string(), Duration::from_secs(1), Arc::new(runner))
    }

    #[tokio::test]
    async fn graph_failure_substitutes_placeholder() {
        let parser = parser_with(crate::exec::testing::ScriptedRunner::failing(
            "Traceback (most recent call last): boom",
        ));
        let graph = parser
            .get_workflow_graph(&CancellationToken::new(), Path::new("/work/wf.cwl"))
            .await
            .unwrap();
        assert_eq!(graph, GRAPH_UNAVAILABLE);
    }

    #[tokio::test]
    async fn graph_spawn_error_substitutes_placeholder() {
        let parser = parser_with(crate::exec::testing::ScriptedRunner::new(vec![Err(
            crate::exec::ExecError::Spawn {
                program: "cwltool".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            },
        )]));
        let graph = parser
            .get_workflow_graph(&CancellationToken::new(), Path::new("/work/wf.cwl"))
            .await
            .unwrap();
        assert_eq!(graph, GRAPH_UNAVAILABLE);
    }
}
