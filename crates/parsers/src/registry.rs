//! Parser registry: language tag → configured parser instance.
//!
//! Built once at process wiring time and passed into the ingestion
//! orchestrator as an explicit dependency, so a misconfigured tool path is
//! caught before any ingestion traffic arrives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use flowhub_core::WorkflowLanguage;

use crate::cwl::CwlParser;
use crate::exec::ToolRunner;
use crate::nextflow::NextflowParser;
use crate::parser::WorkflowParser;
use crate::wdl::WdlParser;

/// Hard timeout for every external tool invocation (3 minutes).
pub const COMMAND_EXECUTE_TIMEOUT: Duration = Duration::from_secs(180);

/// Tool-path configuration for the language parsers.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Path to the WDL toolchain binary (womtool launcher).
    pub womtool_path: String,
    /// Path to the CWL toolchain binary (cwltool).
    pub cwltool_path: String,
    /// Path to the Nextflow engine binary.
    pub nextflow_path: String,
    /// Wall-clock limit per tool invocation.
    pub command_timeout: Duration,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            womtool_path: "womtool".to_string(),
            cwltool_path: "cwltool".to_string(),
            nextflow_path: "nextflow".to_string(),
            command_timeout: COMMAND_EXECUTE_TIMEOUT,
        }
    }
}

/// Configuration errors raised while building or querying the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool path for {language} is not configured")]
    MissingToolPath { language: WorkflowLanguage },

    #[error("no parser registered for language {language}")]
    Unregistered { language: WorkflowLanguage },
}

/// Write-once mapping from a workflow language to its parser.
#[derive(Debug)]
pub struct ParserRegistry {
    parsers: HashMap<WorkflowLanguage, Arc<dyn WorkflowParser>>,
}

impl ParserRegistry {
    /// Build the registry with one parser per supported language.
    ///
    /// Fails fast on an empty tool path; `Snakemake` is reserved and gets
    /// no parser.
    pub fn build(
        config: &ParserConfig,
        runner: Arc<dyn ToolRunner>,
    ) -> Result<Self, RegistryError> {
        for (language, path) in [
            (WorkflowLanguage::Wdl, &config.womtool_path),
            (WorkflowLanguage::Cwl, &config.cwltool_path),
            (WorkflowLanguage::Nextflow, &config.nextflow_path),
        ] {
            if path.trim().is_empty() {
                return Err(RegistryError::MissingToolPath { language });
            }
        }

        let mut parsers: HashMap<WorkflowLanguage, Arc<dyn WorkflowParser>> = HashMap::new();
        parsers.insert(
            WorkflowLanguage::Wdl,
            Arc::new(WdlParser::new(
                config.womtool_path.clone(),
                config.command_timeout,
                Arc::clone(&runner),
            )),
        );
        parsers.insert(
            WorkflowLanguage::Cwl,
            Arc::new(CwlParser::new(
                config.cwltool_path.clone(),
                config.command_timeout,
                Arc::clone(&runner),
            )),
        );
        parsers.insert(
            WorkflowLanguage::Nextflow,
            Arc::new(NextflowParser::new(
                config.nextflow_path.clone(),
                config.command_timeout,
                runner,
            )),
        );

        Ok(Self { parsers })
    }

    /// Build a registry from explicit entries (test seam).
    pub fn from_parsers(
        parsers: HashMap<WorkflowLanguage, Arc<dyn WorkflowParser>>,
    ) -> Self {
        Self { parsers }
    }

    /// Look up the parser for `language`.
    pub fn get(
        &self,
        language: WorkflowLanguage,
    ) -> Result<Arc<dyn WorkflowParser>, RegistryError> {
        self.parsers
            .get(&language)
            .cloned()
            .ok_or(RegistryError::Unregistered { language })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::exec::SubprocessRunner;

    use super::*;

    #[test]
    fn build_registers_the_three_supported_languages() {
        let registry =
            ParserRegistry::build(&ParserConfig::default(), Arc::new(SubprocessRunner))
                .expect("default config should build");

        for language in [
            WorkflowLanguage::Wdl,
            WorkflowLanguage::Cwl,
            WorkflowLanguage::Nextflow,
        ] {
            assert_eq!(registry.get(language).unwrap().language(), language);
        }
    }

    #[test]
    fn empty_tool_path_fails_at_build_time() {
        let config = ParserConfig {
            cwltool_path: "  ".to_string(),
            ..ParserConfig::default()
        };
        let err = ParserRegistry::build(&config, Arc::new(SubprocessRunner))
            .expect_err("blank tool path must fail");
        assert_matches!(
            err,
            RegistryError::MissingToolPath {
                language: WorkflowLanguage::Cwl
            }
        );
    }

    #[test]
    fn reserved_language_is_unregistered() {
        let registry =
            ParserRegistry::build(&ParserConfig::default(), Arc::new(SubprocessRunner)).unwrap();
        let err = registry
            .get(WorkflowLanguage::Snakemake)
            .expect_err("snakemake is reserved");
        assert_matches!(
            err,
            RegistryError::Unregistered {
                language: WorkflowLanguage::Snakemake
            }
        );
    }
}
