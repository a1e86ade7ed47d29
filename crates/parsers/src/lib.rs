//! Language-specific workflow definition parsers.
//!
//! Each supported workflow language (WDL, CWL, Nextflow) is backed by an
//! external toolchain driven as a subprocess. This crate normalizes the
//! three tool protocols behind one [`WorkflowParser`] contract:
//!
//! - detect the concrete dialect of a definition,
//! - validate structural correctness and report the dependent files,
//! - extract declared inputs and outputs as [`WorkflowParam`]s,
//! - render a dependency-graph document.
//!
//! Tool output scraping is deliberately confined to each parser module so
//! that a future structured-output tool version touches exactly one file.
//!
//! [`WorkflowParam`]: flowhub_core::WorkflowParam

pub mod collector;
pub mod cwl;
pub mod error;
pub mod exec;
pub mod nextflow;
pub mod parser;
pub mod registry;
pub mod wdl;

pub use collector::collect_files;
pub use error::ParserError;
pub use exec::{ExecError, SubprocessRunner, ToolOutput, ToolRunner};
pub use parser::{WorkflowParser, GRAPH_UNAVAILABLE};
pub use registry::{ParserConfig, ParserRegistry, RegistryError, COMMAND_EXECUTE_TIMEOUT};
