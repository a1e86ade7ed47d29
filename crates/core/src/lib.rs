//! Flowhub domain core.
//!
//! This crate holds the workflow aggregate (workflows, versions, files,
//! parameters), the version ingestion status state machine, and the
//! parameter-encoding decoder shared by the language parsers. It has no
//! I/O — persistence, tool execution, and event transport live in the
//! sibling crates.

pub mod error;
pub mod param_encoding;
pub mod types;
pub mod workflow;

pub use error::CoreError;
pub use workflow::{
    Workflow, WorkflowFile, WorkflowLanguage, WorkflowParam, WorkflowSource, WorkflowVersion,
    WorkflowVersionStatus,
};
