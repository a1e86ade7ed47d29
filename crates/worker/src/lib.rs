//! Flowhub ingestion worker.
//!
//! Consumes `workflow.version.added` events and drives each new workflow
//! version through the ingestion pipeline: resolve source → detect
//! dialect → validate and snapshot files → extract parameters → render
//! graph → persist the terminal status.

pub mod config;
pub mod git;
pub mod ingest;

pub use config::WorkerConfig;
pub use git::{CliGitCloner, GitCloner, GitError};
pub use ingest::{IngestError, VersionIngestor};
