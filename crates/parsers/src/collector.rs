//! File collection: snapshot every file a workflow definition needs.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flowhub_core::WorkflowVersion;

use crate::error::ParserError;

/// Read each manifest path under `base_dir`, base64-encode its bytes, and
/// upsert a file snapshot into `version`.
///
/// Snapshots are keyed by path, so re-collection across ingestion attempts
/// replaces content instead of duplicating entries. Any read failure is
/// fatal to the enclosing validation step.
pub async fn collect_files(
    base_dir: &Path,
    manifest: &[String],
    version: &mut WorkflowVersion,
) -> Result<(), ParserError> {
    for rel in manifest {
        let abs = base_dir.join(rel);
        let bytes = tokio::fs::read(&abs).await.map_err(|e| {
            tracing::error!(path = %abs.display(), error = %e, "Failed to read workflow file");
            ParserError::Io(e)
        })?;
        version.upsert_file(rel.clone(), BASE64.encode(&bytes));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
