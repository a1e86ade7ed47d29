//! Error taxonomy for toolchain integration.

/// Errors raised while driving a language toolchain.
///
/// `Invalid` and `MissingFile` are domain validation errors: the workflow
/// definition itself is wrong, and re-running without changing the source
/// will fail again. The remaining variants are infrastructure failures of
/// the current attempt.
#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    /// The toolchain reported a structurally invalid workflow. The tool's
    /// own diagnostic text is preserved verbatim.
    #[error("{0}")]
    Invalid(String),

    /// A required definition or companion file is missing.
    #[error("required file missing: {0}")]
    MissingFile(String),

    /// A dialect declaration is present but malformed.
    #[error("malformed dialect declaration: {0}")]
    MalformedDialect(String),

    /// The toolchain ran but its output could not be interpreted.
    #[error("failed to parse tool output: {0}")]
    Parse(String),

    /// Subprocess execution failed (spawn error, timeout, cancellation).
    #[error(transparent)]
    Exec(#[from] crate::exec::ExecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParserError {
    /// Whether this error is a domain validation failure (as opposed to a
    /// transient infrastructure failure).
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Self::Invalid(_) | Self::MissingFile(_) | Self::MalformedDialect(_)
        )
    }
}
