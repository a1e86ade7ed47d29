//! Worker configuration loaded from environment variables.

use std::time::Duration;

use flowhub_parsers::{ParserConfig, COMMAND_EXECUTE_TIMEOUT};

/// Worker configuration.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Postgres connection string.
    pub database_url: String,
    /// Path to the WDL toolchain binary (default: `womtool`).
    pub womtool_path: String,
    /// Path to the CWL toolchain binary (default: `cwltool`).
    pub cwltool_path: String,
    /// Path to the Nextflow engine binary (default: `nextflow`).
    pub nextflow_path: String,
    /// Wall-clock limit per external tool invocation (default: 180s).
    pub command_timeout_secs: u64,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                                   |
    /// |------------------------|-------------------------------------------|
    /// | `DATABASE_URL`         | `postgres://localhost:5432/flowhub`       |
    /// | `WOMTOOL_PATH`         | `womtool`                                 |
    /// | `CWLTOOL_PATH`         | `cwltool`                                 |
    /// | `NEXTFLOW_PATH`        | `nextflow`                                |
    /// | `COMMAND_TIMEOUT_SECS` | `180`                                     |
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost:5432/flowhub".into());

        let womtool_path = std::env::var("WOMTOOL_PATH").unwrap_or_else(|_| "womtool".into());
        let cwltool_path = std::env::var("CWLTOOL_PATH").unwrap_or_else(|_| "cwltool".into());
        let nextflow_path = std::env::var("NEXTFLOW_PATH").unwrap_or_else(|_| "nextflow".into());

        let command_timeout_secs: u64 = std::env::var("COMMAND_TIMEOUT_SECS")
            .unwrap_or_else(|_| COMMAND_EXECUTE_TIMEOUT.as_secs().to_string())
            .parse()
            .expect("COMMAND_TIMEOUT_SECS must be a valid u64");

        Self {
            database_url,
            womtool_path,
            cwltool_path,
            nextflow_path,
            command_timeout_secs,
        }
    }

    /// Tool timeout as a [`Duration`].
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Parser configuration derived from the tool paths.
    pub fn parser_config(&self) -> ParserConfig {
        ParserConfig {
            womtool_path: self.womtool_path.clone(),
            cwltool_path: self.cwltool_path.clone(),
            nextflow_path: self.nextflow_path.clone(),
            command_timeout: self.command_timeout(),
        }
    }
}
