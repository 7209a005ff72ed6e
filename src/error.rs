use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure that aborts the analysis of one ecosystem.
///
/// None of these are fatal to the whole scan: `main` records the ecosystem as
/// failed and moves on to the next one.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("`{tool}` could not be started: {source}")]
    ToolUnavailable {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{tool}` did not finish within {}s", .timeout.as_secs())]
    ToolTimeout { tool: String, timeout: Duration },

    #[error("`{tool}` exited with status {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: i32,
        stderr: String,
    },

    #[error("`{tool}` produced no output")]
    EmptyOutput { tool: String },

    #[error("required manifest not found: {}", .path.display())]
    ManifestMissing { path: PathBuf },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {context}: {message}")]
    Parse { context: String, message: String },
}

impl ScanError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScanError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ScanError::Parse {
            context: context.into(),
            message: err.to_string(),
        }
    }
}

pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Read a file, attaching its path to the error.
pub fn read_to_string(path: &std::path::Path) -> ScanResult<String> {
    std::fs::read_to_string(path).map_err(|e| ScanError::io(path, e))
}
