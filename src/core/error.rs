use std::io;
use thiserror::Error;

/// Failures that stop verification before it can begin.
///
/// Malformed artifacts are never errors: the engines classify them as
/// violations. This enum covers only the caller-side I/O and decode layer.
#[derive(Error, Debug)]
pub enum VerdictError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}
