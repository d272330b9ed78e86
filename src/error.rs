use std::path::PathBuf;

use thiserror::Error;

/// Recoverable failures raised at component boundaries.
///
/// None of these are fatal: the controller turns each one into a single
/// status line and keeps running.
#[derive(Debug, Error)]
pub enum SkiffError {
    #[error("a port-forward already exists for {fqn}")]
    AlreadyExists { fqn: String },

    #[error("{target} is not runnable: {reason}")]
    InvalidState { target: String, reason: String },

    #[error("only one benchmark allowed at a time ({target} is running)")]
    AlreadyRunning { target: String },

    #[error("port-forward {fqn} failed: {message}")]
    TransportFailure { fqn: String, message: String },

    #[error("failed to load benchmark config {}: {message}", path.display())]
    ConfigLoadFailure { path: PathBuf, message: String },

    #[error("unable to watch {}: {message}", path.display())]
    WatchSetupFailure { path: PathBuf, message: String },
}

impl SkiffError {
    pub fn invalid_state(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

pub type SkiffResult<T> = std::result::Result<T, SkiffError>;

/// Renders an error chain as at most three lines for the status bar.
pub fn compact_error(error: &anyhow::Error) -> String {
    let mut out = Vec::new();
    for (index, cause) in error.chain().enumerate() {
        if index == 0 {
            out.push(cause.to_string());
        } else if index <= 2 {
            out.push(format!("caused by: {cause}"));
        } else {
            break;
        }
    }

    out.join("\n")
}
