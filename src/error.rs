//! Error types for Synheart Guide

use thiserror::Error;

/// Errors that can occur in the guidance engine.
///
/// Capture, scoring, throttling and the fallback rules never produce these; they are
/// reserved for configuration, lifecycle and the remote collaborators.
#[derive(Debug, Error)]
pub enum GuideError {
    #[error("Remote transport failed: {0}")]
    Transport(String),

    #[error("Remote endpoint returned status {0}")]
    RemoteStatus(u16),

    #[error("Remote call timed out after {0}ms")]
    Timeout(u64),

    #[error("Malformed remote response: {0}")]
    MalformedResponse(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Engine is already running")]
    AlreadyRunning,
}

impl From<reqwest::Error> for GuideError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            GuideError::RemoteStatus(status.as_u16())
        } else if e.is_decode() {
            GuideError::MalformedResponse(e.to_string())
        } else {
            GuideError::Transport(e.to_string())
        }
    }
}

impl GuideError {
    /// Whether the error came from a remote collaborator and should degrade to local heuristics.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            GuideError::Transport(_)
                | GuideError::RemoteStatus(_)
                | GuideError::Timeout(_)
                | GuideError::MalformedResponse(_)
        )
    }
}
