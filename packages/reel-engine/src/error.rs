use std::path::PathBuf;
use thiserror::Error;

/// Failure taxonomy shared by every pipeline stage.
#[derive(Debug, Error)]
pub enum ReelError {
    #[error("template retrieval failed: {0}")]
    Retrieval(String),

    #[error("code mutation failed: {0}")]
    Mutation(String),

    #[error("no scene class found in the code")]
    NoSceneFound,

    #[error("render failed (exit code {exit_code:?}): {output}")]
    RenderFailed {
        exit_code: Option<i32>,
        output: String,
    },

    #[error("render reported success but no video matching '{unique_id}' was found")]
    ArtifactNotFound { unique_id: String },

    #[error("rendering timeout (exceeded {secs} seconds)")]
    Timeout { secs: u64 },

    #[error("explanation failed: {0}")]
    Explanation(String),

    #[error("path escapes the artifact root: {}", .0.display())]
    PathEscape(PathBuf),

    #[error("artifact not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ReelResult<T> = std::result::Result<T, ReelError>;

impl ReelError {
    /// Text shown to callers in outcome records. Render failures surface the engine output as-is.
    pub fn user_message(&self) -> String {
        match self {
            ReelError::RenderFailed { output, .. } => output.clone(),
            other => other.to_string(),
        }
    }
}
