//! Typed error hierarchy for patchbridge.
//!
//! Two top-level enums cover the two layers:
//! - `NotesError` — failures of the git-notes backed metadata store
//! - `BridgeError` — orchestrator outcomes, split by how they are surfaced
//!   (posted to the PR, raised to the caller, or both)

use thiserror::Error;

/// Errors from the notes store.
#[derive(Debug, Error)]
pub enum NotesError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Failed to (de)serialize note for key '{key}': {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("A note already exists for key '{key}'")]
    AlreadyExists { key: String },

    #[error("Invalid commit id '{0}'")]
    InvalidCommitId(String),

    #[error("Refusing to merge unrelated notes histories {local} and {other}")]
    UnrelatedHistories { local: String, other: String },
}

/// Errors from the orchestrator.
///
/// `Validation`, `CheckFailed` and `Authorization` are user-facing: they end
/// up as a PR comment. `Configuration` and `Transport` go to the operator.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A precondition on the PR failed and has not been posted yet.
    #[error("{0}")]
    Validation(String),

    /// The PR-level gate failed; its comments were already posted.
    #[error("Failing check due to {summary}")]
    CheckFailed { summary: String },

    #[error("{0}")]
    Authorization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Transport(anyhow::Error),

    #[error(transparent)]
    Notes(NotesError),
}

impl From<NotesError> for BridgeError {
    fn from(err: NotesError) -> Self {
        match err {
            NotesError::UnrelatedHistories { .. } => BridgeError::Configuration(err.to_string()),
            other => BridgeError::Notes(other),
        }
    }
}

impl BridgeError {
    /// Whether the error still needs to be posted as a PR comment.
    pub fn needs_comment(&self) -> bool {
        matches!(
            self,
            BridgeError::Validation(_) | BridgeError::Authorization(_)
        )
    }

    /// Whether the error is a contributor-side problem rather than an
    /// operational failure.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            BridgeError::Validation(_)
                | BridgeError::CheckFailed { .. }
                | BridgeError::Authorization(_)
        )
    }
}
