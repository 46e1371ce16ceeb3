//! Error types for corral

use thiserror::Error;

use crate::agent::{AgentId, AgentStatus};

/// Result type alias for corral operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for corral operations
///
/// Merge conflicts and vanished panes are not errors: they surface as
/// [`crate::git::MergeOutcome::Conflicts`] and the `dismissed` status.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Version-control tool failure
    #[error("Git error: {0}")]
    Git(String),

    /// Terminal multiplexer failure
    #[error("tmux error: {0}")]
    Multiplexer(String),

    /// No agent registered under this ID
    #[error("Agent {0} not found")]
    AgentNotFound(AgentId),

    /// Branch is already claimed by an agent or checked out somewhere
    #[error("Branch '{0}' is already in use")]
    BranchInUse(String),

    /// A working directory has uncommitted changes that block the operation
    #[error("Uncommitted changes in {0}")]
    UncommittedChanges(String),

    /// A preview session is already active (or being started)
    #[error("Preview already active")]
    PreviewActive,

    /// No preview session to stop
    #[error("No active preview")]
    NoPreview,

    /// The agent's status does not allow the requested operation
    #[error("Cannot {operation} agent {id} while it is {status}")]
    InvalidStatus {
        id: AgentId,
        status: AgentStatus,
        operation: &'static str,
    },

    /// Illegal lifecycle transition
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: AgentStatus, to: AgentStatus },

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<git2::Error> for Error {
    fn from(e: git2::Error) -> Self {
        Error::Git(e.message().to_string())
    }
}

impl Error {
    /// Whether this error is a precondition violation (nothing was mutated)
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::AgentNotFound(_)
                | Error::BranchInUse(_)
                | Error::UncommittedChanges(_)
                | Error::PreviewActive
                | Error::NoPreview
                | Error::InvalidStatus { .. }
                | Error::InvalidTransition { .. }
        )
    }
}
