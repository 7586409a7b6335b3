use parlor_shared::error::ErrorCode;
use parlor_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the chat engine to its callers.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Persistence or state-machine failure, surfaced verbatim.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A collaborator (block list, directory, signer) failed on a path that
    /// cannot degrade gracefully.
    #[error("Upstream service degraded: {0}")]
    Upstream(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Store(e) => e.code(),
            Self::Upstream(_) => ErrorCode::UpstreamDegraded,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::Validation(_) => ErrorCode::Validation,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    pub(crate) fn upstream(err: anyhow::Error) -> Self {
        Self::Upstream(format!("{err:#}"))
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("storage task failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
