use serde::{Deserialize, Serialize};

/// Error categories surfaced to callers of the chat engine.
///
/// Persistence and state-machine failures (`NotFound`, `Forbidden`,
/// `Conflict`, `Validation`) abort the operation that raised them.
/// `UpstreamDegraded` marks a collaborator failure (translation, notification)
/// and never aborts a send or a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    Forbidden,
    Conflict,
    UpstreamDegraded,
    Validation,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::Conflict => "CONFLICT",
            Self::UpstreamDegraded => "UPSTREAM_DEGRADED",
            Self::Validation => "VALIDATION",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether the primary operation must stop when this error occurs.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::UpstreamDegraded)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
