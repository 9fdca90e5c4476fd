//! Error taxonomy of the polling engine.
//!
//! Upstream failures are classified by the content source into [`ApiError`];
//! the worker recovers from most of them locally. Only credential exhaustion,
//! cancellation and worker crashes ever reach the dispatcher as [`EngineError`].

use std::path::PathBuf;

use crate::model::OwnerId;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Classified failure of a single `ContentSource::fetch` call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The access credential was rejected; refreshing it should help.
    #[error("access credential expired")]
    AuthExpired,

    /// The credential hit its rate limit; another slot should be used.
    #[error("rate limited")]
    RateLimited,

    #[error("transient network failure: {0}")]
    Transient(String),

    /// Response could not be understood (unclassified upstream error).
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

impl ApiError {
    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::AuthExpired => "auth_expired",
            ApiError::RateLimited => "rate_limited",
            ApiError::Transient(_) => "transient",
            ApiError::Malformed(_) => "malformed",
        }
    }
}

/// Failure reported by a `CredentialIssuer` while exchanging a refresh token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IssueError {
    #[error("refresh credential rejected: {0}")]
    Rejected(String),

    #[error("token endpoint unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// The slot is excluded from rotation until an operator replaces its token.
    #[error("credential slot {slot} rejected: {reason}")]
    Rejected { slot: usize, reason: String },

    /// Token endpoint could not be reached; the slot stays usable.
    #[error("credential slot {slot} could not be refreshed: {reason}")]
    Unavailable { slot: usize, reason: String },

    #[error("all credential slots are excluded from rotation")]
    PoolExhausted,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Task gave up after its retry budget; never fatal on its own.
    #[error("task for owner {owner} abandoned: {source}")]
    Abandoned {
        owner: OwnerId,
        #[source]
        source: ApiError,
    },

    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("worker {worker} crashed: {reason}")]
    WorkerCrashed { worker: usize, reason: String },

    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    /// Errors that must stop the dispatcher instead of being tallied per task.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Credential(CredentialError::PoolExhausted)
                | EngineError::WorkerCrashed { .. }
        )
    }

    pub(crate) fn persist(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Persist {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exhaustion_and_crashes_are_fatal() {
        assert!(EngineError::Credential(CredentialError::PoolExhausted).is_fatal());
        assert!(EngineError::WorkerCrashed {
            worker: 0,
            reason: "boom".into()
        }
        .is_fatal());
        assert!(!EngineError::Cancelled.is_fatal());
        assert!(!EngineError::Abandoned {
            owner: 1,
            source: ApiError::Malformed("x".into())
        }
        .is_fatal());
    }
}
