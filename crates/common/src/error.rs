// Failure taxonomy surfaced by every core operation.

use std::fmt;

use thiserror::Error;

/// What a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Page,
    Block,
    Version,
    Comment,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Page => "page content",
            Self::Block => "block",
            Self::Version => "version",
            Self::Comment => "comment",
        })
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{resource} `{id}` not found")]
    NotFound { resource: Resource, id: String },

    #[error("content already exists for page `{page_id}`")]
    AlreadyExists { page_id: String },

    /// The optimistic version guard failed. Recoverable: refetch and retry.
    #[error("version conflict on page `{page_id}`: expected {expected}, current is {current}")]
    VersionConflict { page_id: String, expected: i64, current: i64 },

    #[error("actor `{actor}` is not the author of comment `{comment_id}`")]
    Forbidden { actor: String, comment_id: String },

    #[error("comment `{comment_id}` is already resolved")]
    AlreadyResolved { comment_id: String },

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Discriminant of [`CoreError`] for callers that only need to branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    VersionConflict,
    Forbidden,
    AlreadyResolved,
    IllegalState,
    Storage,
}

impl CoreError {
    pub fn not_found(resource: Resource, id: impl Into<String>) -> Self {
        Self::NotFound { resource, id: id.into() }
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::VersionConflict { .. } => ErrorKind::VersionConflict,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::AlreadyResolved { .. } => ErrorKind::AlreadyResolved,
            Self::IllegalState(_) => ErrorKind::IllegalState,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Live version reported by a rejected write, if this is a conflict.
    pub fn current_version(&self) -> Option<i64> {
        match self {
            Self::VersionConflict { current, .. } => Some(*current),
            _ => None,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
