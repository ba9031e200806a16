/// Error types for the feed client
use crate::post::PostId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxieError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, VoxieError>;

/// Category of a feed-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The live subscription terminated ("feed unavailable")
    Subscription,
    /// The backend rejected a create/edit/delete
    MutationFailure,
    /// Edit attempted on a post that is being deleted
    Conflict,
    /// An optimistic entry outlived the pending timeout
    Timeout,
    /// No signed-in user
    NotAuthenticated,
    /// The post is not in the current snapshot
    NotFound,
    /// The post belongs to someone else
    Forbidden,
    /// Input failed validation
    Validation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Subscription => "feed unavailable",
            ErrorKind::MutationFailure => "mutation failed",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Timeout => "timed out",
            ErrorKind::NotAuthenticated => "not signed in",
            ErrorKind::NotFound => "not found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Validation => "invalid input",
        };
        f.write_str(s)
    }
}

/// Recoverable error surfaced by the feed layer.
///
/// Never fatal: the reconciler reverts its optimistic state and reports the
/// error upward.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct FeedError {
    pub kind: ErrorKind,
    pub post_id: Option<PostId>,
    pub message: String,
}

impl FeedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            post_id: None,
            message: message.into(),
        }
    }

    pub fn for_post(kind: ErrorKind, post_id: &PostId, message: impl Into<String>) -> Self {
        Self {
            kind,
            post_id: Some(post_id.clone()),
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Subscription, message)
    }

    pub fn not_authenticated() -> Self {
        Self::new(ErrorKind::NotAuthenticated, "you must be logged in")
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }
}

/// Error reported by the remote backend for a mutation call.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct BackendError {
    /// Backend error code, e.g. `permission-denied`
    pub code: String,
    pub message: String,
}

impl BackendError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Human-readable cause derived from the error code
    pub fn cause(&self) -> &'static str {
        match self.code.as_str() {
            "permission-denied" => "You don't have permission to do that.",
            "unavailable" => "Service is temporarily unavailable. Please try again later.",
            "not-found" => "The post no longer exists.",
            "failed-precondition" => "The post was changed elsewhere. Please try again.",
            _ => "Something went wrong. Please try again.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_cause() {
        let err = BackendError::new("permission-denied", "rules rejected write");
        assert_eq!(err.cause(), "You don't have permission to do that.");

        let err = BackendError::new("something-odd", "???");
        assert_eq!(err.cause(), "Something went wrong. Please try again.");
    }

    #[test]
    fn test_feed_error_display() {
        let err = FeedError::for_post(
            ErrorKind::Conflict,
            &PostId::from("p1"),
            "post is being deleted",
        );
        assert_eq!(err.to_string(), "conflict: post is being deleted");
        assert_eq!(err.post_id, Some(PostId::from("p1")));
    }
}
