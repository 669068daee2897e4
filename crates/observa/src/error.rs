#![forbid(unsafe_code)]

//! Error types.
//!
//! [`ReactiveError`] covers API misuse (bad arguments, unknown container
//! operations, runaway flush loops). [`Exception`] is what a tracked function
//! produced when it failed; it is captured in the transaction statistics and
//! never propagated to the caller of `transaction`/`autorun`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReactiveError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReactiveError {
    #[error("unknown {kind} operation: {op}")]
    UnknownOperation { kind: &'static str, op: String },

    #[error("invalid argument for {op}: {message}")]
    InvalidArgument { op: String, message: String },

    #[error("property is not callable: {key}")]
    NotCallable { key: String },

    #[error("method invoked without a receiver")]
    MissingReceiver,

    #[error("global slot {key} holds a value of a different type")]
    SlotTypeMismatch { key: &'static str },

    #[error("notifications did not settle after {rounds} flush rounds")]
    FlushLimitExceeded { rounds: usize },
}

impl ReactiveError {
    #[must_use]
    pub fn invalid(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            op: op.into(),
            message: message.into(),
        }
    }
}

/// Failure of a tracked function body.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Exception {
    #[error(transparent)]
    Failed(#[from] ReactiveError),

    #[error("{0}")]
    Thrown(String),

    #[error("tracked function panicked: {0}")]
    Panicked(String),
}

impl Exception {
    #[must_use]
    pub fn thrown(message: impl Into<String>) -> Self {
        Self::Thrown(message.into())
    }

    /// Build an exception from a panic payload caught by `catch_unwind`.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }
}
