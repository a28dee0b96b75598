//! Client runtime error types.
//!
//! Errors are `Clone`: one rate-limited exchange may resolve several
//! waiting callers with the same outcome.

use thiserror::Error;

/// Failure talking to the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Network(String),

    #[error("response could not be decoded: {0}")]
    Decode(String),

    #[error("could not connect: {0}")]
    Connect(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("command name `{0}` must be dot-separated identifiers")]
    InvalidName(String),

    #[error("command `{0}` is already registered")]
    Duplicate(String),

    #[error("no command registered as `{0}`")]
    Unknown(String),

    #[error("command `{name}` failed: {message}")]
    Failed { name: String, message: String },
}

/// Errors surfaced by [`super::BoundWidget::call`] and friends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("response is missing the wire response marker")]
    MissingMarker,

    /// Server answered with a failure body.
    #[error("call failed ({status} {kind}): {message}")]
    Call {
        status: u16,
        kind: String,
        message: String,
    },

    #[error("`{class}` has no external operation `{operation}`")]
    UnknownOperation { class: String, operation: String },

    #[error("rendered markup could not be merged: {0}")]
    Merge(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("component `{0}` is not bound")]
    UnknownComponent(String),

    #[error("component `{0}` was removed")]
    Removed(String),

    #[error("runtime has no duplex channel configured")]
    NoChannel,

    #[error("rate-limited call was abandoned")]
    Abandoned,
}

impl From<crate::view::MergeError> for RuntimeError {
    fn from(e: crate::view::MergeError) -> Self {
        Self::Merge(e.to_string())
    }
}
