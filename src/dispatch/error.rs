//! Dispatch error types.

use thiserror::Error;

use crate::codec::{DecodeError, EncodeError};

/// Errors that abort a dispatch. No envelope is produced for any of them.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// Blob authenticated but names a class this process does not know.
    #[error("unknown widget class `{0}`")]
    UnknownClass(String),

    #[error("no child instance at `{0}`")]
    TargetNotFound(String),

    #[error("`{class}` has no operation `{operation}`")]
    UnknownOperation { class: String, operation: String },

    #[error("operation `{class}.{operation}` is not callable from the client")]
    NotExternal { class: String, operation: String },

    #[error("public field values do not fit `{class}`")]
    PublicField {
        class: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("operation `{operation}` failed")]
    Operation {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("watchers still changing public fields after {limit} passes")]
    WatchCycle { limit: usize },

    #[error("failed to render `{class}`")]
    Render {
        class: String,
        #[source]
        source: anyhow::Error,
    },

    /// Instance state could not be snapshotted or restored.
    #[error("state of `{class}` does not round-trip")]
    State {
        class: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DispatchError {
    /// Stable kind string used in failure responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(DecodeError::Integrity(_)) => "integrity",
            Self::Decode(DecodeError::ClassMismatch { .. }) => "class_mismatch",
            Self::Decode(DecodeError::Payload { .. }) => "payload",
            Self::Encode(_) => "encode",
            Self::UnknownClass(_) => "unknown_class",
            Self::TargetNotFound(_) => "target_not_found",
            Self::UnknownOperation { .. } => "unknown_operation",
            Self::NotExternal { .. } => "not_external",
            Self::PublicField { .. } => "public_field",
            Self::Operation { .. } => "operation",
            Self::WatchCycle { .. } => "watch_cycle",
            Self::Render { .. } => "render",
            Self::State { .. } => "state",
        }
    }

    /// HTTP status for failure responses.
    pub fn status(&self) -> u16 {
        match self {
            Self::Decode(DecodeError::Integrity(_) | DecodeError::ClassMismatch { .. }) => 400,
            Self::Decode(DecodeError::Payload { .. }) => 400,
            Self::UnknownClass(_) | Self::PublicField { .. } => 400,
            Self::TargetNotFound(_) | Self::UnknownOperation { .. } => 404,
            Self::NotExternal { .. } => 403,
            Self::Encode(_)
            | Self::Operation { .. }
            | Self::WatchCycle { .. }
            | Self::Render { .. }
            | Self::State { .. } => 500,
        }
    }

    /// Message safe to show to the client.
    ///
    /// Operation and render causes stay server-side; integrity faults are
    /// reported without saying which check failed.
    pub fn public_message(&self) -> String {
        match self {
            Self::Decode(DecodeError::Integrity(_)) => "state blob failed integrity check".into(),
            Self::Operation { operation, .. } => format!("operation `{operation}` failed"),
            Self::Render { class, .. } => format!("failed to render `{class}`"),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::IntegrityFault;

    #[test]
    fn test_kinds_and_statuses() {
        let integrity = DispatchError::from(DecodeError::Integrity(IntegrityFault::TagMismatch));
        assert_eq!(integrity.kind(), "integrity");
        assert_eq!(integrity.status(), 400);
        assert_eq!(integrity.public_message(), "state blob failed integrity check");

        let not_external = DispatchError::NotExternal {
            class: "counter".into(),
            operation: "reset".into(),
        };
        assert_eq!(not_external.kind(), "not_external");
        assert_eq!(not_external.status(), 403);

        let failed = DispatchError::Operation {
            operation: "save".into(),
            source: anyhow::anyhow!("database password is hunter2"),
        };
        assert_eq!(failed.status(), 500);
        assert!(!failed.public_message().contains("hunter2"));
        assert!(std::error::Error::source(&failed).is_some());
    }
}
