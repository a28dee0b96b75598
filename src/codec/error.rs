//! State codec error types.

use thiserror::Error;

/// Why a blob failed its integrity check.
///
/// All of these are reported as one error class to callers: a blob that
/// cannot be authenticated is rejected as a whole, whatever the reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityFault {
    #[error("blob is not valid base64")]
    Encoding,

    #[error("blob is truncated")]
    Truncated,

    #[error("unsupported blob version {0}")]
    Version(u8),

    #[error("blob was sealed with unknown key `{0}`")]
    UnknownKey(String),

    #[error("authentication tag mismatch")]
    TagMismatch,

    #[error("sealed payload is malformed")]
    Malformed,
}

/// Errors produced while opening a state blob.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("state blob failed integrity check: {0}")]
    Integrity(IntegrityFault),

    #[error("state blob belongs to class `{found}`, expected `{expected}`")]
    ClassMismatch { expected: String, found: String },

    /// Authenticated payload does not deserialize into the target type.
    #[error("state payload does not fit class `{class}`")]
    Payload {
        class: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }
}

impl From<IntegrityFault> for DecodeError {
    fn from(fault: IntegrityFault) -> Self {
        Self::Integrity(fault)
    }
}

/// Errors produced while sealing a state blob.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to serialize state of class `{class}`")]
    Serialize {
        class: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("class identifier `{0}` is longer than 255 bytes")]
    ClassTooLong(String),

    #[error("encryption failed")]
    Seal,
}

/// Errors produced while building a keyring.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key id `{0}` must be 1-32 ASCII letters, digits, '-' or '_'")]
    InvalidId(String),

    #[error("key `{0}` secret is not valid base64")]
    Encoding(String),

    #[error("key `{id}` secret must be 32 bytes, got {len}")]
    Length { id: String, len: usize },

    #[error("duplicate key id `{0}`")]
    Duplicate(String),

    #[error("active key `{0}` is not in the keyring")]
    MissingActive(String),

    #[error("keyring is empty")]
    Empty,
}
