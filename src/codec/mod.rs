//! State Codec
//!
//! Seals a widget's private state into an opaque, authenticated blob and
//! opens it again on the next round trip.
//!
//! # Blob layout
//!
//! ```text
//! base64url( version | key_id_len | key_id | class_len | class | nonce[12] | ciphertext+tag )
//!            \_______________ header (AAD) ______________/
//! ```
//!
//! The header travels in clear but is authenticated as associated data, so
//! the class tag and key id cannot be swapped without failing the tag check.
//! The nonce is a keyed BLAKE3 hash of header and plaintext: sealing the same
//! snapshot twice yields the same blob.
//!
//! Opening fails closed. Any malformed, truncated or modified blob is an
//! [`DecodeError::Integrity`]; a blob that authenticates but names another
//! class is a [`DecodeError::ClassMismatch`].

mod error;
mod keyring;
pub mod tagged;

pub use error::{DecodeError, EncodeError, IntegrityFault, KeyError};
pub use keyring::{Keyring, MAX_KEY_ID_LEN, SealKey, generate_secret, validate_key_id};

use aes_gcm::{
    Nonce,
    aead::{Aead, Payload},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::widget::Widget;

/// Current blob format version.
pub const BLOB_VERSION: u8 = 1;

const NONCE_LEN: usize = 12;
/// AES-GCM tag length.
const TAG_LEN: usize = 16;

/// Authenticated plaintext.
#[derive(Serialize, Deserialize)]
struct Sealed<'a> {
    /// Stable list key, if the instance has one
    #[serde(rename = "k", default, skip_serializing_if = "Option::is_none")]
    key: Option<std::borrow::Cow<'a, str>>,
    /// Private field snapshot
    #[serde(rename = "s")]
    state: std::borrow::Cow<'a, Value>,
}

/// A successfully opened blob.
#[derive(Debug, Clone, PartialEq)]
pub struct Opened {
    pub class: String,
    pub key: Option<String>,
    pub state: Value,
}

/// Seals and opens state blobs with a keyring.
#[derive(Debug)]
pub struct StateCodec {
    keyring: Keyring,
}

impl StateCodec {
    pub fn new(keyring: Keyring) -> Self {
        Self { keyring }
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    // =========================================================================
    // Typed API
    // =========================================================================

    /// Encode a widget instance.
    pub fn encode<W: Widget>(&self, widget: &W, key: Option<&str>) -> Result<String, EncodeError> {
        let state = serde_json::to_value(widget).map_err(|source| EncodeError::Serialize {
            class: W::CLASS.to_string(),
            source,
        })?;
        self.seal(W::CLASS, key, &state)
    }

    /// Decode a blob into a widget instance of class `W`.
    pub fn decode<W: Widget + DeserializeOwned>(
        &self,
        blob: &str,
    ) -> Result<(W, Option<String>), DecodeError> {
        let opened = self.open_as(blob, W::CLASS)?;
        let widget = serde_json::from_value(opened.state).map_err(|source| {
            DecodeError::Payload {
                class: W::CLASS.to_string(),
                source,
            }
        })?;
        Ok((widget, opened.key))
    }

    // =========================================================================
    // Untyped API
    // =========================================================================

    /// Seal a state snapshot under the active key.
    pub fn seal(&self, class: &str, key: Option<&str>, state: &Value) -> Result<String, EncodeError> {
        if class.len() > u8::MAX as usize {
            return Err(EncodeError::ClassTooLong(class.to_string()));
        }
        let seal_key = self.keyring.active();

        let mut header = Vec::with_capacity(3 + seal_key.id().len() + class.len());
        header.push(BLOB_VERSION);
        // Key ids are validated to at most MAX_KEY_ID_LEN bytes
        header.push(seal_key.id().len() as u8);
        header.extend_from_slice(seal_key.id().as_bytes());
        header.push(class.len() as u8);
        header.extend_from_slice(class.as_bytes());

        let plaintext = serde_json::to_vec(&Sealed {
            key: key.map(Into::into),
            state: std::borrow::Cow::Borrowed(state),
        })
        .map_err(|source| EncodeError::Serialize {
            class: class.to_string(),
            source,
        })?;

        let mut hasher = blake3::Hasher::new_keyed(&seal_key.nonce_key);
        hasher.update(&header);
        hasher.update(&plaintext);
        let digest = hasher.finalize();
        let nonce_bytes = &digest.as_bytes()[..NONCE_LEN];

        let ciphertext = seal_key
            .cipher
            .encrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: &plaintext,
                    aad: &header,
                },
            )
            .map_err(|_| EncodeError::Seal)?;

        let mut blob = header;
        blob.extend_from_slice(nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(blob))
    }

    /// Open a blob of any class.
    pub fn open(&self, blob: &str) -> Result<Opened, DecodeError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(blob.trim())
            .map_err(|_| IntegrityFault::Encoding)?;
        self.open_bytes(&bytes)
    }

    /// Open a blob that must belong to `expected` class.
    pub fn open_as(&self, blob: &str, expected: &str) -> Result<Opened, DecodeError> {
        let opened = self.open(blob)?;
        if opened.class != expected {
            return Err(DecodeError::ClassMismatch {
                expected: expected.to_string(),
                found: opened.class,
            });
        }
        Ok(opened)
    }

    pub(crate) fn open_bytes(&self, bytes: &[u8]) -> Result<Opened, DecodeError> {
        let mut reader = Reader::new(bytes);

        let version = reader.byte()?;
        if version != BLOB_VERSION {
            return Err(IntegrityFault::Version(version).into());
        }
        let key_len = reader.byte()? as usize;
        let key_id = reader.utf8(key_len)?;
        let class_len = reader.byte()? as usize;
        let class = reader.utf8(class_len)?;
        let header_len = reader.pos;

        let nonce = reader.take(NONCE_LEN)?;
        let ciphertext = reader.rest();
        if ciphertext.len() < TAG_LEN {
            return Err(IntegrityFault::Truncated.into());
        }

        let seal_key = self
            .keyring
            .get(key_id)
            .ok_or_else(|| IntegrityFault::UnknownKey(key_id.to_string()))?;

        let plaintext = seal_key
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &bytes[..header_len],
                },
            )
            .map_err(|_| IntegrityFault::TagMismatch)?;

        let sealed: Sealed<'_> =
            serde_json::from_slice(&plaintext).map_err(|_| IntegrityFault::Malformed)?;

        Ok(Opened {
            class: class.to_string(),
            key: sealed.key.map(|k| k.into_owned()),
            state: sealed.state.into_owned(),
        })
    }
}

/// Bounds-checked cursor over blob bytes.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], IntegrityFault> {
        let end = self.pos.checked_add(n).ok_or(IntegrityFault::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(IntegrityFault::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, IntegrityFault> {
        Ok(self.take(1)?[0])
    }

    fn utf8(&mut self, n: usize) -> Result<&'a str, IntegrityFault> {
        std::str::from_utf8(self.take(n)?).map_err(|_| IntegrityFault::Malformed)
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        rest
    }
}
