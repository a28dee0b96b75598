//! Key material for sealing state blobs.
//!
//! Each configured secret yields two derived keys: an AES-256-GCM key for
//! the payload and a BLAKE3 key for deterministic nonce derivation. Encode
//! always uses the active key; decode accepts any key in the ring, which
//! allows rotating the active key without invalidating live pages.

use aes_gcm::{Aes256Gcm, aead::KeyInit};
use base64::{Engine as _, engine::general_purpose};
use rustc_hash::FxHashMap;

use super::error::KeyError;

const ENCRYPTION_CONTEXT: &str = "wirestate 2026-01 state blob encryption";
const NONCE_CONTEXT: &str = "wirestate 2026-01 state blob nonce";

/// Maximum key id length (stored in a single length byte, kept short).
pub const MAX_KEY_ID_LEN: usize = 32;

/// One usable key.
pub struct SealKey {
    id: String,
    pub(super) cipher: Aes256Gcm,
    pub(super) nonce_key: [u8; 32],
}

impl SealKey {
    /// Derive a key from a raw 32-byte secret.
    pub fn from_secret(id: &str, secret: &[u8; 32]) -> Result<Self, KeyError> {
        validate_key_id(id)?;
        let enc = blake3::derive_key(ENCRYPTION_CONTEXT, secret);
        let nonce_key = blake3::derive_key(NONCE_CONTEXT, secret);
        let cipher = Aes256Gcm::new((&enc).into());
        Ok(Self {
            id: id.to_string(),
            cipher,
            nonce_key,
        })
    }

    /// Derive a key from a base64-encoded 32-byte secret.
    pub fn from_base64(id: &str, secret: &str) -> Result<Self, KeyError> {
        let bytes = general_purpose::STANDARD
            .decode(secret.trim())
            .map_err(|_| KeyError::Encoding(id.to_string()))?;
        let secret: [u8; 32] = bytes.as_slice().try_into().map_err(|_| KeyError::Length {
            id: id.to_string(),
            len: bytes.len(),
        })?;
        Self::from_secret(id, &secret)
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Debug for SealKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealKey").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Set of keys with one active key.
#[derive(Debug)]
pub struct Keyring {
    active: String,
    keys: FxHashMap<String, SealKey>,
}

impl Keyring {
    /// Build a keyring; `active` must name one of `keys`.
    pub fn new(active: &str, keys: impl IntoIterator<Item = SealKey>) -> Result<Self, KeyError> {
        let mut map = FxHashMap::default();
        for key in keys {
            if map.contains_key(key.id()) {
                return Err(KeyError::Duplicate(key.id().to_string()));
            }
            map.insert(key.id().to_string(), key);
        }
        if map.is_empty() {
            return Err(KeyError::Empty);
        }
        if !map.contains_key(active) {
            return Err(KeyError::MissingActive(active.to_string()));
        }
        Ok(Self {
            active: active.to_string(),
            keys: map,
        })
    }

    /// Keyring with a single key that is also active.
    pub fn single(key: SealKey) -> Self {
        let active = key.id().to_string();
        let mut keys = FxHashMap::default();
        keys.insert(active.clone(), key);
        Self { active, keys }
    }

    pub fn active(&self) -> &SealKey {
        // Invariant from the constructors: the active id is always present
        &self.keys[&self.active]
    }

    pub fn get(&self, id: &str) -> Option<&SealKey> {
        self.keys.get(id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Generate a fresh random secret, base64-encoded.
pub fn generate_secret() -> Result<String, getrandom::Error> {
    let mut secret = [0u8; 32];
    getrandom::getrandom(&mut secret)?;
    Ok(general_purpose::STANDARD.encode(secret))
}

/// Check key id shape.
pub fn validate_key_id(id: &str) -> Result<(), KeyError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_KEY_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(KeyError::InvalidId(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_id_validation() {
        assert!(validate_key_id("k1").is_ok());
        assert!(validate_key_id("2026-01_main").is_ok());
        assert!(validate_key_id("").is_err());
        assert!(validate_key_id("has space").is_err());
        assert!(validate_key_id(&"x".repeat(33)).is_err());
    }

    #[test]
    fn test_from_base64_length_check() {
        let short = general_purpose::STANDARD.encode([1u8; 16]);
        let err = SealKey::from_base64("k1", &short).unwrap_err();
        assert!(matches!(err, KeyError::Length { len: 16, .. }));

        let err = SealKey::from_base64("k1", "not base64!").unwrap_err();
        assert!(matches!(err, KeyError::Encoding(_)));
    }

    #[test]
    fn test_keyring_requires_active() {
        let a = SealKey::from_secret("a", &[1; 32]).unwrap();
        let err = Keyring::new("b", [a]).unwrap_err();
        assert!(matches!(err, KeyError::MissingActive(_)));
    }

    #[test]
    fn test_keyring_rejects_duplicates() {
        let a = SealKey::from_secret("a", &[1; 32]).unwrap();
        let a2 = SealKey::from_secret("a", &[2; 32]).unwrap();
        assert!(matches!(
            Keyring::new("a", [a, a2]),
            Err(KeyError::Duplicate(_))
        ));
    }

    #[test]
    fn test_generated_secret_is_usable() {
        let secret = generate_secret().unwrap();
        let key = SealKey::from_base64("fresh", &secret).unwrap();
        assert_eq!(key.id(), "fresh");
    }
}
