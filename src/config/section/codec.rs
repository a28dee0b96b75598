//! `[codec]` section configuration.
//!
//! ```toml
//! [codec]
//! active_key = "k2"            # Key used to seal new blobs
//!
//! [[codec.keys]]
//! id = "k1"                    # Still accepted when opening blobs
//! secret = "base64 32 bytes"
//!
//! [[codec.keys]]
//! id = "k2"                    # Secret from WIRESTATE_KEY_K2
//! ```
//!
//! A key without an inline `secret` reads it from `WIRESTATE_KEY_<ID>`,
//! with the id upper-cased and `-` replaced by `_`.

use serde::{Deserialize, Serialize};

use crate::{
    codec::{Keyring, SealKey, validate_key_id},
    config::{ConfigDiagnostics, ConfigError, FieldPath},
};

pub const KEY_ENV_PREFIX: &str = "WIRESTATE_KEY_";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub active_key: String,
    pub keys: Vec<KeyEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl KeyEntry {
    pub fn env_var(&self) -> String {
        format!("{KEY_ENV_PREFIX}{}", self.id.to_ascii_uppercase().replace('-', "_"))
    }

    /// Inline secret, falling back to the environment.
    pub fn resolve_secret(&self) -> Option<String> {
        self.secret
            .clone()
            .or_else(|| std::env::var(self.env_var()).ok())
            .filter(|s| !s.trim().is_empty())
    }

    fn seal_key(&self) -> Result<SealKey, ConfigError> {
        let secret = self
            .resolve_secret()
            .ok_or_else(|| ConfigError::MissingSecret(self.id.clone(), self.env_var()))?;
        Ok(SealKey::from_base64(&self.id, &secret)?)
    }
}

impl CodecConfig {
    /// Build the keyring for sealing and opening blobs.
    pub fn keyring(&self) -> Result<Keyring, ConfigError> {
        let keys = self
            .keys
            .iter()
            .map(KeyEntry::seal_key)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Keyring::new(&self.active_key, keys)?)
    }

    pub(crate) fn validate(&self, diag: &mut ConfigDiagnostics) {
        let keys = FieldPath::new("codec.keys");
        if self.keys.is_empty() {
            diag.error_with_hint(keys, "no keys configured", "run `wirestate keygen`");
            return;
        }

        let mut seen: Vec<&str> = Vec::with_capacity(self.keys.len());
        for entry in &self.keys {
            if let Err(e) = validate_key_id(&entry.id) {
                diag.error(keys, e.to_string());
            } else if seen.contains(&entry.id.as_str()) {
                diag.error(keys, format!("duplicate key id `{}`", entry.id));
            }
            seen.push(&entry.id);

            if let Err(e) = entry.seal_key()
                && !matches!(e, ConfigError::Key(crate::codec::KeyError::InvalidId(_)))
            {
                diag.error(keys, e.to_string());
            }
        }

        if !self.keys.iter().any(|k| k.id == self.active_key) {
            diag.error_with_hint(
                FieldPath::new("codec.active_key"),
                format!("active key `{}` is not configured", self.active_key),
                "set `active_key` to one of the `[[codec.keys]]` ids",
            );
        }
    }
}
