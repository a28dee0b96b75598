//! Configuration for `wirestate.toml`.
//!
//! # Module Structure
//!
//! ```text
//! config/
//! ├── section/       # [serve] [codec] [dispatch] [runtime]
//! ├── types/         # ConfigError, diagnostics, global handle
//! └── mod.rs         # WireConfig (this file)
//! ```
//!
//! # Sections
//!
//! | Section      | Purpose                                         |
//! |--------------|-------------------------------------------------|
//! | `[serve]`    | Dispatch endpoint and broker (ports, CSRF)      |
//! | `[codec]`    | Sealing keys, active key for rotation           |
//! | `[dispatch]` | Watcher cycle limit                             |
//! | `[runtime]`  | Client endpoint, channel URL, reconnect delay   |

pub mod section;
pub mod types;
mod util;

pub use section::{CodecConfig, DispatchConfig, KeyEntry, RuntimeConfig, ServeConfig};
pub use types::{ConfigDiagnostic, ConfigDiagnostics, ConfigError, FieldPath, cfg, init_config};
pub use util::find_config_file;

use crate::log;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

// ============================================================================
// root configuration
// ============================================================================

/// Root configuration structure representing `wirestate.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireConfig {
    /// Absolute path to the config file (internal use only)
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub serve: ServeConfig,

    #[serde(default)]
    pub codec: CodecConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl WireConfig {
    /// Locate, parse and validate the config file.
    ///
    /// Relative names are searched upward from the current directory.
    pub fn load(name: &Path) -> Result<Self, ConfigError> {
        let path =
            find_config_file(name).ok_or_else(|| ConfigError::NotFound(name.to_path_buf()))?;
        let mut config = Self::from_path(&path)?;
        config.config_path = path;
        config.validate()?;
        Ok(config)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from file path with unknown field detection.
    fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (config, ignored) = Self::parse_with_ignored(&content)?;
        if !ignored.is_empty() {
            Self::print_unknown_fields_warning(&ignored, path);
        }
        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })?;
        Ok((config, ignored))
    }

    fn print_unknown_fields_warning(fields: &[String], path: &Path) {
        let display_path = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| path.to_string_lossy());
        log!("warning"; "unknown fields in {}, ignoring:", display_path);
        for field in fields {
            eprintln!("- {}", field);
        }
    }

    /// Validate every section, reporting all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut diag = ConfigDiagnostics::new();
        self.serve.validate(&mut diag);
        self.codec.validate(&mut diag);
        self.dispatch.validate(&mut diag);
        self.runtime.validate(&mut diag);
        diag.into_result().map_err(ConfigError::Diagnostics)
    }
}

/// Parse a config with a valid keyring plus `extra`, failing on unknown fields.
#[cfg(test)]
pub fn test_parse_config(extra: &str) -> WireConfig {
    let config = format!(
        "{extra}\n\n[codec]\nactive_key = \"test\"\n\n[[codec.keys]]\nid = \"test\"\nsecret = \"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=\"\n"
    );
    let (parsed, ignored) = WireConfig::parse_with_ignored(&config).unwrap();
    assert!(
        ignored.is_empty(),
        "unknown fields in test config: {:?}",
        ignored
    );
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_str_invalid_toml() {
        assert!(matches!(
            WireConfig::from_str("[serve\nport = 1"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_defaults() {
        let config = WireConfig::default();
        assert_eq!(config.serve.port, 5280);
        assert_eq!(config.dispatch.watch_cycle_limit, 10);
        assert_eq!(config.runtime.reconnect_delay_ms, 3000);
        assert!(config.codec.keys.is_empty());
    }

    #[test]
    fn test_unknown_fields_detected() {
        let content = "[serve]\nport = 8080\nunknown_field = 1\n\n[unknown_section]\nx = 1";
        let (config, ignored) = WireConfig::parse_with_ignored(content).unwrap();
        assert_eq!(config.serve.port, 8080);
        assert!(ignored.iter().any(|f| f.contains("unknown_field")));
        assert!(ignored.iter().any(|f| f.contains("unknown_section")));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wirestate.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[serve]\nport = 7000\nws_port = 7001\n\n[codec]\nactive_key = \"a\"\n\n[[codec.keys]]\nid = \"a\"\nsecret = \"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=\""
        )
        .unwrap();

        let config = WireConfig::load(&path).unwrap();
        assert_eq!(config.config_path, path);
        assert_eq!(config.serve.port, 7000);
        assert!(config.codec.keyring().is_ok());
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wirestate.toml");
        fs::write(&path, "[serve]\nport = 0\n").unwrap();

        match WireConfig::load(&path) {
            Err(ConfigError::Diagnostics(diag)) => {
                let fields: Vec<_> = diag.errors().iter().map(|e| e.field.as_str()).collect();
                assert!(fields.contains(&"serve.port"));
                assert!(fields.contains(&"codec.keys"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(WireConfig::load(&path), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_global_handle() {
        let config = test_parse_config("[serve]\nport = 6123");
        init_config(config);
        assert_eq!(cfg().serve.port, 6123);
    }
}
