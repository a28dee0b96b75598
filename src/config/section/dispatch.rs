//! `[dispatch]` section configuration.
//!
//! ```toml
//! [dispatch]
//! watch_cycle_limit = 10   # Watcher passes allowed per call
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    config::{ConfigDiagnostics, FieldPath},
    dispatch::DEFAULT_WATCH_LIMIT,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub watch_cycle_limit: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            watch_cycle_limit: DEFAULT_WATCH_LIMIT,
        }
    }
}

impl DispatchConfig {
    pub(crate) fn validate(&self, diag: &mut ConfigDiagnostics) {
        if self.watch_cycle_limit == 0 {
            diag.error_with_hint(
                FieldPath::new("dispatch.watch_cycle_limit"),
                "limit must be at least 1",
                "watchers could never run",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;

    #[test]
    fn test_dispatch_defaults_and_override() {
        assert_eq!(test_parse_config("").dispatch.watch_cycle_limit, 10);
        let config = test_parse_config("[dispatch]\nwatch_cycle_limit = 3");
        assert_eq!(config.dispatch.watch_cycle_limit, 3);
        assert!(test_parse_config("[dispatch]\nwatch_cycle_limit = 0").validate().is_err());
    }
}
