//! `[runtime]` section configuration.
//!
//! Settings for clients built on the runtime.
//!
//! ```toml
//! [runtime]
//! endpoint = "http://127.0.0.1:5280"
//! channel_url = "ws://127.0.0.1:5281"
//! reconnect_delay_ms = 3000
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigDiagnostics, FieldPath};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub endpoint: String,
    pub channel_url: String,
    pub reconnect_delay_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:5280".into(),
            channel_url: "ws://127.0.0.1:5281".into(),
            reconnect_delay_ms: 3000,
        }
    }
}

impl RuntimeConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub(crate) fn validate(&self, diag: &mut ConfigDiagnostics) {
        check_url(diag, "runtime.endpoint", &self.endpoint, &["http", "https"]);
        check_url(diag, "runtime.channel_url", &self.channel_url, &["ws", "wss"]);
        if self.reconnect_delay_ms == 0 {
            diag.error(
                FieldPath::new("runtime.reconnect_delay_ms"),
                "delay must be non-zero",
            );
        }
    }
}

fn check_url(diag: &mut ConfigDiagnostics, field: &'static str, value: &str, schemes: &[&str]) {
    match url::Url::parse(value) {
        Ok(url) if schemes.contains(&url.scheme()) => {}
        Ok(url) => diag.error_with_hint(
            FieldPath::new(field),
            format!("unsupported scheme `{}`", url.scheme()),
            format!("use one of: {}", schemes.join(", ")),
        ),
        Err(e) => diag.error(FieldPath::new(field), format!("invalid URL: {e}")),
    }
}
