//! `[serve]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [serve]
//! interface = "127.0.0.1"     # Network interface (127.0.0.1 = localhost only)
//! port = 5280                 # HTTP dispatch endpoint
//! ws_port = 5281              # Group broker WebSocket
//! csrf_token = "change-me"    # Require X-CSRFToken on every call
//! workers = 0                 # Dispatch threads, 0 = one per core
//! ```

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use crate::config::{ConfigDiagnostics, FieldPath};

/// Dispatch endpoint and broker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Network interface to bind.
    /// - `127.0.0.1` (default): localhost only
    /// - `0.0.0.0`: all interfaces (LAN accessible)
    pub interface: IpAddr,

    pub port: u16,

    /// First port tried for the broker; the next free one is used.
    pub ws_port: u16,

    /// Shared token compared with `X-CSRFToken`. No check when unset.
    pub csrf_token: Option<String>,

    pub workers: usize,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            interface: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 5280,
            ws_port: 5281,
            csrf_token: None,
            workers: 0,
        }
    }
}

impl ServeConfig {
    pub(crate) fn validate(&self, diag: &mut ConfigDiagnostics) {
        if self.port == 0 {
            diag.error(FieldPath::new("serve.port"), "port must be non-zero");
        }
        if self.ws_port == 0 {
            diag.error(FieldPath::new("serve.ws_port"), "port must be non-zero");
        }
        if self.port == self.ws_port {
            diag.error_with_hint(
                FieldPath::new("serve.ws_port"),
                "broker port collides with the dispatch port",
                "pick a different `ws_port`",
            );
        }
        if self.csrf_token.as_deref().is_some_and(str::is_empty) {
            diag.error(FieldPath::new("serve.csrf_token"), "token must not be empty");
        }
    }

    /// Worker threads to use, resolving `0` to the core count.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            0 => std::thread::available_parallelism().map_or(4, usize::from),
            n => n,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    use crate::config::test_parse_config;

    #[test]
    fn test_serve_config() {
        let config = test_parse_config(
            "[serve]\ninterface = \"0.0.0.0\"\nport = 8080\nws_port = 8081\ncsrf_token = \"t\"",
        );

        assert_eq!(config.serve.interface, IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        assert_eq!(config.serve.port, 8080);
        assert_eq!(config.serve.ws_port, 8081);
        assert_eq!(config.serve.csrf_token.as_deref(), Some("t"));
    }

    #[test]
    fn test_serve_config_defaults() {
        let config = test_parse_config("");

        assert_eq!(config.serve.interface, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(config.serve.port, 5280);
        assert_eq!(config.serve.ws_port, 5281);
        assert!(config.serve.csrf_token.is_none());
        assert!(config.serve.worker_count() >= 1);
    }

    #[test]
    fn test_serve_config_ipv6() {
        let config = test_parse_config("[serve]\ninterface = \"::1\"");
        assert_eq!(
            config.serve.interface,
            IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 1))
        );
    }

    #[test]
    fn test_port_collision_rejected() {
        let config = test_parse_config("[serve]\nport = 9000\nws_port = 9000");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("serve.ws_port"));
    }
}
