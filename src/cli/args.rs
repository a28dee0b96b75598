//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::{net::IpAddr, path::PathBuf};

use crate::config::ServeConfig;

/// Resumable widget state server and tools
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Config file path (default: wirestate.toml)
    #[arg(short = 'C', long, global = true, default_value = "wirestate.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Print per-message debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the dispatch endpoint and the group broker with the demo widgets
    #[command(visible_alias = "s")]
    Serve {
        #[command(flatten)]
        args: ServeArgs,
    },

    /// Print a fresh `[[codec.keys]]` entry
    #[command(visible_alias = "k")]
    Keygen {
        /// Key identifier (1 to 32 ASCII characters)
        #[arg(default_value = "main")]
        id: String,
    },

    /// Open a state blob with the configured keys and print its contents
    #[command(visible_alias = "i")]
    Inspect {
        /// Sealed blob, or `-` to read it from stdin
        blob: String,

        /// Pretty-print the decoded state
        #[arg(short, long)]
        pretty: bool,
    },
}

/// Serve command overrides for `[serve]`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Network interface to bind (e.g., 127.0.0.1, 0.0.0.0)
    #[arg(short, long)]
    pub interface: Option<IpAddr>,

    /// Port for the dispatch endpoint
    #[arg(short, long)]
    pub port: Option<u16>,

    /// First port tried for the broker WebSocket
    #[arg(short = 'w', long)]
    pub ws_port: Option<u16>,
}

impl ServeArgs {
    pub fn apply(&self, serve: &mut ServeConfig) {
        if let Some(interface) = self.interface {
            serve.interface = interface;
        }
        if let Some(port) = self.port {
            serve.port = port;
        }
        if let Some(ws_port) = self.ws_port {
            serve.ws_port = ws_port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_overrides() {
        let cli = Cli::parse_from(["wirestate", "-v", "serve", "--port", "9000", "-w", "9001"]);
        assert!(cli.verbose);
        let Commands::Serve { args } = &cli.command else {
            panic!("expected serve");
        };

        let mut serve = ServeConfig::default();
        args.apply(&mut serve);
        assert_eq!(serve.port, 9000);
        assert_eq!(serve.ws_port, 9001);
        assert_eq!(serve.interface, ServeConfig::default().interface);
    }

    #[test]
    fn test_defaults_and_global_flags() {
        let cli = Cli::parse_from(["wirestate", "keygen"]);
        assert!(matches!(cli.command, Commands::Keygen { ref id } if id == "main"));
        assert_eq!(cli.config, PathBuf::from("wirestate.toml"));

        let cli = Cli::parse_from(["wirestate", "inspect", "blob", "-C", "other.toml", "-p"]);
        assert!(matches!(cli.command, Commands::Inspect { pretty: true, .. }));
        assert_eq!(cli.config, PathBuf::from("other.toml"));
    }
}
