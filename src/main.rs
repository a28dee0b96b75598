//! wirestate command-line entry point.

use std::sync::Arc;

use anyhow::Result;
use clap::{ColorChoice, Parser};
use wirestate::{
    cli::{self, Cli, Commands, ServeArgs},
    config::{WireConfig, init_config},
    logger,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }
    logger::set_verbose(cli.verbose);

    match &cli.command {
        Commands::Keygen { id } => cli::keygen::run(id),
        Commands::Inspect { blob, pretty } => {
            let config = load_config(&cli, None)?;
            cli::inspect::run(&config, blob, *pretty)
        }
        Commands::Serve { args } => {
            load_config(&cli, Some(args))?;
            cli::serve::serve()
        }
    }
}

/// Load `wirestate.toml`, apply command-line overrides, install globally.
fn load_config(cli: &Cli, serve: Option<&ServeArgs>) -> Result<Arc<WireConfig>> {
    let mut config = WireConfig::load(&cli.config)?;
    if let Some(args) = serve {
        args.apply(&mut config.serve);
        config.validate()?;
    }
    Ok(init_config(config))
}
