//! objectlink CLI: serve the demo counter or talk to a running hub.
//!
//! Client commands open one connection, do their work and close it again.
//! Logs go to stderr so command output on stdout stays machine-readable.

mod cli;
mod commands;
mod config;
mod demo;

use crate::cli::{Cli, Commands};
use clap::Parser;
use objectlink_types::LinkConfig;

fn init_tracing_stderr(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// File config, then command-line overrides.
fn resolve_config(cli: &Cli) -> LinkConfig {
    let mut config = config::load_config(cli.config.as_deref());
    if let Some(addr) = cli.addr {
        config.listen_addr = addr;
    }
    if let Some(format) = cli.format {
        config.format = format;
    }
    config
}

fn main() {
    let cli = Cli::parse();

    // The subscriber does not exist yet, so config loading is not logged.
    let config = resolve_config(&cli);
    init_tracing_stderr(&config.log_level);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    let result = rt.block_on(async {
        match cli.command {
            Commands::Serve => commands::cmd_serve(config).await,
            Commands::Get { object_id } => commands::cmd_get(config, &object_id).await,
            Commands::Invoke { symbol_id, args } => {
                commands::cmd_invoke(config, &symbol_id, args.as_deref()).await
            }
            Commands::Set { symbol_id, value } => {
                commands::cmd_set(config, &symbol_id, &value).await
            }
            Commands::Watch { object_id } => commands::cmd_watch(config, &object_id).await,
        }
    });

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
