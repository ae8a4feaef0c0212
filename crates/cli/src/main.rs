//! kiln - incremental, concurrent site builds

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod logging;
mod site;

use commands::{BuildArgs, cmd_build, cmd_config_init};
use logging::{init_cli_logging, init_logging};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Incremental, concurrent site builds")]
#[command(after_help = "\
QUICK START:
  kiln config init                # Write a kiln.toml with defaults
  kiln build                      # Build ./ into ./public once
  kiln build --watch              # Rebuild whenever a source changes")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build the site
  Build(BuildArgs),
  /// Configuration management
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[derive(Subcommand)]
enum ConfigCommand {
  /// Create kiln.toml in the current directory
  Init,
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  match cli.command {
    Commands::Build(args) => {
      let config = args.load_config()?;
      let _guard = init_logging(&config.log);
      cmd_build(config, args.slowest).await
    }
    Commands::Config { command } => {
      init_cli_logging();
      match command {
        ConfigCommand::Init => cmd_config_init(),
      }
    }
  }
}
