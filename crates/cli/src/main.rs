mod cmd;
mod output;
mod watch;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wasmpipe_lib::consts::CONFIG_FILENAME;

use crate::cmd::BuildArgs;
use crate::output::{OutputFormat, print_error};

/// wasmpipe - build web front-ends with a native WebAssembly module
#[derive(Parser)]
#[command(name = "wasmpipe")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging (RUST_LOG takes precedence)
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build the project described by a config file
  Build(BuildArgs),

  /// Show resolved configuration and cache paths
  Info {
    /// Path to the config file
    #[arg(short, long, default_value = CONFIG_FILENAME)]
    config: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match run(cli) {
    Ok(code) => code,
    Err(e) => {
      print_error(&format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}

fn run(cli: Cli) -> Result<ExitCode> {
  match cli.command {
    Commands::Build(args) => cmd::cmd_build(args),
    Commands::Info { config, output } => cmd::cmd_info(&config, output).map(|()| ExitCode::SUCCESS),
  }
}
