mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bari_lib::consts::SUITE_FILE;

use crate::cmd::{BuildOptions, cmd_build, cmd_clean};
use crate::output::{OutputFormat, print_error};

/// bari - build orchestrator for multi-module software suites
#[derive(Parser)]
#[command(name = "bari")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Path to the suite manifest
  #[arg(long, global = true, default_value = SUITE_FILE)]
  suite: PathBuf,

  /// Build goal (defaults to the first goal declared by the suite)
  #[arg(long, global = true)]
  goal: Option<String>,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build the suite, a module, or a single project
  Build {
    /// `Module` or `Module.Project` (default: the whole suite)
    target: Option<String>,

    /// Write the builder graph to target/builders.<stage>.dot instead of building
    #[arg(long)]
    dump: bool,

    /// Number of builders to run in parallel
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Remove build outputs and the goal's cache
  Clean {
    /// Keep the build cache
    #[arg(long)]
    keep_cache: bool,
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

  let result = match cli.command {
    Commands::Build {
      target,
      dump,
      jobs,
      output,
    } => cmd_build(
      &cli.suite,
      cli.goal.as_deref(),
      BuildOptions {
        target,
        dump,
        jobs,
        output,
        verbose: cli.verbose,
      },
    ),
    Commands::Clean { keep_cache } => cmd_clean(&cli.suite, cli.goal.as_deref(), keep_cache),
  };

  match result {
    Ok(code) => code,
    Err(e) => {
      print_error(&format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}
