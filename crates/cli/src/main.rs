mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use forge_lib::consts::DEFAULT_CONFIG_FILE;

use crate::output::OutputFormat;

/// forge - incremental dependency-graph builder
#[derive(Parser, Debug)]
#[command(name = "forge")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Targets to build
  #[arg(default_value = "all")]
  targets: Vec<String>,

  /// Configuration file, relative to the working directory
  #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
  config: PathBuf,

  /// Dependency database (default: <config stem>.fdb in the working directory)
  #[arg(long)]
  db: Option<PathBuf>,

  /// Working directory (default: current directory)
  #[arg(short = 'C', long = "dir")]
  dir: Option<PathBuf>,

  /// Number of parallel workers; 0 runs every action in order on one thread
  #[arg(short = 'j', long = "jobs")]
  jobs: Option<usize>,

  /// Keep building independent nodes after a failure
  #[arg(long)]
  no_stop_on_error: bool,

  /// Read objects from the cache
  #[arg(long)]
  cache_read: bool,

  /// Write objects to the cache
  #[arg(long)]
  cache_write: bool,

  /// Print per-type build statistics
  #[arg(long)]
  summary: bool,

  /// Do not report individual node failures
  #[arg(short, long)]
  quiet: bool,

  /// List the nodes of the graph instead of building
  #[arg(long)]
  list: bool,

  /// Output format
  #[arg(short, long, value_enum, default_value_t)]
  output: OutputFormat,

  /// Enable verbose output
  #[arg(short, long)]
  verbose: bool,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let args = cmd::SessionArgs {
    config: cli.config,
    db: cli.db,
    dir: cli.dir,
    jobs: cli.jobs,
    stop_on_error: !cli.no_stop_on_error,
    cache_read: cli.cache_read,
    cache_write: cli.cache_write,
    summary: cli.summary,
    quiet: cli.quiet,
  };

  if cli.list {
    cmd::cmd_list(&args, cli.output)
  } else {
    let success = cmd::cmd_build(&args, &cli.targets, cli.output)?;
    if !success {
      std::process::exit(1);
    }
    Ok(())
  }
}
