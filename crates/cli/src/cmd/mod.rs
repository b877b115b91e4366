mod build;
mod list;

pub use build::cmd_build;
pub use list::cmd_list;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use forge_lib::execute::BuildOptions;
use forge_lib::session::{InitOutcome, Session, SessionOptions};

/// Options shared by every command that opens a session.
#[derive(Debug, Clone)]
pub struct SessionArgs {
  pub config: PathBuf,
  pub db: Option<PathBuf>,
  pub dir: Option<PathBuf>,
  pub jobs: Option<usize>,
  pub stop_on_error: bool,
  pub cache_read: bool,
  pub cache_write: bool,
  pub summary: bool,
  pub quiet: bool,
}

impl SessionArgs {
  fn working_dir(&self) -> Result<PathBuf> {
    let dir = match &self.dir {
      Some(dir) => dir.clone(),
      None => std::env::current_dir().context("Failed to read current directory")?,
    };
    dunce::canonicalize(&dir).with_context(|| format!("Working directory not found: {}", dir.display()))
  }

  fn session_options(&self) -> Result<SessionOptions> {
    let mut options = SessionOptions::new(self.working_dir()?, &self.config);
    let defaults = BuildOptions::default();
    options.build = BuildOptions {
      workers: self.jobs.unwrap_or(defaults.workers),
      stop_on_first_error: self.stop_on_error,
      cache_read: self.cache_read,
      cache_write: self.cache_write,
      show_summary: self.summary,
      show_errors: !self.quiet,
    };
    Ok(options)
  }

  /// Open and initialize a session, returning the database path in use.
  fn open(&self) -> Result<(Session, PathBuf)> {
    let options = self.session_options()?;
    let db_path = match &self.db {
      Some(db) => options.working_dir.join(db),
      None => options.default_db_path(),
    };

    let mut session = Session::new(options);
    let outcome = session
      .initialize(Some(&db_path))
      .with_context(|| format!("Failed to load configuration: {}", self.config.display()))?;
    if let InitOutcome::Parsed(reason) = outcome {
      debug!(?reason, "configuration parsed");
    }
    Ok((session, db_path))
  }
}
