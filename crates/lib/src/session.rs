//! The build session.
//!
//! A [`Session`] decides whether the persisted database can be reused or the
//! configuration must be parsed again, owns the resulting graph and settings, and
//! exposes the build and save entry points.
//!
//! The graph, the settings and the configuration signatures they came from are held
//! together in one state value. Replacing it is the only way settings change, so they
//! can never outlive the configuration that produced them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, ConfigError};
use crate::consts::{DB_EXTENSION, DB_VERSION};
use crate::db::{self, Database, DbError, DbLoad, SourceSignature};
use crate::execute::{self, BuildError, BuildOptions, BuildReport, BuildStats, JobContext, LocalExecutor, NodeExecutor};
use crate::graph::NodeGraph;
use crate::settings::Settings;
use crate::util::hash::hash_file;
use crate::util::path::clean_path_buf;

/// Errors surfaced by the session.
#[derive(Debug, Error)]
pub enum SessionError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Db(#[from] DbError),

  #[error(transparent)]
  Build(#[from] BuildError),

  #[error("session is not initialized")]
  NotInitialized,
}

/// Why the configuration was parsed instead of loading the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseReason {
  NoDatabase,
  VersionChanged,
  DatabaseMoved,
  ConfigChanged,
  Corrupt,
}

/// How [`Session::initialize`] obtained its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
  LoadedDatabase,
  Parsed(ParseReason),
}

/// Options for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
  /// Absolute directory relative paths are resolved against.
  pub working_dir: PathBuf,
  /// Configuration file, absolute or relative to `working_dir`.
  pub config_path: PathBuf,
  pub build: BuildOptions,
}

impl SessionOptions {
  pub fn new(working_dir: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
    Self {
      working_dir: working_dir.into(),
      config_path: config_path.into(),
      build: BuildOptions::default(),
    }
  }

  /// Absolute path of the configuration file.
  pub fn config_location(&self) -> PathBuf {
    PathBuf::from(clean_path_buf(&self.config_path, &self.working_dir))
  }

  /// `<working dir>/<config stem>.fdb`.
  pub fn default_db_path(&self) -> PathBuf {
    let stem = self
      .config_path
      .file_stem()
      .map(|s| s.to_string_lossy().to_string())
      .unwrap_or_else(|| crate::consts::APP_NAME.to_string());
    self.working_dir.join(format!("{stem}.{DB_EXTENSION}"))
  }
}

/// Graph and settings derived from one set of configuration signatures.
#[derive(Debug)]
struct SessionState {
  graph: NodeGraph,
  settings: Settings,
  sources: Vec<SourceSignature>,
}

/// One build session.
pub struct Session {
  options: SessionOptions,
  executor: Arc<dyn NodeExecutor>,
  state: Option<SessionState>,
  stats: BuildStats,
}

impl std::fmt::Debug for Session {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Session")
      .field("options", &self.options)
      .field("state", &self.state)
      .finish_non_exhaustive()
  }
}

impl Session {
  /// A session running actions with the [`LocalExecutor`].
  pub fn new(options: SessionOptions) -> Self {
    Self::with_executor(options, Arc::new(LocalExecutor::new()))
  }

  pub fn with_executor(options: SessionOptions, executor: Arc<dyn NodeExecutor>) -> Self {
    Self {
      options,
      executor,
      state: None,
      stats: BuildStats::default(),
    }
  }

  /// Load the database at `db_path` (default: [`SessionOptions::default_db_path`]) or
  /// parse the configuration.
  ///
  /// An outdated, moved, unreadable or stale database is never an error: it is reported
  /// and the configuration is parsed instead. Configuration errors are fatal and leave
  /// the session uninitialized.
  pub fn initialize(&mut self, db_path: Option<&Path>) -> Result<InitOutcome, SessionError> {
    self.state = None;
    let db_path = db_path
      .map(Path::to_path_buf)
      .unwrap_or_else(|| self.options.default_db_path());
    let working_dir = self.working_dir_str();

    let reason = match db::load(&db_path, &working_dir) {
      Ok(DbLoad::Loaded(db)) => match self.changed_source(&db) {
        None => {
          let Database {
            graph,
            settings,
            sources,
            ..
          } = *db;
          info!(path = %db_path.display(), nodes = graph.len(), "loaded dependency graph");
          self.state = Some(SessionState {
            graph,
            settings,
            sources,
          });
          return Ok(InitOutcome::LoadedDatabase);
        }
        Some(file) => {
          warn!("{} has changed (reparsing will occur)", file);
          ParseReason::ConfigChanged
        }
      },
      Ok(DbLoad::Missing) => {
        info!(path = %db_path.display(), "no dependency database, parsing configuration");
        ParseReason::NoDatabase
      }
      Ok(DbLoad::VersionMismatch { found }) => {
        warn!(found, expected = DB_VERSION, "Database version has changed");
        ParseReason::VersionChanged
      }
      Ok(DbLoad::Relocated { saved_at }) => {
        warn!(saved_at = %saved_at, path = %db_path.display(), "Database has been moved");
        ParseReason::DatabaseMoved
      }
      Err(e) => {
        warn!(path = %db_path.display(), error = %e, "Database is unreadable, ignoring it");
        ParseReason::Corrupt
      }
    };

    self.parse()?;
    Ok(InitOutcome::Parsed(reason))
  }

  /// The first configuration source whose signature no longer matches, or the current
  /// configuration path when the database was built from a different one.
  fn changed_source(&self, db: &Database) -> Option<String> {
    let config = self.options.config_location().to_string_lossy().to_string();
    if !db.sources.iter().any(|s| s.path == config) {
      return Some(config);
    }
    db.sources
      .iter()
      .find(|source| match hash_file(Path::new(&source.path)) {
        Ok(current) => current != source.signature,
        Err(_) => true,
      })
      .map(|source| source.path.clone())
  }

  fn parse(&mut self) -> Result<(), SessionError> {
    let location = self.options.config_location();
    let config = Config::load(&location)?;

    let mut graph = NodeGraph::new(self.working_dir_str());
    config.manifest.declare(&mut graph)?;
    info!(path = %location.display(), nodes = graph.len(), "parsed configuration");

    self.state = Some(SessionState {
      graph,
      settings: config.manifest.settings,
      sources: vec![SourceSignature {
        path: location.to_string_lossy().to_string(),
        signature: config.signature,
      }],
    });
    Ok(())
  }

  /// Build `target`, returning whether it succeeded.
  pub async fn build(&mut self, target: &str) -> Result<bool, SessionError> {
    Ok(self.build_report(target).await?.success)
  }

  /// Build `target`, returning the full report.
  ///
  /// The previous pass's statistics are cleared first, so an aborted pass leaves them
  /// empty.
  pub async fn build_report(&mut self, target: &str) -> Result<BuildReport, SessionError> {
    self.stats = BuildStats::default();
    let working_dir = self.working_dir_str();
    let state = self.state.as_mut().ok_or(SessionError::NotInitialized)?;
    let options = &self.options.build;
    let ctx = JobContext::new(working_dir, &state.settings, options.cache_read, options.cache_write);

    let report = execute::build(
      &mut state.graph,
      target,
      options,
      Arc::clone(&self.executor),
      Arc::new(ctx),
    )
    .await?;
    self.stats = report.stats.clone();
    Ok(report)
  }

  /// Persist graph, settings and configuration signatures to `db_path` (default:
  /// [`SessionOptions::default_db_path`]).
  pub fn save_dependency_graph(&self, db_path: Option<&Path>) -> Result<(), SessionError> {
    let state = self.state.as_ref().ok_or(SessionError::NotInitialized)?;
    let db_path = db_path
      .map(Path::to_path_buf)
      .unwrap_or_else(|| self.options.default_db_path());
    db::save(&db_path, &state.sources, &state.settings, &state.graph)?;
    Ok(())
  }

  pub fn options(&self) -> &SessionOptions {
    &self.options
  }

  pub fn is_initialized(&self) -> bool {
    self.state.is_some()
  }

  pub fn graph(&self) -> Option<&NodeGraph> {
    self.state.as_ref().map(|s| &s.graph)
  }

  pub fn settings(&self) -> Option<&Settings> {
    self.state.as_ref().map(|s| &s.settings)
  }

  /// Statistics of the last build pass.
  pub fn stats(&self) -> &BuildStats {
    &self.stats
  }

  pub fn cache_path(&self) -> &str {
    self.settings().map(|s| s.cache_path.as_str()).unwrap_or_default()
  }

  pub fn environment(&self) -> &[String] {
    self.settings().map(|s| s.environment.as_slice()).unwrap_or_default()
  }

  pub fn workers(&self) -> &[String] {
    self.settings().map(|s| s.workers.as_slice()).unwrap_or_default()
  }

  fn working_dir_str(&self) -> String {
    self.options.working_dir.to_string_lossy().to_string()
  }
}
