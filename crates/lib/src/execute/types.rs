//! Types for node execution.
//!
//! This module defines the options, error and report types shared by the engine and
//! the executors.

use std::time::Duration;

use thiserror::Error;

use crate::consts::ENV_WORKERS;
use crate::node::BuildState;

use super::stats::BuildStats;

/// Errors from a single node action. Recorded against the node, never propagated past
/// the build entry point.
#[derive(Debug, Error)]
pub enum ActionError {
  /// The process could not be started.
  #[error("failed to spawn '{command}': {source}")]
  Spawn {
    command: String,
    #[source]
    source: std::io::Error,
  },

  /// The process exited with an unexpected code.
  #[error("command exited with code {code:?} (expected {expected}): {command}")]
  ExitCode {
    command: String,
    code: Option<i32>,
    expected: i32,
  },

  /// The action finished but its output file is absent.
  #[error("output not produced: {0}")]
  MissingOutput(String),

  /// A required input file is absent.
  #[error("input not found: {0}")]
  MissingInput(String),

  #[error("io error on {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid pattern '{pattern}': {message}")]
  Pattern { pattern: String, message: String },

  #[error("directory walk failed: {0}")]
  Walk(String),
}

impl ActionError {
  pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
    ActionError::Io {
      path: path.into(),
      source,
    }
  }
}

/// Errors that abort a build pass as a whole.
#[derive(Debug, Error)]
pub enum BuildError {
  /// The requested target names no node.
  #[error("unknown build target: {0}")]
  UnknownTarget(String),

  /// A worker task panicked or was cancelled.
  #[error("build worker failed: {0}")]
  Worker(String),
}

/// Options consumed by a build pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
  /// Maximum actions in flight. Zero runs every action on the calling thread in
  /// dependency order.
  pub workers: usize,

  /// Stop scheduling new work after the first failure.
  pub stop_on_first_error: bool,

  /// Allow reading objects from the cache.
  pub cache_read: bool,

  /// Allow writing objects to the cache.
  pub cache_write: bool,

  /// Log the per-type statistics table after the pass.
  pub show_summary: bool,

  /// Log node failures at `error` (otherwise `debug`).
  pub show_errors: bool,
}

impl Default for BuildOptions {
  fn default() -> Self {
    Self {
      workers: default_workers(),
      stop_on_first_error: true,
      cache_read: false,
      cache_write: false,
      show_summary: false,
      show_errors: true,
    }
  }
}

/// `FORGE_WORKERS` when set to a number, otherwise the number of CPUs.
fn default_workers() -> usize {
  std::env::var(ENV_WORKERS)
    .ok()
    .and_then(|v| v.trim().parse().ok())
    .unwrap_or_else(|| std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4))
}

/// Result of one build pass.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
  /// No node failed and the target reached `Built`.
  pub success: bool,

  /// Final state of the requested target.
  pub target_state: BuildState,

  /// Nodes whose action ran and failed, in completion order.
  pub failed: Vec<String>,

  /// Nodes marked failed without running because a build dependency failed.
  pub skipped: Vec<String>,

  /// Per-type counters for this pass.
  pub stats: BuildStats,

  /// Wall-clock time of the pass.
  pub duration: Duration,
}

impl BuildReport {
  pub fn is_success(&self) -> bool {
    self.success
  }
}
