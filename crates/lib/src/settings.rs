//! Settings derived from the build configuration.
//!
//! Settings belong to the configuration signature that produced them. The session only
//! ever holds them next to the graph parsed from that same configuration, so a
//! configuration change drops both together.

use serde::{Deserialize, Serialize};

/// Cache location, child-process environment block and distributed-worker list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// Directory of the object cache; empty disables caching.
  pub cache_path: String,
  /// `KEY=VALUE` entries. When non-empty, child processes see exactly this environment.
  pub environment: Vec<String>,
  /// Remote worker host names. Stored and persisted only.
  pub workers: Vec<String>,
}

impl Settings {
  pub fn is_empty(&self) -> bool {
    self.cache_path.is_empty() && self.environment.is_empty() && self.workers.is_empty()
  }

  /// Environment block split into key/value pairs. Entries without `=` get an empty
  /// value.
  pub fn env_pairs(&self) -> Vec<(String, String)> {
    self
      .environment
      .iter()
      .map(|entry| match entry.split_once('=') {
        Some((key, value)) => (key.to_string(), value.to_string()),
        None => (entry.clone(), String::new()),
      })
      .collect()
  }
}
