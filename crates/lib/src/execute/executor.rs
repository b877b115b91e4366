//! The seam between the engine and node actions.
//!
//! The engine never touches the file system itself. For every node it decides to run it
//! builds an owned [`Job`] snapshot and hands it to a [`NodeExecutor`]. Parallel passes
//! run each action as its own task.

use crate::node::{NodeId, NodeKind, NodeType};
use crate::settings::Settings;
use crate::util::hash::Stamp;

use super::types::ActionError;

/// A build dependency as seen by an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInput {
  pub id: NodeId,
  pub name: String,
  pub node_type: NodeType,
  pub stamp: Stamp,
  /// Files found by a directory listing input; empty for other types.
  pub files: Vec<String>,
}

/// Everything an action needs to know about the node it builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
  pub id: NodeId,
  pub name: String,
  pub kind: NodeKind,
  /// Stamp recorded by the last successful build.
  pub stamp: Stamp,
  /// Build dependencies in declaration order.
  pub inputs: Vec<JobInput>,
}

impl Job {
  pub fn node_type(&self) -> NodeType {
    self.kind.node_type()
  }

  pub fn input(&self, id: NodeId) -> Option<&JobInput> {
    self.inputs.iter().find(|i| i.id == id)
  }

  /// Name of the input `id`, or an empty string when it is not a build dependency.
  pub fn input_name(&self, id: NodeId) -> &str {
    self.input(id).map(|i| i.name.as_str()).unwrap_or_default()
  }

  /// Input files in declaration order, with directory listings expanded to their files.
  /// Inputs in `exclude` (a tool executable, say) are left out.
  pub fn input_files(&self, exclude: &[NodeId]) -> Vec<String> {
    let mut files = Vec::new();
    for input in self.inputs.iter().filter(|i| !exclude.contains(&i.id)) {
      match input.node_type {
        NodeType::DirectoryList => files.extend(input.files.iter().cloned()),
        NodeType::Alias => {}
        _ => files.push(input.name.clone()),
      }
    }
    files
  }
}

/// Session-wide state shared by every action of a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobContext {
  pub working_dir: String,
  /// `KEY=VALUE` pairs; when non-empty, child processes get exactly this environment.
  pub environment: Vec<(String, String)>,
  pub cache_path: String,
  pub cache_read: bool,
  pub cache_write: bool,
}

impl JobContext {
  pub fn new(working_dir: impl Into<String>, settings: &Settings, cache_read: bool, cache_write: bool) -> Self {
    Self {
      working_dir: working_dir.into(),
      environment: settings.env_pairs(),
      cache_path: settings.cache_path.clone(),
      cache_read,
      cache_write,
    }
  }

  pub fn cache_enabled(&self) -> bool {
    !self.cache_path.is_empty() && (self.cache_read || self.cache_write)
  }
}

/// What a successful action reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutput {
  /// New stamp of the node.
  pub stamp: Stamp,
  /// Discovered files, for directory listings.
  pub files: Option<Vec<String>>,
  /// The output was retrieved from the cache instead of being produced.
  pub cache_hit: bool,
}

impl ActionOutput {
  pub fn stamped(stamp: Stamp) -> Self {
    Self {
      stamp,
      ..Default::default()
    }
  }
}

/// Performs node actions.
///
/// Actions are spawned onto the runtime when the pass runs in parallel, hence `Send + Sync`.
#[async_trait::async_trait]
pub trait NodeExecutor: Send + Sync {
  /// Run the node's action.
  async fn execute(&self, job: &Job, ctx: &JobContext) -> Result<ActionOutput, ActionError>;

  /// Whether the node's own output still matches its recorded stamp. Only asked for
  /// nodes whose stamp and dependency stamps are otherwise up to date.
  fn output_current(&self, job: &Job, ctx: &JobContext) -> bool {
    let _ = (job, ctx);
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::node::ObjectNode;

  fn input(id: u32, name: &str, node_type: NodeType, files: &[&str]) -> JobInput {
    JobInput {
      id: NodeId(id),
      name: name.to_string(),
      node_type,
      stamp: Stamp(1),
      files: files.iter().map(|f| f.to_string()).collect(),
    }
  }

  #[test]
  fn input_files_expand_directory_listings() {
    let job = Job {
      id: NodeId(9),
      name: "out.lib".to_string(),
      kind: NodeKind::Unity,
      stamp: Stamp::NONE,
      inputs: vec![
        input(0, "/tools/cc", NodeType::Compiler, &[]),
        input(1, "/src/|*.cpp|false|", NodeType::DirectoryList, &["/src/a.cpp", "/src/b.cpp"]),
        input(2, "/src/c.cpp", NodeType::File, &[]),
        input(3, "group", NodeType::Alias, &[]),
      ],
    };
    assert_eq!(
      job.input_files(&[NodeId(0)]),
      vec!["/src/a.cpp".to_string(), "/src/b.cpp".to_string(), "/src/c.cpp".to_string()]
    );
  }

  #[test]
  fn input_name_resolves_referenced_nodes() {
    let job = Job {
      id: NodeId(2),
      name: "a.o".to_string(),
      kind: NodeKind::Object(ObjectNode {
        compiler: NodeId(0),
        source: NodeId(1),
        args: String::new(),
      }),
      stamp: Stamp::NONE,
      inputs: vec![input(0, "cc", NodeType::Compiler, &[]), input(1, "a.cpp", NodeType::File, &[])],
    };
    assert_eq!(job.input_name(NodeId(1)), "a.cpp");
    assert_eq!(job.input_name(NodeId(5)), "");
  }

  #[test]
  fn cache_needs_path_and_a_toggle() {
    let mut ctx = JobContext::default();
    ctx.cache_read = true;
    assert!(!ctx.cache_enabled());
    ctx.cache_path = "/cache".to_string();
    assert!(ctx.cache_enabled());
    ctx.cache_read = false;
    assert!(!ctx.cache_enabled());
  }
}
