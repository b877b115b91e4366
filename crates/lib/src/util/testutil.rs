//! Test utilities for forge-lib.
//!
//! Command helpers for tests that run real tools, and a scripted executor for tests
//! that only care about scheduling.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::execute::{ActionError, ActionOutput, Job, JobContext, NodeExecutor};
use crate::node::NodeType;
use crate::util::hash::Stamp;

/// Tool that copies its first argument to its second.
#[cfg(unix)]
pub const COPY_TOOL: &str = "/bin/cp";

/// Tool that always exits non-zero.
#[cfg(unix)]
pub const FAILING_TOOL: &str = "/bin/false";

/// Executor that never touches the file system.
///
/// File and compiler nodes report a configurable stamp (1 by default); every other node
/// reports a stamp derived from its name and its inputs' stamps. Nodes whose name
/// contains one of the `fail` fragments fail.
#[derive(Default)]
pub struct ScriptedExecutor {
  fail: Vec<String>,
  stamps: Mutex<HashMap<String, Stamp>>,
  dropped: Mutex<HashSet<String>>,
  calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
  pub fn failing(fragments: &[&str]) -> Self {
    Self {
      fail: fragments.iter().map(|f| f.to_string()).collect(),
      ..Default::default()
    }
  }

  /// Stamp reported for a leaf node from now on.
  pub fn set_stamp(&self, name: &str, stamp: Stamp) {
    self.stamps.lock().unwrap().insert(name.to_string(), stamp);
  }

  /// Pretend the node's output vanished until it runs again.
  pub fn drop_output(&self, name: &str) {
    self.dropped.lock().unwrap().insert(name.to_string());
  }

  /// Names of executed nodes, in call order.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait::async_trait]
impl NodeExecutor for ScriptedExecutor {
  async fn execute(&self, job: &Job, _ctx: &JobContext) -> Result<ActionOutput, ActionError> {
    self.calls.lock().unwrap().push(job.name.clone());
    if self.fail.iter().any(|f| job.name.contains(f.as_str())) {
      return Err(ActionError::MissingOutput(job.name.clone()));
    }
    self.dropped.lock().unwrap().remove(&job.name);

    let stamp = match job.node_type() {
      NodeType::File | NodeType::Compiler => self.stamps.lock().unwrap().get(&job.name).copied().unwrap_or(Stamp(1)),
      _ => Stamp::combine(
        std::iter::once(Stamp::of_bytes(job.name.as_bytes())).chain(job.inputs.iter().map(|i| i.stamp)),
      ),
    };
    Ok(ActionOutput::stamped(stamp))
  }

  fn output_current(&self, job: &Job, _ctx: &JobContext) -> bool {
    !self.dropped.lock().unwrap().contains(&job.name)
  }
}
