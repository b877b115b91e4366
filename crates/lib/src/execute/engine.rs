//! The build pass.
//!
//! A pass walks the graph depth-first from the target, then runs every reachable node
//! whose build dependencies have all reached a terminal state. The coordinator (the task
//! calling [`build`]) owns the graph for the whole pass: workers receive owned [`Job`]
//! snapshots and send back results, and only the coordinator writes states, stamps and
//! counters.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::graph::NodeGraph;
use crate::node::{BuildState, NodeId, NodeKind};
use crate::util::hash::Stamp;

use super::executor::{ActionOutput, Job, JobContext, JobInput, NodeExecutor};
use super::stats::BuildStats;
use super::types::{ActionError, BuildError, BuildOptions, BuildReport};

/// Build `target` and everything it reaches.
///
/// Node failures are recorded in the report; only an unknown target or a crashed worker
/// is an `Err`.
pub async fn build(
  graph: &mut NodeGraph,
  target: &str,
  options: &BuildOptions,
  executor: Arc<dyn NodeExecutor>,
  ctx: Arc<JobContext>,
) -> Result<BuildReport, BuildError> {
  let root = graph
    .find(target)
    .ok_or_else(|| BuildError::UnknownTarget(target.to_string()))?;
  let started = Instant::now();

  graph.reset_build_state();
  let order = post_order(graph, root);

  let mut pass = Pass {
    graph,
    options,
    executor,
    ctx,
    stats: BuildStats::default(),
    failed: Vec::new(),
    skipped: Vec::new(),
    stopped: false,
  };
  for &id in &order {
    let node_type = pass.graph.node(id).node_type();
    pass.stats.entry(node_type).seen += 1;
  }

  info!(
    target = %pass.graph.node(root).name(),
    nodes = order.len(),
    workers = options.workers,
    "starting build"
  );

  if options.workers == 0 {
    pass.run_inline(&order).await;
  } else {
    pass.run_parallel(&order).await?;
  }

  let target_state = pass.graph.node(root).state();
  let success = pass.failed.is_empty() && pass.skipped.is_empty() && target_state == BuildState::Built;
  let duration = started.elapsed();

  if options.show_summary {
    pass.stats.log_summary();
  }
  let totals = pass.stats.totals();
  info!(
    success,
    built = totals.built,
    failed = totals.failed,
    skipped = pass.skipped.len(),
    elapsed_ms = duration.as_millis() as u64,
    "build finished"
  );

  Ok(BuildReport {
    success,
    target_state,
    failed: pass.failed,
    skipped: pass.skipped,
    stats: pass.stats,
    duration,
  })
}

/// Reachable nodes, dependencies before dependents, each once. Follows build and weak
/// edges in declaration order.
fn post_order(graph: &NodeGraph, root: NodeId) -> Vec<NodeId> {
  let mut visited = vec![false; graph.len()];
  let mut order = Vec::new();
  let mut stack = vec![(root, 0usize)];
  visited[root.index()] = true;

  while let Some(top) = stack.last_mut() {
    let (id, next) = *top;
    let deps = graph.node(id).dependencies();
    if next < deps.len() {
      top.1 += 1;
      let dep = deps[next].node;
      if !visited[dep.index()] {
        visited[dep.index()] = true;
        stack.push((dep, 0));
      }
    } else {
      stack.pop();
      order.push(id);
    }
  }
  order
}

enum Step {
  DependencyFailed,
  UpToDate,
  Run(Job),
}

struct Pass<'a> {
  graph: &'a mut NodeGraph,
  options: &'a BuildOptions,
  executor: Arc<dyn NodeExecutor>,
  ctx: Arc<JobContext>,
  stats: BuildStats,
  failed: Vec<String>,
  skipped: Vec<String>,
  stopped: bool,
}

impl Pass<'_> {
  async fn run_inline(&mut self, order: &[NodeId]) {
    for &id in order {
      if self.stopped {
        debug!("stop on first error: abandoning remaining nodes");
        break;
      }
      if let Some(job) = self.claim(id) {
        let result = self.executor.execute(&job, &self.ctx).await;
        self.complete(id, result);
      }
    }
  }

  async fn run_parallel(&mut self, order: &[NodeId]) -> Result<(), BuildError> {
    let mut reachable = vec![false; self.graph.len()];
    for &id in order {
      reachable[id.index()] = true;
    }

    // Unresolved build dependencies per node, and the reverse build edges.
    let mut pending = vec![0usize; self.graph.len()];
    let mut dependents: Vec<Vec<NodeId>> = vec![Vec::new(); self.graph.len()];
    for &id in order {
      let mut deps: Vec<NodeId> = self.graph.node(id).build_dependencies().map(|d| d.node).collect();
      deps.sort();
      deps.dedup();
      for dep in deps.into_iter().filter(|d| reachable[d.index()]) {
        pending[id.index()] += 1;
        dependents[dep.index()].push(id);
      }
    }

    let mut ready: VecDeque<NodeId> = order.iter().copied().filter(|id| pending[id.index()] == 0).collect();
    let mut join_set: JoinSet<(NodeId, Result<ActionOutput, ActionError>)> = JoinSet::new();
    let mut in_flight = 0usize;

    loop {
      while !self.stopped && in_flight < self.options.workers {
        let Some(id) = ready.pop_front() else {
          break;
        };
        match self.claim(id) {
          Some(job) => {
            let executor = Arc::clone(&self.executor);
            let ctx = Arc::clone(&self.ctx);
            join_set.spawn(async move {
              let result = executor.execute(&job, &ctx).await;
              (job.id, result)
            });
            in_flight += 1;
          }
          None => release(id, &dependents, &mut pending, &mut ready),
        }
      }

      if in_flight == 0 {
        break;
      }

      match join_set.join_next().await {
        Some(Ok((id, result))) => {
          in_flight -= 1;
          self.complete(id, result);
          release(id, &dependents, &mut pending, &mut ready);
        }
        Some(Err(e)) => {
          error!(error = %e, "build worker panicked");
          return Err(BuildError::Worker(e.to_string()));
        }
        None => break,
      }
    }

    if self.stopped && !ready.is_empty() {
      debug!(abandoned = ready.len(), "stop on first error: abandoning ready nodes");
    }
    Ok(())
  }

  /// Move a node to `Building` and decide what to do with it. Returns the job when the
  /// action must run; otherwise the node is already terminal.
  fn claim(&mut self, id: NodeId) -> Option<Job> {
    self.graph.node_mut(id).state = BuildState::Building;
    match self.prepare(id) {
      Step::DependencyFailed => {
        self.skip(id);
        None
      }
      Step::UpToDate => {
        debug!(node = %self.graph.node(id).name(), "up to date");
        self.graph.node_mut(id).state = BuildState::Built;
        None
      }
      Step::Run(job) => Some(job),
    }
  }

  fn prepare(&self, id: NodeId) -> Step {
    let graph = &*self.graph;
    let node = graph.node(id);
    if node
      .build_dependencies()
      .any(|d| graph.node(d.node).state() == BuildState::Failed)
    {
      return Step::DependencyFailed;
    }

    let job = self.job(id);
    if node.node_type().always_builds() {
      return Step::Run(job);
    }

    let up_to_date = !node.stamp().is_none()
      && node
        .build_dependencies()
        .all(|d| d.stamp == graph.node(d.node).stamp())
      && self.executor.output_current(&job, &self.ctx);

    if up_to_date { Step::UpToDate } else { Step::Run(job) }
  }

  fn job(&self, id: NodeId) -> Job {
    let node = self.graph.node(id);
    let mut inputs: Vec<JobInput> = Vec::new();
    for dep in node.build_dependencies() {
      if inputs.iter().any(|i| i.id == dep.node) {
        continue;
      }
      let input = self.graph.node(dep.node);
      inputs.push(JobInput {
        id: dep.node,
        name: input.name().to_string(),
        node_type: input.node_type(),
        stamp: input.stamp(),
        files: input.files().to_vec(),
      });
    }
    Job {
      id,
      name: node.name().to_string(),
      kind: node.kind().clone(),
      stamp: node.stamp(),
      inputs,
    }
  }

  fn skip(&mut self, id: NodeId) {
    let node = self.graph.node_mut(id);
    node.state = BuildState::Failed;
    if self.options.show_errors {
      warn!(node = %node.name, "skipped: a dependency failed");
    } else {
      debug!(node = %node.name, "skipped: a dependency failed");
    }
    self.skipped.push(node.name.clone());
  }

  fn complete(&mut self, id: NodeId, result: Result<ActionOutput, ActionError>) {
    let node_type = self.graph.node(id).node_type();
    match result {
      Ok(output) => {
        let dep_stamps: Vec<Stamp> = self
          .graph
          .node(id)
          .dependencies()
          .iter()
          .map(|d| if d.is_build() { self.graph.node(d.node).stamp() } else { d.stamp })
          .collect();

        let node = self.graph.node_mut(id);
        for (dep, stamp) in node.dependencies.iter_mut().zip(dep_stamps) {
          dep.stamp = stamp;
        }
        node.stamp = output.stamp;
        if let (Some(files), NodeKind::DirectoryList(list)) = (output.files, &mut node.kind) {
          list.files = files;
        }
        node.state = BuildState::Built;
        debug!(node = %node.name, stamp = %node.stamp, cache_hit = output.cache_hit, "built");

        let entry = self.stats.entry(node_type);
        entry.built += 1;
        if output.cache_hit {
          entry.cache_hits += 1;
        }
      }
      Err(e) => {
        let node = self.graph.node_mut(id);
        node.state = BuildState::Failed;
        if self.options.show_errors {
          error!(node = %node.name, node_type = %node_type, error = %e, "node failed");
        } else {
          debug!(node = %node.name, node_type = %node_type, error = %e, "node failed");
        }
        self.failed.push(node.name.clone());
        self.stats.entry(node_type).failed += 1;
        if self.options.stop_on_first_error {
          self.stopped = true;
        }
      }
    }
  }
}

fn release(id: NodeId, dependents: &[Vec<NodeId>], pending: &mut [usize], ready: &mut VecDeque<NodeId>) {
  for &dependent in &dependents[id.index()] {
    pending[dependent.index()] -= 1;
    if pending[dependent.index()] == 0 {
      ready.push_back(dependent);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::node::{DepKind, NodeType};
  use crate::util::testutil::ScriptedExecutor;
  use tracing_test::traced_test;

  fn options(workers: usize, stop_on_first_error: bool) -> BuildOptions {
    BuildOptions {
      workers,
      stop_on_first_error,
      ..BuildOptions::default()
    }
  }

  /// 4 objects, 2 libraries over 2 objects each, 1 alias over both libraries.
  fn four_objects(graph: &mut NodeGraph) {
    let cc = graph.create_compiler_node("cc").unwrap();
    let mut objects = Vec::new();
    for i in 1..=4 {
      let src = graph.create_file_node(&format!("src/file{i}.cpp")).unwrap();
      objects.push(graph.create_object_node(&format!("out/file{i}.o"), cc, src, "").unwrap());
    }
    let lib1 = graph.create_library_node("out/lib1.a", "ar", "", &objects[..2]).unwrap();
    let lib2 = graph.create_library_node("out/lib2.a", "ar", "", &objects[2..]).unwrap();
    graph.create_alias_node("all", &[lib1, lib2]).unwrap();
  }

  async fn run(graph: &mut NodeGraph, target: &str, options: &BuildOptions, executor: &Arc<ScriptedExecutor>) -> BuildReport {
    let executor: Arc<dyn NodeExecutor> = executor.clone();
    build(graph, target, options, executor, Arc::new(JobContext::default()))
      .await
      .unwrap()
  }

  #[tokio::test]
  async fn stop_on_first_error_fails_one_object() {
    let mut graph = NodeGraph::new("/work");
    four_objects(&mut graph);
    let executor = Arc::new(ScriptedExecutor::failing(&[".o"]));

    let report = run(&mut graph, "all", &options(0, true), &executor).await;

    assert!(!report.success);
    assert_eq!(report.stats.failed(NodeType::Object), 1);
    assert_eq!(report.stats.seen(NodeType::Object), 4);
    assert_eq!(report.stats.seen(NodeType::Library), 2);
    assert_eq!(report.stats.seen(NodeType::Alias), 1);
    assert_eq!(report.stats.built(NodeType::Library), 0);
    assert_eq!(report.stats.built(NodeType::Alias), 0);
    assert_eq!(report.stats.built(NodeType::Object), 0);
  }

  #[tokio::test]
  async fn continue_on_error_fails_every_object() {
    let mut graph = NodeGraph::new("/work");
    four_objects(&mut graph);
    let executor = Arc::new(ScriptedExecutor::failing(&[".o"]));

    let report = run(&mut graph, "all", &options(0, false), &executor).await;

    assert!(!report.success);
    assert_eq!(report.stats.failed(NodeType::Object), 4);
    assert_eq!(report.stats.failed(NodeType::Library), 0);
    assert_eq!(report.stats.seen(NodeType::Object), 4);
    assert_eq!(report.stats.seen(NodeType::Library), 2);
    assert_eq!(report.stats.seen(NodeType::Alias), 1);
    assert_eq!(report.stats.built(NodeType::Library), 0);
    assert_eq!(report.stats.built(NodeType::Alias), 0);
    assert_eq!(report.failed.len(), 4);
    assert_eq!(report.skipped.len(), 3);
    assert_eq!(report.target_state, BuildState::Failed);
  }

  #[tokio::test]
  async fn continue_on_error_counts_match_in_parallel() {
    let mut graph = NodeGraph::new("/work");
    four_objects(&mut graph);
    let executor = Arc::new(ScriptedExecutor::failing(&[".o"]));

    let report = run(&mut graph, "all", &options(4, false), &executor).await;

    assert_eq!(report.stats.failed(NodeType::Object), 4);
    assert_eq!(report.stats.seen(NodeType::Library), 2);
    assert_eq!(report.stats.built(NodeType::Library), 0);
    assert_eq!(report.skipped.len(), 3);
  }

  #[tokio::test]
  async fn stop_on_first_error_in_parallel_stops_scheduling() {
    let mut graph = NodeGraph::new("/work");
    four_objects(&mut graph);
    let executor = Arc::new(ScriptedExecutor::failing(&[".o"]));

    let report = run(&mut graph, "all", &options(1, true), &executor).await;

    assert_eq!(report.stats.failed(NodeType::Object), 1);
    assert_eq!(report.stats.built(NodeType::Library), 0);
    assert!(report.skipped.is_empty());
  }

  /// Holds object jobs until `width` of them are running, so sibling failures land
  /// while each other is still in flight.
  struct Rendezvous {
    inner: ScriptedExecutor,
    barrier: tokio::sync::Barrier,
  }

  #[async_trait::async_trait]
  impl NodeExecutor for Rendezvous {
    async fn execute(&self, job: &Job, ctx: &JobContext) -> Result<ActionOutput, ActionError> {
      if job.node_type() == NodeType::Object {
        self.barrier.wait().await;
      }
      self.inner.execute(job, ctx).await
    }
  }

  #[tokio::test]
  async fn stop_on_first_error_counts_every_started_sibling() {
    let mut graph = NodeGraph::new("/work");
    let cc = graph.create_compiler_node("cc").unwrap();
    let a = graph.create_file_node("src/a.cpp").unwrap();
    let b = graph.create_file_node("src/b.cpp").unwrap();
    let a_obj = graph.create_object_node("out/a.o", cc, a, "").unwrap();
    let b_obj = graph.create_object_node("out/b.o", cc, b, "").unwrap();
    let lib = graph.create_library_node("out/lib.a", "ar", "", &[a_obj, b_obj]).unwrap();

    let executor = Arc::new(Rendezvous {
      inner: ScriptedExecutor::failing(&[".o"]),
      barrier: tokio::sync::Barrier::new(2),
    });
    let report = build(
      &mut graph,
      "out/lib.a",
      &options(2, true),
      executor.clone(),
      Arc::new(JobContext::default()),
    )
    .await
    .unwrap();

    let calls = executor.inner.calls();
    let started = calls.iter().filter(|c| c.ends_with(".o")).count();
    assert_eq!(started, 2);
    assert_eq!(report.stats.failed(NodeType::Object) as usize, started);
    assert_eq!(report.failed.len(), started);
    assert!(!calls.iter().any(|c| c.ends_with("lib.a")));
    assert_eq!(report.stats.built(NodeType::Library), 0);
    assert_eq!(graph.node(lib).state(), BuildState::NotProcessed);
    assert!(!report.success);
  }

  #[tokio::test]
  async fn successful_build_then_noop_rebuild() {
    let mut graph = NodeGraph::new("/work");
    four_objects(&mut graph);
    let executor = Arc::new(ScriptedExecutor::default());

    let first = run(&mut graph, "all", &options(0, true), &executor).await;
    assert!(first.success);
    assert_eq!(first.stats.built(NodeType::Object), 4);
    assert_eq!(first.stats.built(NodeType::Library), 2);
    assert_eq!(first.stats.built(NodeType::Alias), 1);

    let second = run(&mut graph, "all", &options(4, true), &executor).await;
    assert!(second.success);
    assert_eq!(second.stats.built(NodeType::Object), 0);
    assert_eq!(second.stats.built(NodeType::Library), 0);
    assert_eq!(second.stats.built(NodeType::Alias), 0);
    // Leaf observers run every pass.
    assert_eq!(second.stats.built(NodeType::File), 4);
  }

  #[tokio::test]
  async fn changed_input_rebuilds_only_its_chain() {
    let mut graph = NodeGraph::new("/work");
    four_objects(&mut graph);
    let executor = Arc::new(ScriptedExecutor::default());
    run(&mut graph, "all", &options(0, true), &executor).await;

    let src = graph.node(graph.find("src/file1.cpp").unwrap()).name().to_string();
    executor.set_stamp(&src, Stamp(99));
    let report = run(&mut graph, "all", &options(0, true), &executor).await;

    assert!(report.success);
    assert_eq!(report.stats.built(NodeType::Object), 1);
    assert_eq!(report.stats.built(NodeType::Library), 1);
    assert_eq!(report.stats.built(NodeType::Alias), 1);
  }

  #[tokio::test]
  async fn missing_output_forces_rebuild() {
    let mut graph = NodeGraph::new("/work");
    four_objects(&mut graph);
    let executor = Arc::new(ScriptedExecutor::default());
    run(&mut graph, "all", &options(0, true), &executor).await;

    let obj = graph.node(graph.find("out/file3.o").unwrap()).name().to_string();
    executor.drop_output(&obj);
    let report = run(&mut graph, "all", &options(0, true), &executor).await;
    assert_eq!(report.stats.built(NodeType::Object), 1);
  }

  #[tokio::test]
  async fn dependencies_run_before_dependents_in_parallel() {
    let mut graph = NodeGraph::new("/work");
    four_objects(&mut graph);
    let executor = Arc::new(ScriptedExecutor::default());
    run(&mut graph, "all", &options(8, true), &executor).await;

    let calls = executor.calls();
    for (id, node) in graph.iter() {
      let Some(at) = calls.iter().position(|c| c == node.name()) else {
        continue;
      };
      for dep in graph.dependency_ids(id, Some(DepKind::Build)) {
        let dep_at = calls.iter().position(|c| c == graph.node(dep).name()).unwrap();
        assert!(dep_at < at, "{} ran before its dependency", node.name());
      }
    }
  }

  #[tokio::test]
  async fn weak_dependency_does_not_gate() {
    let mut graph = NodeGraph::new("/work");
    let broken = graph.create_alias_node("broken-tool", &[]).unwrap();
    let target = graph.create_alias_node("target", &[]).unwrap();
    graph.add_dependency(target, broken, DepKind::Weak).unwrap();
    let executor = Arc::new(ScriptedExecutor::failing(&["broken"]));

    let report = run(&mut graph, "target", &options(0, false), &executor).await;

    assert_eq!(graph.node(target).state(), BuildState::Built);
    assert_eq!(graph.node(broken).state(), BuildState::Failed);
    assert_eq!(report.stats.seen(NodeType::Alias), 2);
    assert!(!report.success);
  }

  #[tokio::test]
  async fn missing_file_builds_successfully() {
    let mut graph = NodeGraph::new("/work");
    let file = graph.create_file_node("does/not/exist.cpp").unwrap();
    let executor = Arc::new(ScriptedExecutor::default());
    executor.set_stamp(graph.node(file).name(), Stamp::NONE);

    let name = graph.node(file).name().to_string();
    let report = run(&mut graph, &name, &options(0, true), &executor).await;

    assert!(report.success);
    assert_eq!(report.stats.built(NodeType::File), 1);
    assert!(graph.node(file).stamp().is_none());
  }

  #[tokio::test]
  async fn deep_chain_builds_without_recursion() {
    let mut graph = NodeGraph::new("/work");
    let mut prev = graph.create_alias_node("n0", &[]).unwrap();
    for i in 1..5000 {
      prev = graph.create_alias_node(&format!("n{i}"), &[prev]).unwrap();
    }
    let executor = Arc::new(ScriptedExecutor::default());
    let report = run(&mut graph, "n4999", &options(0, true), &executor).await;
    assert!(report.success);
    assert_eq!(report.stats.built(NodeType::Alias), 5000);
  }

  #[tokio::test]
  async fn unknown_target_is_an_error() {
    let mut graph = NodeGraph::new("/work");
    let executor: Arc<dyn NodeExecutor> = Arc::new(ScriptedExecutor::default());
    let err = build(
      &mut graph,
      "nope",
      &options(0, true),
      executor,
      Arc::new(JobContext::default()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, BuildError::UnknownTarget(name) if name == "nope"));
  }

  #[tokio::test]
  #[traced_test]
  async fn summary_is_logged_when_requested() {
    let mut graph = NodeGraph::new("/work");
    four_objects(&mut graph);
    let executor = Arc::new(ScriptedExecutor::default());
    let options = BuildOptions {
      show_summary: true,
      ..options(0, true)
    };
    run(&mut graph, "all", &options, &executor).await;
    assert!(logs_contain("build statistics"));
    assert!(logs_contain("Library"));
  }
}
