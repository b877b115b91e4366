//! Per-type build statistics.

use std::fmt::Write as _;

use tracing::info;

use crate::node::NodeType;

/// Counters for one node type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
  /// Reachable from the target in this pass.
  pub seen: u32,
  /// Action ran and succeeded.
  pub built: u32,
  /// Action ran and failed.
  pub failed: u32,
  /// Built from the cache.
  pub cache_hits: u32,
}

/// Counters for every node type, indexed by type tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
  per_type: [NodeStats; NodeType::ALL.len()],
}

impl BuildStats {
  pub fn get(&self, node_type: NodeType) -> NodeStats {
    self.per_type[node_type.tag() as usize]
  }

  pub(crate) fn entry(&mut self, node_type: NodeType) -> &mut NodeStats {
    &mut self.per_type[node_type.tag() as usize]
  }

  pub fn seen(&self, node_type: NodeType) -> u32 {
    self.get(node_type).seen
  }

  pub fn built(&self, node_type: NodeType) -> u32 {
    self.get(node_type).built
  }

  pub fn failed(&self, node_type: NodeType) -> u32 {
    self.get(node_type).failed
  }

  pub fn cache_hits(&self, node_type: NodeType) -> u32 {
    self.get(node_type).cache_hits
  }

  /// Sum over all types.
  pub fn totals(&self) -> NodeStats {
    self.per_type.iter().fold(NodeStats::default(), |acc, s| NodeStats {
      seen: acc.seen + s.seen,
      built: acc.built + s.built,
      failed: acc.failed + s.failed,
      cache_hits: acc.cache_hits + s.cache_hits,
    })
  }

  /// Rows for types seen in this pass, in type-tag order.
  pub fn rows(&self) -> impl Iterator<Item = (NodeType, NodeStats)> + '_ {
    NodeType::ALL
      .into_iter()
      .map(|ty| (ty, self.get(ty)))
      .filter(|(_, s)| s.seen > 0)
  }

  /// The summary as a fixed-width text table.
  pub fn table(&self) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<10} {:>6} {:>6} {:>6} {:>6}", "Type", "Seen", "Built", "Failed", "Cache");
    for (ty, s) in self.rows() {
      let _ = writeln!(
        out,
        "{:<10} {:>6} {:>6} {:>6} {:>6}",
        ty.label(),
        s.seen,
        s.built,
        s.failed,
        s.cache_hits
      );
    }
    let t = self.totals();
    let _ = write!(
      out,
      "{:<10} {:>6} {:>6} {:>6} {:>6}",
      "Total", t.seen, t.built, t.failed, t.cache_hits
    );
    out
  }

  pub(crate) fn log_summary(&self) {
    for (ty, s) in self.rows() {
      info!(
        node_type = ty.label(),
        seen = s.seen,
        built = s.built,
        failed = s.failed,
        cache_hits = s.cache_hits,
        "build statistics"
      );
    }
    let t = self.totals();
    info!(
      seen = t.seen,
      built = t.built,
      failed = t.failed,
      cache_hits = t.cache_hits,
      "build totals"
    );
  }
}
