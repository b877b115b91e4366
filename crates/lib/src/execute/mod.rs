//! Build execution.
//!
//! This module runs a build pass over a [`NodeGraph`](crate::graph::NodeGraph):
//!
//! - [`build`] walks the graph from a target and decides, per node, whether it is up to
//!   date, must run, or is skipped because a build dependency failed
//! - [`NodeExecutor`] performs the actual node actions; [`LocalExecutor`] is the
//!   process/file-system implementation
//! - [`BuildStats`] collects per-type counters for the pass
//!
//! With `workers == 0` every action runs on the calling task in dependency order, which
//! keeps tests and debugging deterministic. Otherwise actions run on blocking worker
//! threads, at most `workers` at a time.

mod engine;
mod executor;
mod local;
mod stats;
mod types;

pub use engine::build;
pub use executor::{ActionOutput, Job, JobContext, JobInput, NodeExecutor};
pub use local::{LocalExecutor, command_line};
pub use stats::{BuildStats, NodeStats};
pub use types::{ActionError, BuildError, BuildOptions, BuildReport};
