//! Implementation of the default `forge [TARGETS]...` command.
//!
//! Loads or parses the dependency graph, builds each target in turn and saves the
//! graph back to the database, whether or not the build succeeded.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use forge_lib::execute::BuildReport;

use super::SessionArgs;
use crate::output::{OutputFormat, format_duration, print_error, print_json, print_stat, print_success};

#[derive(Debug, Serialize)]
struct TargetSummary<'a> {
  target: &'a str,
  success: bool,
  elapsed_ms: u128,
  failed: &'a [String],
  skipped: &'a [String],
  types: Vec<TypeSummary>,
}

#[derive(Debug, Serialize)]
struct TypeSummary {
  node_type: &'static str,
  seen: u32,
  built: u32,
  failed: u32,
  cache_hits: u32,
}

/// Build `targets`, returning whether every one succeeded.
pub fn cmd_build(args: &SessionArgs, targets: &[String], output: OutputFormat) -> Result<bool> {
  let (mut session, db_path) = args.open()?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let mut reports = Vec::with_capacity(targets.len());
  for target in targets {
    let report = rt
      .block_on(session.build_report(target))
      .with_context(|| format!("Build of '{}' failed", target))?;
    let stop = !report.success && args.stop_on_error;
    reports.push((target.as_str(), report));
    if stop {
      break;
    }
  }

  session
    .save_dependency_graph(Some(&db_path))
    .with_context(|| format!("Failed to save dependency database: {}", db_path.display()))?;
  info!(path = %db_path.display(), "dependency database saved");

  if output.is_json() {
    let summaries: Vec<_> = reports.iter().map(|(target, report)| summarize(target, report)).collect();
    print_json(&summaries)?;
  } else {
    for (target, report) in &reports {
      print_report(target, report, args.summary);
    }
  }

  Ok(reports.len() == targets.len() && reports.iter().all(|(_, r)| r.success))
}

fn summarize<'a>(target: &'a str, report: &'a BuildReport) -> TargetSummary<'a> {
  TargetSummary {
    target,
    success: report.success,
    elapsed_ms: report.duration.as_millis(),
    failed: &report.failed,
    skipped: &report.skipped,
    types: report
      .stats
      .rows()
      .map(|(ty, s)| TypeSummary {
        node_type: ty.label(),
        seen: s.seen,
        built: s.built,
        failed: s.failed,
        cache_hits: s.cache_hits,
      })
      .collect(),
  }
}

fn print_report(target: &str, report: &BuildReport, summary: bool) {
  let totals = report.stats.totals();
  let elapsed = format_duration(report.duration);
  if report.success {
    print_success(&format!("Built '{}' in {}", target, elapsed));
  } else {
    print_error(&format!("Build of '{}' failed after {}", target, elapsed));
    for name in &report.failed {
      eprintln!("  failed: {}", name);
    }
  }
  print_stat("Nodes", &totals.seen.to_string());
  print_stat("Built", &totals.built.to_string());
  if totals.failed > 0 {
    print_stat("Failed", &totals.failed.to_string());
  }
  if !report.skipped.is_empty() {
    print_stat("Skipped", &report.skipped.len().to_string());
  }
  if totals.cache_hits > 0 {
    print_stat("Cache hits", &totals.cache_hits.to_string());
  }
  if summary {
    println!();
    println!("{}", report.stats.table());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use forge_lib::execute::BuildStats;
  use std::time::Duration;

  #[test]
  fn summary_lists_only_seen_types() {
    let report = BuildReport {
      success: true,
      duration: Duration::from_millis(12),
      stats: BuildStats::default(),
      ..BuildReport::default()
    };
    let summary = summarize("all", &report);
    assert_eq!(summary.target, "all");
    assert_eq!(summary.elapsed_ms, 12);
    assert!(summary.types.is_empty());

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["success"], true);
  }
}
