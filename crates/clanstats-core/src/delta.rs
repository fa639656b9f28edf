//! Delta engine: signed differences between two summaries.

use crate::{
  metric::Stats,
  snapshot::Snapshot,
  summary::summarize,
};

/// Per-metric `target - baseline`. A non-finite difference is zero.
///
/// Pure and deterministic: the same two summaries always give the same delta,
/// and a summary compared with itself gives the zero record.
pub fn delta(target: &Stats, baseline: &Stats) -> Stats {
  Stats::from_fn(|metric| target.get(metric) - baseline.get(metric))
}

/// Delta between two raw snapshots.
pub fn delta_snapshots(target: &Snapshot, baseline: &Snapshot) -> Stats {
  delta(&summarize(target), &summarize(baseline))
}
