//! Aggregation engine: point-in-time summaries of a snapshot's roster.

use crate::{
  metric::{Aggregation, Metric, Stats},
  record::Member,
  snapshot::Snapshot,
};

/// Summarise a snapshot. A snapshot without a roster yields the zero summary.
pub fn summarize(snapshot: &Snapshot) -> Stats { summarize_roster(&snapshot.roster()) }

/// Summarise a roster according to the metric declaration table.
///
/// Members lacking an attribute are left out of that metric entirely, so they
/// do not pull a mean towards zero. A metric with no contributing member is
/// zero, never NaN.
pub fn summarize_roster(members: &[Member]) -> Stats {
  Stats::from_fn(|metric| aggregate(metric, members))
}

fn aggregate(metric: Metric, members: &[Member]) -> f64 {
  let decl = metric.decl();
  let (sum, count) = members
    .iter()
    .filter_map(|m| decl.attribute.read(m))
    .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));

  if count == 0 {
    return 0.0;
  }
  match decl.aggregation {
    Aggregation::Mean => sum / count as f64,
    Aggregation::Sum => sum,
  }
}
