//! Status rollup: cross-entity counts and rankings.
//!
//! Computed periodically from the denormalised entity rows and stored as a
//! single record that each run replaces wholesale.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{entity::EntityRecord, metric::Metric};

/// Parameters of a rollup run.
#[derive(Debug, Clone)]
pub struct StatusConfig {
  /// Entities refreshed within this window are active; older ones are stale.
  pub staleness:      TimeDelta,
  /// Length of the ranked lists.
  pub top_k:          usize,
  /// Weekly-delta metric used to rank countries.
  pub country_metric: Metric,
}

impl Default for StatusConfig {
  fn default() -> Self {
    Self {
      staleness:      TimeDelta::hours(12),
      top_k:          10,
      country_metric: Metric::AvgAttackWins,
    }
  }
}

/// Per-country aggregate in [`StatusRecord::top_countries`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryAggregate {
  pub country_code: String,
  pub clans:        u64,
  /// Mean of the ranking metric over the country's clans.
  pub value:        f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
  pub last_updated:         DateTime<Utc>,
  pub total_clans:          u64,
  pub total_active_clans:   u64,
  pub total_stale_clans:    u64,
  pub total_members:        u64,
  pub total_active_members: u64,
  pub total_countries:      u64,
  /// Percentage of clans that are active.
  pub ratio_indexed:        f64,
  /// Tags of the most viewed clans.
  pub popular_clans:        Vec<String>,
  pub top_countries:        Vec<CountryAggregate>,
}

/// Whether an entity refreshed at `updated_at` counts as active at `now`.
pub fn is_active(updated_at: DateTime<Utc>, now: DateTime<Utc>, staleness: TimeDelta) -> bool {
  updated_at >= now - staleness
}

/// Exact complement of [`is_active`] for the same arguments.
pub fn is_stale(updated_at: DateTime<Utc>, now: DateTime<Utc>, staleness: TimeDelta) -> bool {
  !is_active(updated_at, now, staleness)
}

/// Fold the entity rows into a status record.
pub fn compute_status(
  entities: &[EntityRecord],
  total_players: u64,
  now: DateTime<Utc>,
  config: &StatusConfig,
) -> StatusRecord {
  let total_clans = entities.len() as u64;
  let active: Vec<&EntityRecord> = entities
    .iter()
    .filter(|e| is_active(e.updated_at, now, config.staleness))
    .collect();
  let total_stale_clans = entities
    .iter()
    .filter(|e| is_stale(e.updated_at, now, config.staleness))
    .count() as u64;
  let total_active_clans = active.len() as u64;

  let ratio_indexed = if total_clans == 0 {
    0.0
  } else {
    100.0 * total_active_clans as f64 / total_clans as f64
  };

  let total_active_members =
    active.iter().map(|e| e.members.max(0) as u64).sum::<u64>();

  let countries: BTreeSet<&str> = entities
    .iter()
    .filter_map(|e| e.country_code.as_deref())
    .collect();

  let mut by_views: Vec<&EntityRecord> = entities.iter().collect();
  by_views.sort_by(|a, b| b.page_views.cmp(&a.page_views).then_with(|| a.tag.cmp(&b.tag)));
  let popular_clans = by_views
    .into_iter()
    .take(config.top_k)
    .map(|e| e.tag.clone())
    .collect();

  StatusRecord {
    last_updated: now,
    total_clans,
    total_active_clans,
    total_stale_clans,
    total_members: total_players,
    total_active_members,
    total_countries: countries.len() as u64,
    ratio_indexed,
    popular_clans,
    top_countries: rank_countries(entities, config),
  }
}

fn rank_countries(entities: &[EntityRecord], config: &StatusConfig) -> Vec<CountryAggregate> {
  let mut groups: BTreeMap<&str, (u64, f64)> = BTreeMap::new();
  for entity in entities {
    if let Some(code) = entity.country_code.as_deref() {
      let slot = groups.entry(code).or_default();
      slot.0 += 1;
      slot.1 += entity.week_delta.get(config.country_metric);
    }
  }

  let mut ranked: Vec<CountryAggregate> = groups
    .into_iter()
    .map(|(code, (clans, sum))| CountryAggregate {
      country_code: code.to_owned(),
      clans,
      value: sum / clans as f64,
    })
    .collect();
  ranked.sort_by(|a, b| {
    b.value
      .total_cmp(&a.value)
      .then_with(|| a.country_code.cmp(&b.country_code))
  });
  ranked.truncate(config.top_k);
  ranked
}
