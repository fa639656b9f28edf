//! The per-entity refresh pipeline and the periodic status rollup.
//!
//! A refresh is a linear pipeline with no retries: fetch (or reuse) the
//! current snapshot, summarise it, compute the fixed lookback deltas, and
//! persist everything in one wholesale entity write. Re-running it over the
//! same snapshot history produces the same entity record.
//!
//! At most one refresh per tag may be in flight; enforcing that is the
//! caller's job.

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tracing::info;

use crate::{
  Error, Result,
  accessor::SnapshotAccessor,
  codec::{CLAN_SCHEMA, prepare_for_storage, roster_level_index},
  delta::delta,
  entity::EntityRecord,
  metric::Stats,
  record::normalize_tag,
  snapshot::Snapshot,
  status::{StatusConfig, StatusRecord, compute_status},
  store::SnapshotStore,
  summary::summarize,
  upstream::Upstream,
};

/// Lookback window of the `day_delta` field.
pub fn day() -> TimeDelta { TimeDelta::days(1) }

/// Lookback window of the `week_delta` field.
pub fn week() -> TimeDelta { TimeDelta::days(7) }

pub struct Refresher<S, U> {
  accessor: SnapshotAccessor<S, U>,
}

impl<S, U> Clone for Refresher<S, U> {
  fn clone(&self) -> Self { Self { accessor: self.accessor.clone() } }
}

impl<S, U> Refresher<S, U>
where
  S: SnapshotStore,
  U: Upstream,
{
  pub fn new(accessor: SnapshotAccessor<S, U>) -> Self { Self { accessor } }

  pub fn accessor(&self) -> &SnapshotAccessor<S, U> { &self.accessor }

  /// Delta between the most recent snapshot of `tag` and the latest snapshot
  /// at least `lookback` older than it.
  ///
  /// With no snapshot that old the baseline is the zero summary, so the
  /// delta equals the current summary. With no snapshot at all the delta is
  /// zero.
  pub async fn delta_over_lookback(&self, tag: &str, lookback: TimeDelta) -> Result<Stats> {
    match self.accessor.most_recent(tag).await? {
      Some(current) => {
        let now = summarize(&current);
        self.lookback_delta(&current, &now, lookback).await
      }
      None => Ok(Stats::zero()),
    }
  }

  async fn lookback_delta(
    &self,
    current: &Snapshot,
    now: &Stats,
    lookback: TimeDelta,
  ) -> Result<Stats> {
    let baseline = self
      .accessor
      .latest_at_or_before(&current.tag, current.taken_at - lookback)
      .await?
      .map(|s| summarize(&s))
      .unwrap_or_default();
    Ok(delta(now, &baseline))
  }

  /// Recompute and persist the cached fields of `tag` from its most recent
  /// stored snapshot, without fetching.
  pub async fn update_calculations(&self, tag: &str) -> Result<EntityRecord> {
    let tag = normalize_tag(tag);
    let current = self
      .accessor
      .most_recent(&tag)
      .await?
      .ok_or_else(|| Error::EntityNotFound(tag.clone()))?;

    let stats = summarize(&current);
    let day_delta = self.lookback_delta(&current, &stats, day()).await?;
    let week_delta = self.lookback_delta(&current, &stats, week()).await?;

    let mut level_index = roster_level_index(&current.record);
    let prepared = prepare_for_storage(&current.record, &CLAN_SCHEMA, &mut level_index)?;

    let record = &current.record;
    let entity = EntityRecord {
      tag: tag.clone(),
      name: record.name.clone(),
      slug: prepared.slug,
      level_index,
      payload_digest: prepared.payload.digest(),
      compact_payload: prepared.payload,
      snapshot_id: current.id,
      members: record.get_i64("members").unwrap_or(0),
      clan_points: record.get_i64("clanPoints").unwrap_or(0),
      country_code: record
        .path("location.countryCode")
        .and_then(Value::as_str)
        .map(str::to_owned),
      current: stats,
      day_delta,
      week_delta,
      page_views: 0,
      updated_at: current.taken_at,
    };

    self
      .accessor
      .store()
      .replace_entity(entity.clone())
      .await
      .map_err(Error::store)?;
    info!(%tag, snapshot = %current.id, "updated calculations");
    Ok(entity)
  }

  /// Fetch a fresh snapshot of `tag` and recompute its cached fields.
  pub async fn refresh(&self, tag: &str) -> Result<EntityRecord> {
    self.accessor.fetch_and_append(tag).await?;
    self.update_calculations(tag).await
  }

  /// Run the status rollup over every stored entity and replace the stored
  /// status record.
  pub async fn update_status(
    &self,
    config: &StatusConfig,
    now: DateTime<Utc>,
  ) -> Result<StatusRecord> {
    info!("updating status calculations");
    let store = self.accessor.store();
    let entities = store.list_entities().await.map_err(Error::store)?;
    let players = store.count_players().await.map_err(Error::store)?;

    let status = compute_status(&entities, players, now, config);
    store.replace_status(status.clone()).await.map_err(Error::store)?;
    Ok(status)
  }
}
