//! Snapshot accessor: time-indexed append and retrieval over a
//! [`SnapshotStore`], with the codec applied explicitly on every write and
//! read.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound as _, Utc};
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
  Error, Result,
  codec::{CLAN_SCHEMA, LevelIndex, PLAYER_SCHEMA, hydrate, prepare_for_storage},
  entity::PlayerRecord,
  record::{MEMBER_LIST_FIELD, ROSTER_FIELD, RawRecord, normalize_tag},
  snapshot::{Snapshot, SnapshotId, StoredSnapshot},
  store::SnapshotStore,
  upstream::{FetchError, Upstream},
};

/// Explicitly constructed context tying a store to an upstream source.
///
/// Cloning is cheap; both collaborators are reference-counted.
pub struct SnapshotAccessor<S, U> {
  store:    Arc<S>,
  upstream: Arc<U>,
}

impl<S, U> Clone for SnapshotAccessor<S, U> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), upstream: Arc::clone(&self.upstream) }
  }
}

impl<S, U> SnapshotAccessor<S, U>
where
  S: SnapshotStore,
  U: Upstream,
{
  pub fn new(store: Arc<S>, upstream: Arc<U>) -> Self { Self { store, upstream } }

  pub fn store(&self) -> &S { &self.store }

  // ── Writes ────────────────────────────────────────────────────────────

  /// Encode `record` and append it as the snapshot of `tag` taken at
  /// `taken_at`. Timestamps are kept to microsecond precision.
  pub async fn append(
    &self,
    tag: &str,
    record: RawRecord,
    taken_at: DateTime<Utc>,
  ) -> Result<Snapshot> {
    let tag = normalize_tag(tag);
    let taken_at = taken_at.trunc_subsecs(6);
    let prepared = prepare_for_storage(&record, &CLAN_SCHEMA, &mut LevelIndex::default())?;
    let stored = StoredSnapshot {
      id: SnapshotId::for_time(taken_at),
      tag: tag.clone(),
      taken_at,
      record: prepared.stripped,
      payload: prepared.payload,
    };

    let id = self.store.append_snapshot(stored).await.map_err(Error::store)?;
    info!(%tag, %id, %taken_at, "appended snapshot");
    Ok(Snapshot { id, tag, taken_at, record })
  }

  /// Fetch the clan and its full roster from upstream.
  ///
  /// Members are fetched concurrently and kept in `memberList` order. Members
  /// the upstream no longer knows are skipped; any transient failure aborts
  /// the whole fetch.
  pub async fn fetch_current(&self, tag: &str) -> Result<RawRecord> {
    let tag = normalize_tag(tag);
    let mut clan = self.upstream.fetch_clan(&tag).await?;

    let member_tags = clan.member_tags();
    let fetched =
      join_all(member_tags.iter().map(|member_tag| self.upstream.fetch_player(member_tag))).await;

    let mut players = Vec::with_capacity(member_tags.len());
    for (member_tag, result) in member_tags.iter().zip(fetched) {
      match result {
        Ok(player) => players.push(serde_json::to_value(player)?),
        Err(FetchError::NotFound(_)) => {
          warn!(clan = %tag, player = %member_tag, "roster member not found upstream; skipping");
        }
        Err(e @ FetchError::Transient(_)) => return Err(e.into()),
      }
    }
    debug!(%tag, fetched = players.len(), listed = member_tags.len(), "fetched roster");

    clan.insert(ROSTER_FIELD, Value::Array(players));
    clan.remove(MEMBER_LIST_FIELD);
    Ok(clan)
  }

  /// Fetch the current state of `tag`, append it, and store every roster
  /// player.
  pub async fn fetch_and_append(&self, tag: &str) -> Result<Snapshot> {
    let record = self.fetch_current(tag).await?;
    let snapshot = self.append(tag, record, Utc::now()).await?;
    let taken_at = snapshot.taken_at;

    if let Some(Value::Array(players)) = snapshot.record.get(ROSTER_FIELD) {
      for player in players {
        let player = RawRecord::from_value(player.clone())?;
        self.store_player(&player, taken_at).await?;
      }
    }
    Ok(snapshot)
  }

  /// Encode and upsert a player, extending its previously stored level
  /// index.
  pub async fn store_player(&self, player: &RawRecord, at: DateTime<Utc>) -> Result<PlayerRecord> {
    let tag = normalize_tag(&player.tag);
    let mut level_index = self
      .store
      .get_player(&tag)
      .await
      .map_err(Error::store)?
      .map(|existing| existing.level_index)
      .unwrap_or_default();

    let prepared = prepare_for_storage(player, &PLAYER_SCHEMA, &mut level_index)?;
    let record = PlayerRecord {
      tag,
      name: player.name.clone(),
      slug: prepared.slug,
      level_index,
      record: prepared.stripped,
      payload: prepared.payload,
      updated_at: at,
    };
    self.store.upsert_player(record.clone()).await.map_err(Error::store)?;
    Ok(record)
  }

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Snapshots taken at or after `t`, oldest first.
  pub async fn at_or_after(&self, tag: &str, t: DateTime<Utc>) -> Result<Vec<Snapshot>> {
    let tag = normalize_tag(tag);
    let stored = self
      .store
      .snapshots_at_or_after(&tag, t)
      .await
      .map_err(Error::store)?;
    Ok(stored.into_iter().map(hydrate_or_strip).collect())
  }

  /// Snapshots taken strictly before `t`, oldest first.
  pub async fn before(&self, tag: &str, t: DateTime<Utc>) -> Result<Vec<Snapshot>> {
    let tag = normalize_tag(tag);
    let stored = self.store.snapshots_before(&tag, t).await.map_err(Error::store)?;
    Ok(stored.into_iter().map(hydrate_or_strip).collect())
  }

  pub async fn most_recent(&self, tag: &str) -> Result<Option<Snapshot>> {
    let tag = normalize_tag(tag);
    let stored = self.store.latest_snapshot(&tag).await.map_err(Error::store)?;
    Ok(stored.map(hydrate_or_strip))
  }

  /// The latest stored snapshot at or before `t`, without any fallback.
  pub async fn latest_at_or_before(
    &self,
    tag: &str,
    t: DateTime<Utc>,
  ) -> Result<Option<Snapshot>> {
    let tag = normalize_tag(tag);
    let stored = self
      .store
      .latest_at_or_before(&tag, t)
      .await
      .map_err(Error::store)?;
    Ok(stored.map(hydrate_or_strip))
  }

  /// The snapshot closest to `t` from at or before it. When the history has
  /// nothing that old, a fresh snapshot is fetched and persisted instead, so
  /// missing history never hides the current state.
  pub async fn nearest(&self, tag: &str, t: DateTime<Utc>) -> Result<Snapshot> {
    if let Some(snapshot) = self.latest_at_or_before(tag, t).await? {
      return Ok(snapshot);
    }
    info!(%tag, %t, "no snapshot at or before requested time; fetching");
    self.fetch_and_append(tag).await
  }
}

/// Hydrate a stored snapshot. A corrupt payload is logged and the snapshot is
/// returned with its heavy fields absent.
fn hydrate_or_strip(stored: StoredSnapshot) -> Snapshot {
  let record = match hydrate(&stored.record, &stored.payload) {
    Ok(record) => record,
    Err(e) => {
      warn!(
        tag = %stored.tag,
        id = %stored.id,
        error = %e,
        "unreadable snapshot payload; heavy fields treated as absent"
      );
      stored.record
    }
  };
  Snapshot { id: stored.id, tag: stored.tag, taken_at: stored.taken_at, record }
}
