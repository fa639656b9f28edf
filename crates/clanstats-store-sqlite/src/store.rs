//! [`SqliteStore`]: the SQLite implementation of [`SnapshotStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use tracing::{debug, warn};

use clanstats_core::{
  entity::{EntityRecord, PlayerRecord},
  snapshot::{SnapshotId, StoredSnapshot},
  status::StatusRecord,
  store::SnapshotStore,
};

use crate::{
  Error, Result,
  encode::{
    RawEntity, RawPlayer, RawSnapshot, decode_dt, encode_bound, encode_dt, encode_id,
    encode_level_index, encode_record, encode_stats, has_sub_micros,
  },
  schema::SCHEMA,
};

const SNAPSHOT_COLUMNS: &str = "snapshot_id, tag, taken_at, record_json, payload";

const ENTITY_COLUMNS: &str = "tag, name, slug, level_index, compact_payload, payload_digest,
   snapshot_id, members, clan_points, country_code,
   current_stats, day_delta, week_delta, page_views, updated_at";

const PLAYER_COLUMNS: &str = "tag, name, slug, level_index, record_json, payload, updated_at";

fn raw_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSnapshot> {
  Ok(RawSnapshot {
    snapshot_id: row.get(0)?,
    tag:         row.get(1)?,
    taken_at:    row.get(2)?,
    record_json: row.get(3)?,
    payload:     row.get(4)?,
  })
}

fn raw_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntity> {
  Ok(RawEntity {
    tag:             row.get(0)?,
    name:            row.get(1)?,
    slug:            row.get(2)?,
    level_index:     row.get(3)?,
    compact_payload: row.get(4)?,
    payload_digest:  row.get(5)?,
    snapshot_id:     row.get(6)?,
    members:         row.get(7)?,
    clan_points:     row.get(8)?,
    country_code:    row.get(9)?,
    current_stats:   row.get(10)?,
    day_delta:       row.get(11)?,
    week_delta:      row.get(12)?,
    page_views:      row.get(13)?,
    updated_at:      row.get(14)?,
  })
}

fn raw_player(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawPlayer> {
  Ok(RawPlayer {
    tag:         row.get(0)?,
    name:        row.get(1)?,
    slug:        row.get(2)?,
    level_index: row.get(3)?,
    record_json: row.get(4)?,
    payload:     row.get(5)?,
    updated_at:  row.get(6)?,
  })
}

/// Result of the append transaction.
enum Append {
  Inserted,
  /// Carries the tag's latest stored timestamp.
  OutOfOrder(String),
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A snapshot store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run a snapshot query with `(tag, timestamp)` parameters. `condition`
  /// compares `taken_at` against the bound truncated to stored precision.
  async fn query_snapshots(
    &self,
    condition: &'static str,
    tag: &str,
    t: DateTime<Utc>,
  ) -> Result<Vec<StoredSnapshot>> {
    let tag = tag.to_owned();
    let t_str = encode_bound(t);
    debug!(%tag, %t, condition, "querying snapshots");

    let raws: Vec<RawSnapshot> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
           WHERE tag = ?1 AND {condition}
           ORDER BY taken_at ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![tag, t_str], raw_snapshot)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSnapshot::into_snapshot).collect()
  }

  /// Run a query returning at most one snapshot.
  async fn query_one_snapshot(
    &self,
    sql: &'static str,
    params: Vec<String>,
  ) -> Result<Option<StoredSnapshot>> {
    let raw: Option<RawSnapshot> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(sql, rusqlite::params_from_iter(params.iter()), raw_snapshot)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawSnapshot::into_snapshot).transpose()
  }

  #[cfg(test)]
  pub(crate) async fn execute_raw(&self, sql: &'static str) -> Result<usize> {
    Ok(self.conn.call(move |conn| Ok(conn.execute(sql, [])?)).await?)
  }
}

// ─── SnapshotStore impl ──────────────────────────────────────────────────────

impl SnapshotStore for SqliteStore {
  type Error = Error;

  // ── Snapshots (append-only) ──────────────────────────────────────────────

  async fn append_snapshot(&self, snapshot: StoredSnapshot) -> Result<SnapshotId> {
    let id_str       = encode_id(snapshot.id);
    let tag          = snapshot.tag.clone();
    let taken_at_str = encode_dt(snapshot.taken_at);
    let record_json  = encode_record(&snapshot.record)?;
    let digest       = snapshot.payload.digest();
    let payload      = snapshot.payload.into_bytes();

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let latest: Option<String> = tx.query_row(
          "SELECT MAX(taken_at) FROM snapshots WHERE tag = ?1",
          rusqlite::params![tag],
          |r| r.get(0),
        )?;

        if let Some(latest) = latest
          && latest >= taken_at_str
        {
          return Ok(Append::OutOfOrder(latest));
        }

        tx.execute(
          "INSERT INTO snapshots (
             snapshot_id, tag, taken_at, record_json, payload, payload_digest
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![id_str, tag, taken_at_str, record_json, payload, digest],
        )?;
        tx.commit()?;
        Ok(Append::Inserted)
      })
      .await?;

    match outcome {
      Append::Inserted => Ok(snapshot.id),
      Append::OutOfOrder(latest) => Err(Error::OutOfOrder {
        tag:      snapshot.tag,
        taken_at: snapshot.taken_at,
        latest:   decode_dt(&latest)?,
      }),
    }
  }

  // Stored timestamps have microsecond precision. A bound with a finer part
  // lies strictly between two representable instants, so `>= t` becomes
  // `> trunc(t)` and `< t` becomes `<= trunc(t)`.

  async fn snapshots_at_or_after(
    &self,
    tag: &str,
    t:   DateTime<Utc>,
  ) -> Result<Vec<StoredSnapshot>> {
    let condition = if has_sub_micros(t) { "taken_at > ?2" } else { "taken_at >= ?2" };
    self.query_snapshots(condition, tag, t).await
  }

  async fn snapshots_before(&self, tag: &str, t: DateTime<Utc>) -> Result<Vec<StoredSnapshot>> {
    let condition = if has_sub_micros(t) { "taken_at <= ?2" } else { "taken_at < ?2" };
    self.query_snapshots(condition, tag, t).await
  }

  async fn latest_at_or_before(
    &self,
    tag: &str,
    t:   DateTime<Utc>,
  ) -> Result<Option<StoredSnapshot>> {
    self
      .query_one_snapshot(
        "SELECT snapshot_id, tag, taken_at, record_json, payload FROM snapshots
         WHERE tag = ?1 AND taken_at <= ?2
         ORDER BY taken_at DESC LIMIT 1",
        vec![tag.to_owned(), encode_bound(t)],
      )
      .await
  }

  async fn latest_snapshot(&self, tag: &str) -> Result<Option<StoredSnapshot>> {
    self
      .query_one_snapshot(
        "SELECT snapshot_id, tag, taken_at, record_json, payload FROM snapshots
         WHERE tag = ?1
         ORDER BY taken_at DESC LIMIT 1",
        vec![tag.to_owned()],
      )
      .await
  }

  // ── Entities ──────────────────────────────────────────────────────────────

  async fn get_entity(&self, tag: &str) -> Result<Option<EntityRecord>> {
    let tag = tag.to_owned();

    let raw: Option<RawEntity> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE tag = ?1");
        Ok(
          conn
            .query_row(&sql, rusqlite::params![tag], raw_entity)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawEntity::into_entity).transpose()
  }

  async fn find_entities_by_slug(&self, slug: &str) -> Result<Vec<EntityRecord>> {
    let slug = slug.to_owned();
    debug!(%slug, "looking up entities by slug");

    let raws: Vec<RawEntity> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE slug = ?1 ORDER BY tag");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![slug], raw_entity)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEntity::into_entity).collect()
  }

  async fn list_entities(&self) -> Result<Vec<EntityRecord>> {
    let raws: Vec<RawEntity> = self
      .conn
      .call(|conn| {
        let sql = format!("SELECT {ENTITY_COLUMNS} FROM entities ORDER BY tag");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map([], raw_entity)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut entities = Vec::with_capacity(raws.len());
    for raw in raws {
      let tag = raw.tag.clone();
      match raw.into_entity() {
        Ok(entity) => entities.push(entity),
        Err(e) => warn!(%tag, error = %e, "skipping undecodable entity row"),
      }
    }
    Ok(entities)
  }

  async fn replace_entity(&self, entity: EntityRecord) -> Result<()> {
    let EntityRecord {
      tag,
      name,
      slug,
      level_index,
      compact_payload,
      payload_digest,
      snapshot_id,
      members,
      clan_points,
      country_code,
      current,
      day_delta,
      week_delta,
      updated_at,
      ..
    } = entity;

    let level_index   = encode_level_index(&level_index)?;
    let current_stats = encode_stats(&current)?;
    let day_delta     = encode_stats(&day_delta)?;
    let week_delta    = encode_stats(&week_delta)?;
    let snapshot_id   = encode_id(snapshot_id);
    let updated_at    = encode_dt(updated_at);
    let payload       = compact_payload.into_bytes();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO entities (
             tag, name, slug, level_index, compact_payload, payload_digest,
             snapshot_id, members, clan_points, country_code,
             current_stats, day_delta, week_delta, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
           ON CONFLICT (tag) DO UPDATE SET
             name            = excluded.name,
             slug            = excluded.slug,
             level_index     = excluded.level_index,
             compact_payload = excluded.compact_payload,
             payload_digest  = excluded.payload_digest,
             snapshot_id     = excluded.snapshot_id,
             members         = excluded.members,
             clan_points     = excluded.clan_points,
             country_code    = excluded.country_code,
             current_stats   = excluded.current_stats,
             day_delta       = excluded.day_delta,
             week_delta      = excluded.week_delta,
             updated_at      = excluded.updated_at",
          rusqlite::params![
            tag,
            name,
            slug,
            level_index,
            payload,
            payload_digest,
            snapshot_id,
            members,
            clan_points,
            country_code,
            current_stats,
            day_delta,
            week_delta,
            updated_at,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn record_page_view(&self, tag: &str) -> Result<bool> {
    let tag = tag.to_owned();
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE entities SET page_views = page_views + 1 WHERE tag = ?1",
          rusqlite::params![tag],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  // ── Players ───────────────────────────────────────────────────────────────

  async fn get_player(&self, tag: &str) -> Result<Option<PlayerRecord>> {
    let tag = tag.to_owned();

    let raw: Option<RawPlayer> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {PLAYER_COLUMNS} FROM players WHERE tag = ?1");
        Ok(
          conn
            .query_row(&sql, rusqlite::params![tag], raw_player)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPlayer::into_player).transpose()
  }

  async fn find_players_by_slug(&self, slug: &str) -> Result<Vec<PlayerRecord>> {
    let slug = slug.to_owned();

    let raws: Vec<RawPlayer> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {PLAYER_COLUMNS} FROM players WHERE slug = ?1 ORDER BY tag");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![slug], raw_player)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawPlayer::into_player).collect()
  }

  async fn upsert_player(&self, player: PlayerRecord) -> Result<()> {
    let PlayerRecord { tag, name, slug, level_index, record, payload, updated_at } = player;
    let level_index = encode_level_index(&level_index)?;
    let record_json = encode_record(&record)?;
    let updated_at  = encode_dt(updated_at);
    let payload     = payload.into_bytes();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO players (
             tag, name, slug, level_index, record_json, payload, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![tag, name, slug, level_index, record_json, payload, updated_at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn count_players(&self) -> Result<u64> {
    let count: i64 = self
      .conn
      .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM players", [], |r| r.get(0))?))
      .await?;
    Ok(count.max(0) as u64)
  }

  // ── Status ────────────────────────────────────────────────────────────────

  async fn get_status(&self) -> Result<Option<StatusRecord>> {
    let json: Option<String> = self
      .conn
      .call(|conn| {
        Ok(
          conn
            .query_row("SELECT status_json FROM status WHERE id = 1", [], |r| r.get(0))
            .optional()?,
        )
      })
      .await?;

    json
      .map(|s| serde_json::from_str(&s).map_err(Error::from))
      .transpose()
  }

  async fn replace_status(&self, status: StatusRecord) -> Result<()> {
    let json = serde_json::to_string(&status)?;
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO status (id, status_json) VALUES (1, ?1)",
          rusqlite::params![json],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
