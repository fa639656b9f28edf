//! Encoding and decoding helpers between domain types and the column values
//! stored in SQLite.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microsecond
//! precision, `Z` suffix) so that text comparison orders them
//! chronologically. Structured fields (stats, level indexes, records) are
//! stored as compact JSON. Compact payloads are stored as raw blobs.

use chrono::{DateTime, SecondsFormat, SubsecRound as _, Utc};
use clanstats_core::{
  codec::{CompactPayload, LevelIndex},
  entity::{EntityRecord, PlayerRecord},
  metric::Stats,
  record::RawRecord,
  snapshot::{SnapshotId, StoredSnapshot},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Ids ─────────────────────────────────────────────────────────────────────

pub fn encode_id(id: SnapshotId) -> String { id.0.hyphenated().to_string() }

pub fn decode_id(s: &str) -> Result<SnapshotId> { Ok(SnapshotId(Uuid::parse_str(s)?)) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A query bound in stored form, truncated to microseconds.
pub fn encode_bound(dt: DateTime<Utc>) -> String { encode_dt(dt.trunc_subsecs(6)) }

/// Whether `dt` carries precision that [`encode_dt`] drops.
pub fn has_sub_micros(dt: DateTime<Utc>) -> bool { dt.timestamp_subsec_nanos() % 1_000 != 0 }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── JSON columns ────────────────────────────────────────────────────────────

pub fn encode_record(record: &RawRecord) -> Result<String> {
  Ok(serde_json::to_string(record)?)
}

pub fn decode_record(s: &str) -> Result<RawRecord> { Ok(serde_json::from_str(s)?) }

pub fn encode_stats(stats: &Stats) -> Result<String> { Ok(serde_json::to_string(stats)?) }

pub fn decode_stats(s: &str) -> Result<Stats> { Ok(serde_json::from_str(s)?) }

pub fn encode_level_index(index: &LevelIndex) -> Result<String> {
  Ok(serde_json::to_string(index)?)
}

pub fn decode_level_index(s: &str) -> Result<LevelIndex> { Ok(serde_json::from_str(s)?) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `snapshots` row.
pub struct RawSnapshot {
  pub snapshot_id: String,
  pub tag:         String,
  pub taken_at:    String,
  pub record_json: String,
  pub payload:     Vec<u8>,
}

impl RawSnapshot {
  pub fn into_snapshot(self) -> Result<StoredSnapshot> {
    Ok(StoredSnapshot {
      id:       decode_id(&self.snapshot_id)?,
      tag:      self.tag,
      taken_at: decode_dt(&self.taken_at)?,
      record:   decode_record(&self.record_json)?,
      payload:  CompactPayload::from_bytes(self.payload),
    })
  }
}

/// Raw values read directly from an `entities` row.
pub struct RawEntity {
  pub tag:             String,
  pub name:            String,
  pub slug:            String,
  pub level_index:     String,
  pub compact_payload: Vec<u8>,
  pub payload_digest:  String,
  pub snapshot_id:     String,
  pub members:         i64,
  pub clan_points:     i64,
  pub country_code:    Option<String>,
  pub current_stats:   String,
  pub day_delta:       String,
  pub week_delta:      String,
  pub page_views:      i64,
  pub updated_at:      String,
}

impl RawEntity {
  pub fn into_entity(self) -> Result<EntityRecord> {
    Ok(EntityRecord {
      tag:             self.tag,
      name:            self.name,
      slug:            self.slug,
      level_index:     decode_level_index(&self.level_index)?,
      compact_payload: CompactPayload::from_bytes(self.compact_payload),
      payload_digest:  self.payload_digest,
      snapshot_id:     decode_id(&self.snapshot_id)?,
      members:         self.members,
      clan_points:     self.clan_points,
      country_code:    self.country_code,
      current:         decode_stats(&self.current_stats)?,
      day_delta:       decode_stats(&self.day_delta)?,
      week_delta:      decode_stats(&self.week_delta)?,
      page_views:      self.page_views,
      updated_at:      decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw values read directly from a `players` row.
pub struct RawPlayer {
  pub tag:         String,
  pub name:        String,
  pub slug:        String,
  pub level_index: String,
  pub record_json: String,
  pub payload:     Vec<u8>,
  pub updated_at:  String,
}

impl RawPlayer {
  pub fn into_player(self) -> Result<PlayerRecord> {
    Ok(PlayerRecord {
      tag:         self.tag,
      name:        self.name,
      slug:        self.slug,
      level_index: decode_level_index(&self.level_index)?,
      record:      decode_record(&self.record_json)?,
      payload:     CompactPayload::from_bytes(self.payload),
      updated_at:  decode_dt(&self.updated_at)?,
    })
  }
}
