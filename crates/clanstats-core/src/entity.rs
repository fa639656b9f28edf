//! Denormalised entity records read by reporting surfaces.
//!
//! These rows are overwritten wholesale by the refresh pipeline. Every numeric
//! field is always present and finite.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
  Result,
  codec::{CompactPayload, LevelIndex, hydrate},
  metric::Stats,
  record::RawRecord,
  snapshot::SnapshotId,
};

/// The cached state of one clan.
#[derive(Debug, Clone, Serialize)]
pub struct EntityRecord {
  pub tag:             String,
  pub name:            String,
  pub slug:            String,
  pub level_index:     LevelIndex,
  /// Payload of the snapshot the summary was computed from.
  #[serde(skip)]
  pub compact_payload: CompactPayload,
  pub payload_digest:  String,
  /// The snapshot the cached fields were derived from.
  pub snapshot_id:     SnapshotId,
  pub members:         i64,
  pub clan_points:     i64,
  pub country_code:    Option<String>,
  pub current:         Stats,
  pub day_delta:       Stats,
  pub week_delta:      Stats,
  /// Maintained by the store; ignored by `replace_entity`.
  pub page_views:      i64,
  pub updated_at:      DateTime<Utc>,
}

/// The latest known state of one player, keyed by tag.
#[derive(Debug, Clone)]
pub struct PlayerRecord {
  pub tag:         String,
  pub name:        String,
  pub slug:        String,
  pub level_index: LevelIndex,
  /// The player record with its heavy fields stripped.
  pub record:      RawRecord,
  pub payload:     CompactPayload,
  pub updated_at:  DateTime<Utc>,
}

impl PlayerRecord {
  /// The full player record with heavy fields restored.
  pub fn hydrated(&self) -> Result<RawRecord> { hydrate(&self.record, &self.payload) }
}
