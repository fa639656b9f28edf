//! Snapshot codec: strips the heavy, rarely queried sub-documents off a
//! record and packs them into a single compressed [`CompactPayload`].
//!
//! Storage preparation and hydration are two explicit pure functions,
//! [`prepare_for_storage`] and [`hydrate`]. Nothing here runs implicitly on
//! construction; the snapshot accessor calls them around every store access.
//!
//! The payload is the compact JSON form of a sorted map, compressed with LZ4.
//! Identical input always produces identical bytes, so [`CompactPayload::digest`]
//! can be used for content addressing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{Error, Result, record::RawRecord};

// ─── Schemas ─────────────────────────────────────────────────────────────────

/// Which fields of a record are compacted and which carry leveled items.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
  /// Fields moved into the compact payload when present.
  pub heavy_fields:   &'static [&'static str],
  /// List fields scanned into the level index; absent or null values are
  /// normalised to empty lists first.
  pub leveled_fields: &'static [&'static str],
}

pub const PLAYER_SCHEMA: Schema = Schema {
  heavy_fields:   &[
    "achievements",
    "clan",
    "heroes",
    "league",
    "legendStatistics",
    "spells",
    "troops",
  ],
  leveled_fields: &["heroes", "troops", "spells"],
};

pub const CLAN_SCHEMA: Schema = Schema {
  heavy_fields:   &["labels", "memberList", "players"],
  leveled_fields: &[],
};

// ─── Level index ─────────────────────────────────────────────────────────────

/// Key under which an item's level is indexed: `<village>_<name>` with dots
/// removed from the name, e.g. `home_PEKKA` for `P.E.K.K.A`.
pub fn level_key(village: &str, name: &str) -> String {
  format!("{village}_{}", name.replace('.', ""))
}

/// Flat lookup from item key to level.
///
/// The index only grows: absorbing items overrides existing keys but never
/// removes any. Callers that want a fresh index start from
/// [`LevelIndex::default`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LevelIndex(BTreeMap<String, i64>);

impl LevelIndex {
  pub fn get(&self, key: &str) -> Option<i64> { self.0.get(key).copied() }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
    self.0.iter().map(|(k, v)| (k.as_str(), *v))
  }

  /// Insert a level, returning the level it replaced.
  pub fn insert(&mut self, key: String, level: i64) -> Option<i64> {
    self.0.insert(key, level)
  }

  /// Index every well-formed item of a leveled list. Items lacking a
  /// `village`, a `name` or an integer `level` are skipped. When two items
  /// map to the same key the later one wins.
  pub fn absorb(&mut self, items: &[Value]) {
    for item in items {
      let village = item.get("village").and_then(Value::as_str);
      let name = item.get("name").and_then(Value::as_str);
      let level = item.get("level").and_then(Value::as_i64);
      match (village, name, level) {
        (Some(village), Some(name), Some(level)) => {
          self.insert(level_key(village, name), level);
        }
        _ => debug!(?item, "skipping malformed leveled item"),
      }
    }
  }

  /// Keep the higher level for every key present in either index.
  pub fn merge_max(&mut self, other: LevelIndex) {
    for (key, level) in other.0 {
      let slot = self.0.entry(key).or_insert(level);
      *slot = (*slot).max(level);
    }
  }
}

/// Clan-wide level index: for every item key, the highest level reached by
/// any roster member. Each member's lists are indexed with the usual
/// last-write-wins rule before the members are combined.
pub fn roster_level_index(clan: &RawRecord) -> LevelIndex {
  let mut index = LevelIndex::default();
  for member in clan.roster() {
    let mut own = LevelIndex::default();
    for &field in PLAYER_SCHEMA.leveled_fields {
      if let Some(Value::Array(items)) = member.attributes.get(field) {
        own.absorb(items);
      }
    }
    index.merge_max(own);
  }
  index
}

// ─── Compact payload ─────────────────────────────────────────────────────────

/// Compressed, serialised heavy fields of one record. Opaque to consumers.
#[derive(Clone, PartialEq, Eq)]
pub struct CompactPayload(Vec<u8>);

impl std::fmt::Debug for CompactPayload {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "CompactPayload({} bytes)", self.0.len())
  }
}

impl CompactPayload {
  /// Serialise and compress a map of heavy fields.
  pub fn encode(fields: &Map<String, Value>) -> Result<Self> {
    let json = serde_json::to_vec(fields)?;
    Ok(Self(lz4_flex::compress_prepend_size(&json)))
  }

  /// Inflate and parse the payload back into its map of heavy fields.
  pub fn decode(&self) -> Result<Map<String, Value>> {
    let json = lz4_flex::decompress_size_prepended(&self.0)
      .map_err(|e| Error::CorruptPayload(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| Error::CorruptPayload(e.to_string()))
  }

  pub fn from_bytes(bytes: Vec<u8>) -> Self { Self(bytes) }

  pub fn as_bytes(&self) -> &[u8] { &self.0 }

  pub fn into_bytes(self) -> Vec<u8> { self.0 }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  /// Lowercase hex SHA-256 of the compressed bytes.
  pub fn digest(&self) -> String { hex::encode(Sha256::digest(&self.0)) }
}

// ─── Encode / decode ─────────────────────────────────────────────────────────

/// Output of [`prepare_for_storage`].
#[derive(Debug, Clone)]
pub struct Prepared {
  /// The record with every heavy field removed.
  pub stripped: RawRecord,
  pub payload:  CompactPayload,
  pub slug:     String,
}

/// URL-safe identifier derived from an entity's display name and tag.
/// Different tags may produce the same slug; nothing here deduplicates.
pub fn entity_slug(name: &str, tag: &str) -> String {
  slug::slugify(format!("{name}-{tag}"))
}

/// Split `record` into its stripped form and a compact payload, updating
/// `index` with every leveled item found.
pub fn prepare_for_storage(
  record: &RawRecord,
  schema: &Schema,
  index: &mut LevelIndex,
) -> Result<Prepared> {
  let mut stripped = record.clone();

  for &field in schema.leveled_fields {
    if matches!(stripped.get(field), None | Some(Value::Null)) {
      stripped.insert(field, Value::Array(Vec::new()));
    } else if let Some(Value::Array(items)) = stripped.get(field) {
      index.absorb(items);
    } else {
      debug!(field, tag = %record.tag, "leveled field is not a list");
    }
  }

  let mut heavy = Map::new();
  for &field in schema.heavy_fields {
    if let Some(value) = stripped.remove(field) {
      heavy.insert(field.to_owned(), value);
    }
  }

  Ok(Prepared {
    payload: CompactPayload::encode(&heavy)?,
    slug: entity_slug(&record.name, &record.tag),
    stripped,
  })
}

/// Restore the heavy fields of a stored record. Fields that were absent when
/// the payload was produced stay absent.
pub fn hydrate(stripped: &RawRecord, payload: &CompactPayload) -> Result<RawRecord> {
  let mut record = stripped.clone();
  for (field, value) in payload.decode()? {
    record.insert(field, value);
  }
  Ok(record)
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn player() -> RawRecord {
    RawRecord::from_value(json!({
      "tag": "#P2Q",
      "name": "Sir Donates",
      "trophies": 4012,
      "expLevel": 201,
      "league": { "id": 29000022, "name": "Legend League" },
      "achievements": [
        { "name": "Gold Grab", "value": 1_999_999_999u64, "stars": 3 },
        { "name": "Heroic Heist", "value": 0.5 }
      ],
      "heroes": [
        { "name": "Barbarian King", "level": 80, "village": "home" },
        { "name": "Battle Machine", "level": 30, "village": "builderBase" }
      ],
      "troops": [
        { "name": "P.E.K.K.A", "level": 9, "village": "home" },
        { "name": "Raged Barbarian", "level": 18, "village": "builderBase" }
      ],
      "spells": [{ "name": "Rage Spell", "level": 6, "village": "home" }]
    }))
    .unwrap()
  }

  #[test]
  fn round_trip_restores_heavy_fields() {
    let full = player();
    let mut index = LevelIndex::default();
    let prepared = prepare_for_storage(&full, &PLAYER_SCHEMA, &mut index).unwrap();

    for field in PLAYER_SCHEMA.heavy_fields {
      assert!(!prepared.stripped.contains(field), "{field} was not stripped");
    }
    assert_eq!(prepared.stripped.get_i64("trophies"), Some(4012));

    let restored = hydrate(&prepared.stripped, &prepared.payload).unwrap();
    assert_eq!(restored, full);
  }

  #[test]
  fn absent_heavy_fields_stay_absent() {
    let record = RawRecord::from_value(json!({ "tag": "#P1", "name": "bare" })).unwrap();
    let prepared =
      prepare_for_storage(&record, &PLAYER_SCHEMA, &mut LevelIndex::default()).unwrap();
    let restored = hydrate(&prepared.stripped, &prepared.payload).unwrap();

    assert!(!restored.contains("league"));
    assert!(!restored.contains("achievements"));
    // Leveled lists are normalised by the encoder, not invented by the decoder.
    assert_eq!(restored.get("heroes"), Some(&json!([])));
    assert_eq!(restored.get("troops"), Some(&json!([])));
    assert_eq!(restored.get("spells"), Some(&json!([])));
  }

  #[test]
  fn level_index_strips_dots_and_prefixes_village() {
    let mut index = LevelIndex::default();
    prepare_for_storage(&player(), &PLAYER_SCHEMA, &mut index).unwrap();

    assert_eq!(index.get("home_PEKKA"), Some(9));
    assert_eq!(index.get("home_Barbarian King"), Some(80));
    assert_eq!(index.get("builderBase_Battle Machine"), Some(30));
    assert_eq!(index.get("home_Rage Spell"), Some(6));
    assert_eq!(index.len(), 5);
  }

  #[test]
  fn encoding_is_deterministic() {
    let mut first_index = LevelIndex::default();
    let mut second_index = LevelIndex::default();
    let first = prepare_for_storage(&player(), &PLAYER_SCHEMA, &mut first_index).unwrap();
    let second = prepare_for_storage(&player(), &PLAYER_SCHEMA, &mut second_index).unwrap();

    assert_eq!(first_index, second_index);
    assert_eq!(first.payload, second.payload);
    assert_eq!(first.payload.digest(), second.payload.digest());
  }

  #[test]
  fn level_index_accumulates_across_encodes() {
    let mut index = LevelIndex::default();
    index.insert("home_Old Troop".into(), 2);
    index.insert("home_PEKKA".into(), 1);

    prepare_for_storage(&player(), &PLAYER_SCHEMA, &mut index).unwrap();

    assert_eq!(index.get("home_Old Troop"), Some(2));
    assert_eq!(index.get("home_PEKKA"), Some(9));
  }

  #[test]
  fn duplicate_level_keys_last_write_wins() {
    let mut index = LevelIndex::default();
    index.absorb(&[
      json!({ "name": "P.E.K.K.A", "level": 3, "village": "home" }),
      json!({ "name": "PEKKA", "level": 7, "village": "home" }),
      json!({ "name": "No Village", "level": 1 }),
      json!({ "name": "Bad Level", "level": "x", "village": "home" }),
    ]);
    assert_eq!(index.get("home_PEKKA"), Some(7));
    assert_eq!(index.len(), 1);
  }

  #[test]
  fn roster_index_keeps_highest_member_level() {
    let clan = RawRecord::from_value(json!({
      "tag": "#ABC",
      "players": [
        {
          "tag": "#P1",
          "troops": [{ "name": "P.E.K.K.A", "level": 8, "village": "home" }],
          "heroes": [{ "name": "Archer Queen", "level": 60, "village": "home" }]
        },
        {
          "tag": "#P2",
          "troops": [
            { "name": "P.E.K.K.A", "level": 9, "village": "home" },
            { "name": "Wall Breaker", "level": 7, "village": "home" }
          ],
          "heroes": [{ "name": "Archer Queen", "level": 45, "village": "home" }]
        },
        { "tag": "#P3" }
      ]
    }))
    .unwrap();

    let index = roster_level_index(&clan);
    assert_eq!(index.get("home_PEKKA"), Some(9));
    assert_eq!(index.get("home_Archer Queen"), Some(60));
    assert_eq!(index.get("home_Wall Breaker"), Some(7));
    assert_eq!(index.len(), 3);
    assert_eq!(roster_level_index(&clan), index);
  }

  #[test]
  fn corrupt_payload_is_reported() {
    let garbage = CompactPayload::from_bytes(vec![0xff, 0x00, 0x13]);
    assert!(matches!(garbage.decode(), Err(Error::CorruptPayload(_))));

    let not_json = CompactPayload::from_bytes(lz4_flex::compress_prepend_size(b"{oops"));
    assert!(matches!(not_json.decode(), Err(Error::CorruptPayload(_))));
  }

  #[test]
  fn slug_combines_name_and_tag() {
    assert_eq!(entity_slug("Reddit Dragons", "#2Y0YRGG9"), "reddit-dragons-2y0yrgg9");
    assert_eq!(entity_slug("!!!", "#ABC"), "abc");
  }

  #[test]
  fn clan_schema_moves_roster_into_payload() {
    let clan = RawRecord::from_value(json!({
      "tag": "#ABC",
      "name": "Alpha",
      "members": 2,
      "memberList": [{ "tag": "#P1" }],
      "players": [{ "tag": "#P1", "donations": 10 }]
    }))
    .unwrap();
    let mut index = LevelIndex::default();
    let prepared = prepare_for_storage(&clan, &CLAN_SCHEMA, &mut index).unwrap();

    assert!(!prepared.stripped.contains("players"));
    assert_eq!(prepared.stripped.get_i64("members"), Some(2));
    assert!(index.is_empty());
    assert_eq!(hydrate(&prepared.stripped, &prepared.payload).unwrap(), clan);
  }
}
