//! Loosely-typed records as delivered by the upstream API.
//!
//! Upstream payloads carry an evolving field set. A record is modelled as the
//! two fields every entity has (`tag`, `name`) plus an explicit open mapping
//! for everything else. `serde_json::Map` keeps its keys sorted, so any record
//! serialises to the same bytes regardless of how it was assembled.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the clan field holding the fetched player records.
pub const ROSTER_FIELD: &str = "players";

/// Name of the clan field holding the upstream member summaries.
pub const MEMBER_LIST_FIELD: &str = "memberList";

/// Canonical form of an upstream tag: `#`-prefixed and uppercase.
pub fn normalize_tag(tag: &str) -> String {
  let trimmed = tag.trim();
  let bare = trimmed.strip_prefix('#').unwrap_or(trimmed);
  format!("#{}", bare.to_uppercase())
}

// ─── RawRecord ───────────────────────────────────────────────────────────────

/// A clan or player record with its schema-free attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
  pub tag:   String,
  #[serde(default)]
  pub name:  String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl RawRecord {
  pub fn new(tag: impl Into<String>, name: impl Into<String>) -> Self {
    Self { tag: tag.into(), name: name.into(), extra: Map::new() }
  }

  /// Parse a JSON object into a record. Fails if `tag` is missing.
  pub fn from_value(value: Value) -> crate::Result<Self> {
    Ok(serde_json::from_value(value)?)
  }

  pub fn get(&self, key: &str) -> Option<&Value> { self.extra.get(key) }

  pub fn insert(&mut self, key: impl Into<String>, value: Value) {
    self.extra.insert(key.into(), value);
  }

  pub fn remove(&mut self, key: &str) -> Option<Value> {
    self.extra.remove(key)
  }

  pub fn contains(&self, key: &str) -> bool { self.extra.contains_key(key) }

  /// An integer attribute, if present and integral.
  pub fn get_i64(&self, key: &str) -> Option<i64> {
    self.get(key).and_then(Value::as_i64)
  }

  /// Look up a nested value by a dotted path such as `location.countryCode`.
  pub fn path(&self, path: &str) -> Option<&Value> {
    let mut parts = path.split('.');
    let mut current = self.get(parts.next()?)?;
    for part in parts {
      current = current.get(part)?;
    }
    Some(current)
  }

  /// Tags listed in the clan's `memberList`, in upstream order.
  pub fn member_tags(&self) -> Vec<String> {
    self
      .get(MEMBER_LIST_FIELD)
      .and_then(Value::as_array)
      .map(|members| {
        members
          .iter()
          .filter_map(|m| m.get("tag").and_then(Value::as_str))
          .map(str::to_owned)
          .collect()
      })
      .unwrap_or_default()
  }

  /// The roster of fully fetched players. Entries that are not objects with a
  /// tag are skipped; a missing or non-list field yields an empty roster.
  pub fn roster(&self) -> Vec<Member> {
    match self.get(ROSTER_FIELD) {
      Some(Value::Array(items)) => items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect(),
      _ => Vec::new(),
    }
  }
}

// ─── Member ──────────────────────────────────────────────────────────────────

/// One roster entry within a clan snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
  pub tag:        String,
  #[serde(default)]
  pub name:       String,
  #[serde(flatten)]
  pub attributes: Map<String, Value>,
}

impl Member {
  /// A top-level numeric attribute. Non-numeric values count as absent.
  pub fn numeric(&self, field: &str) -> Option<f64> {
    self.attributes.get(field).and_then(Value::as_f64)
  }

  /// The `value` of the named achievement, if the member has it.
  pub fn achievement(&self, name: &str) -> Option<f64> {
    self
      .attributes
      .get("achievements")?
      .as_array()?
      .iter()
      .find(|a| a.get("name").and_then(Value::as_str) == Some(name))?
      .get("value")
      .and_then(Value::as_f64)
  }
}
