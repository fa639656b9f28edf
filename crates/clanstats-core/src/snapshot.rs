//! Snapshots: immutable, timestamped captures of an entity.
//!
//! A snapshot is never updated or deleted once appended. Its creation
//! timestamp is the only ordering key and is embedded in its id.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::{NoContext, Timestamp, Uuid};

use crate::{
  codec::CompactPayload,
  record::{Member, RawRecord},
};

/// Time-ordered snapshot identifier (UUIDv7 built from the creation time).
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SnapshotId(pub Uuid);

impl SnapshotId {
  pub fn for_time(taken_at: DateTime<Utc>) -> Self {
    let secs = u64::try_from(taken_at.timestamp()).unwrap_or(0);
    let ts = Timestamp::from_unix(NoContext, secs, taken_at.timestamp_subsec_nanos());
    Self(Uuid::new_v7(ts))
  }
}

impl fmt::Display for SnapshotId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

/// A snapshot as the store holds it: stripped record plus compact payload.
#[derive(Debug, Clone)]
pub struct StoredSnapshot {
  pub id:       SnapshotId,
  pub tag:      String,
  pub taken_at: DateTime<Utc>,
  pub record:   RawRecord,
  pub payload:  CompactPayload,
}

/// A hydrated snapshot with its heavy fields restored.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
  pub id:       SnapshotId,
  pub tag:      String,
  pub taken_at: DateTime<Utc>,
  pub record:   RawRecord,
}

impl Snapshot {
  pub fn roster(&self) -> Vec<Member> { self.record.roster() }
}
