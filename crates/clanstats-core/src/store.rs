//! The `SnapshotStore` trait.
//!
//! The trait is implemented by storage backends (e.g.
//! `clanstats-store-sqlite`). The pipeline in this crate depends on this
//! abstraction, not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  entity::{EntityRecord, PlayerRecord},
  snapshot::{SnapshotId, StoredSnapshot},
  status::StatusRecord,
};

/// A backend error that knows whether the failed operation may succeed on
/// retry. Busy or unreachable storage is transient; constraint violations and
/// undecodable rows are not.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  fn is_transient(&self) -> bool;
}

/// Abstraction over a snapshot store backend.
///
/// Snapshots are append-only and ordered by their creation timestamp within a
/// tag. Entity, player and status rows are replaced wholesale; each
/// replacement is atomic from the caller's point of view.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait SnapshotStore: Send + Sync {
  type Error: StoreError;

  // ── Snapshots (append-only) ──────────────────────────────────────────

  /// Append a snapshot. Fails if `taken_at` is not strictly later than the
  /// latest snapshot already stored for the same tag.
  fn append_snapshot(
    &self,
    snapshot: StoredSnapshot,
  ) -> impl Future<Output = Result<SnapshotId, Self::Error>> + Send + '_;

  /// Snapshots taken at or after `t`, oldest first.
  fn snapshots_at_or_after<'a>(
    &'a self,
    tag: &'a str,
    t: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<StoredSnapshot>, Self::Error>> + Send + 'a;

  /// Snapshots taken strictly before `t`, oldest first.
  fn snapshots_before<'a>(
    &'a self,
    tag: &'a str,
    t: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<StoredSnapshot>, Self::Error>> + Send + 'a;

  /// The latest snapshot taken at or before `t`, if any.
  fn latest_at_or_before<'a>(
    &'a self,
    tag: &'a str,
    t: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<StoredSnapshot>, Self::Error>> + Send + 'a;

  /// The most recent snapshot for `tag`, if any.
  fn latest_snapshot<'a>(
    &'a self,
    tag: &'a str,
  ) -> impl Future<Output = Result<Option<StoredSnapshot>, Self::Error>> + Send + 'a;

  // ── Entities ──────────────────────────────────────────────────────────

  fn get_entity<'a>(
    &'a self,
    tag: &'a str,
  ) -> impl Future<Output = Result<Option<EntityRecord>, Self::Error>> + Send + 'a;

  /// Entities whose slug equals `slug`, ordered by tag. Slugs are not unique,
  /// so several entities may match.
  fn find_entities_by_slug<'a>(
    &'a self,
    slug: &'a str,
  ) -> impl Future<Output = Result<Vec<EntityRecord>, Self::Error>> + Send + 'a;

  /// All entity rows that decode cleanly. Undecodable rows are skipped.
  fn list_entities(
    &self,
  ) -> impl Future<Output = Result<Vec<EntityRecord>, Self::Error>> + Send + '_;

  /// Replace every denormalised field of the entity in one write. The
  /// page-view counter is preserved.
  fn replace_entity(
    &self,
    entity: EntityRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Increment the page-view counter of an existing entity. Returns `false`
  /// if the tag is unknown.
  fn record_page_view<'a>(
    &'a self,
    tag: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Players ───────────────────────────────────────────────────────────

  fn get_player<'a>(
    &'a self,
    tag: &'a str,
  ) -> impl Future<Output = Result<Option<PlayerRecord>, Self::Error>> + Send + 'a;

  /// Players whose slug equals `slug`, ordered by tag.
  fn find_players_by_slug<'a>(
    &'a self,
    slug: &'a str,
  ) -> impl Future<Output = Result<Vec<PlayerRecord>, Self::Error>> + Send + 'a;

  /// Insert or replace a player row keyed by tag.
  fn upsert_player(
    &self,
    player: PlayerRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn count_players(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  // ── Status ────────────────────────────────────────────────────────────

  fn get_status(
    &self,
  ) -> impl Future<Output = Result<Option<StatusRecord>, Self::Error>> + Send + '_;

  /// Replace the single status row. Last writer wins.
  fn replace_status(
    &self,
    status: StatusRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
