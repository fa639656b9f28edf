//! Integration tests for `SqliteStore` and the refresh pipeline against an
//! in-memory database.

use std::{
  collections::HashMap,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use clanstats_core::{
  accessor::SnapshotAccessor,
  codec::{CLAN_SCHEMA, LevelIndex, prepare_for_storage},
  metric::Stats,
  record::RawRecord,
  refresh::{Refresher, day, week},
  snapshot::{SnapshotId, StoredSnapshot},
  status::StatusConfig,
  store::SnapshotStore,
  summary::summarize,
  upstream::{FetchError, Upstream},
};
use serde_json::{Value, json};

use crate::SqliteStore;

// ─── Fixtures ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeUpstream {
  clans:   Mutex<HashMap<String, Result<RawRecord, FetchError>>>,
  players: Mutex<HashMap<String, Result<RawRecord, FetchError>>>,
  calls:   AtomicUsize,
}

impl FakeUpstream {
  fn set_clan(&self, record: Value) {
    let record = RawRecord::from_value(record).unwrap();
    self.clans.lock().unwrap().insert(record.tag.clone(), Ok(record));
  }

  fn fail_clan(&self, tag: &str, error: FetchError) {
    self.clans.lock().unwrap().insert(tag.to_owned(), Err(error));
  }

  fn set_player(&self, record: Value) {
    let record = RawRecord::from_value(record).unwrap();
    self.players.lock().unwrap().insert(record.tag.clone(), Ok(record));
  }

  fn fail_player(&self, tag: &str, error: FetchError) {
    self.players.lock().unwrap().insert(tag.to_owned(), Err(error));
  }

  fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

impl Upstream for FakeUpstream {
  async fn fetch_clan(&self, tag: &str) -> Result<RawRecord, FetchError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self
      .clans
      .lock()
      .unwrap()
      .get(tag)
      .cloned()
      .unwrap_or_else(|| Err(FetchError::NotFound(tag.to_owned())))
  }

  async fn fetch_player(&self, tag: &str) -> Result<RawRecord, FetchError> {
    self
      .players
      .lock()
      .unwrap()
      .get(tag)
      .cloned()
      .unwrap_or_else(|| Err(FetchError::NotFound(tag.to_owned())))
  }
}

struct Harness {
  store:     Arc<SqliteStore>,
  upstream:  Arc<FakeUpstream>,
  refresher: Refresher<SqliteStore, FakeUpstream>,
}

impl Harness {
  async fn new() -> Self {
    let store = Arc::new(SqliteStore::open_in_memory().await.expect("in-memory store"));
    let upstream = Arc::new(FakeUpstream::default());
    let accessor = SnapshotAccessor::new(Arc::clone(&store), Arc::clone(&upstream));
    Self { store, upstream, refresher: Refresher::new(accessor) }
  }

  fn accessor(&self) -> &SnapshotAccessor<SqliteStore, FakeUpstream> {
    self.refresher.accessor()
  }

  async fn append(&self, tag: &str, donations: &[i64], at: DateTime<Utc>) {
    self
      .accessor()
      .append(tag, clan(tag, donations), at)
      .await
      .unwrap();
  }
}

fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() }

fn clan(tag: &str, donations: &[i64]) -> RawRecord {
  let players: Vec<Value> = donations
    .iter()
    .enumerate()
    .map(|(i, d)| json!({ "tag": format!("#P{i}"), "name": format!("p{i}"), "donations": d }))
    .collect();
  RawRecord::from_value(json!({
    "tag": tag,
    "name": "Alpha Squad",
    "members": donations.len(),
    "clanPoints": 31000,
    "location": { "countryCode": "US", "name": "United States" },
    "players": players
  }))
  .unwrap()
}

// ─── Snapshot store ──────────────────────────────────────────────────────────

#[tokio::test]
async fn range_queries_are_ordered_and_bounded() {
  let h = Harness::new().await;
  for d in 0..4 {
    h.append("#ABC", &[d], t0() + TimeDelta::days(d)).await;
  }
  h.append("#OTHER", &[99], t0() + TimeDelta::days(1)).await;

  let after = h.accessor().at_or_after("#ABC", t0() + TimeDelta::days(2)).await.unwrap();
  let times: Vec<_> = after.iter().map(|s| s.taken_at).collect();
  assert_eq!(times, vec![t0() + TimeDelta::days(2), t0() + TimeDelta::days(3)]);

  let before = h.accessor().before("#ABC", t0() + TimeDelta::days(2)).await.unwrap();
  let times: Vec<_> = before.iter().map(|s| s.taken_at).collect();
  assert_eq!(times, vec![t0(), t0() + TimeDelta::days(1)]);
  assert!(before.iter().all(|s| s.tag == "#ABC"));

  let nearest = h
    .accessor()
    .latest_at_or_before("#ABC", t0() + TimeDelta::hours(60))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(nearest.taken_at, t0() + TimeDelta::days(2));
}

#[tokio::test]
async fn sub_microsecond_bounds_keep_half_open_ranges() {
  let h = Harness::new().await;
  h.append("#ABC", &[1], t0()).await;

  let just_after = t0() + TimeDelta::nanoseconds(500);
  assert_eq!(h.accessor().before("#ABC", just_after).await.unwrap().len(), 1);
  assert!(h.accessor().at_or_after("#ABC", just_after).await.unwrap().is_empty());
  assert!(h.accessor().latest_at_or_before("#ABC", just_after).await.unwrap().is_some());

  let just_before = t0() - TimeDelta::nanoseconds(500);
  assert!(h.accessor().before("#ABC", just_before).await.unwrap().is_empty());
  assert_eq!(h.accessor().at_or_after("#ABC", just_before).await.unwrap().len(), 1);
  assert!(h.accessor().latest_at_or_before("#ABC", just_before).await.unwrap().is_none());

  // Exact bounds are unaffected.
  assert!(h.accessor().before("#ABC", t0()).await.unwrap().is_empty());
  assert_eq!(h.accessor().at_or_after("#ABC", t0()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn hydrated_snapshot_restores_roster() {
  let h = Harness::new().await;
  h.append("#ABC", &[10, 20], t0()).await;

  let snapshot = h.accessor().most_recent("#ABC").await.unwrap().unwrap();
  assert_eq!(snapshot.record, clan("#ABC", &[10, 20]));
  assert_eq!(snapshot.roster().len(), 2);
}

#[tokio::test]
async fn append_rejects_non_increasing_timestamps() {
  let h = Harness::new().await;
  h.append("#ABC", &[1], t0()).await;

  for at in [t0(), t0() - TimeDelta::seconds(1)] {
    let err = h.accessor().append("#ABC", clan("#ABC", &[1]), at).await.unwrap_err();
    assert!(
      matches!(err, clanstats_core::Error::Store { transient: false, .. }),
      "{err}"
    );
    assert!(!err.is_transient());
  }

  // Other tags have their own ordering.
  h.append("#XYZ", &[1], t0()).await;
}

#[tokio::test]
async fn store_rejects_out_of_order_with_typed_error() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let prepared =
    prepare_for_storage(&clan("#ABC", &[1]), &CLAN_SCHEMA, &mut LevelIndex::default()).unwrap();
  let stored = |at| StoredSnapshot {
    id:       SnapshotId::for_time(at),
    tag:      "#ABC".into(),
    taken_at: at,
    record:   prepared.stripped.clone(),
    payload:  prepared.payload.clone(),
  };

  store.append_snapshot(stored(t0())).await.unwrap();
  let err = store.append_snapshot(stored(t0())).await.unwrap_err();
  assert!(matches!(err, crate::Error::OutOfOrder { latest, .. } if latest == t0()));
}

// ─── Delta engine ────────────────────────────────────────────────────────────

#[tokio::test]
async fn day_over_day_scenario() {
  let h = Harness::new().await;
  let t1 = t0() + TimeDelta::days(1);
  h.append("#ABC", &[10, 20], t0()).await;
  h.append("#ABC", &[15, 25], t1).await;

  let first = h.accessor().latest_at_or_before("#ABC", t0()).await.unwrap().unwrap();
  let second = h.accessor().most_recent("#ABC").await.unwrap().unwrap();
  assert_eq!(summarize(&first).avg_donations, 15.0);
  assert_eq!(summarize(&second).avg_donations, 20.0);

  let delta = h.refresher.delta_over_lookback("#ABC", day()).await.unwrap();
  assert_eq!(delta.avg_donations, 5.0);
  assert_eq!(delta.total_donations, 10.0);
}

#[tokio::test]
async fn missing_baseline_reports_current_totals() {
  let h = Harness::new().await;
  h.append("#ABC", &[10, 20], t0()).await;

  let current = summarize(&h.accessor().most_recent("#ABC").await.unwrap().unwrap());
  let delta = h.refresher.delta_over_lookback("#ABC", week()).await.unwrap();
  assert_eq!(delta, current);
}

#[tokio::test]
async fn lookback_without_any_snapshot_is_zero() {
  let h = Harness::new().await;
  let delta = h.refresher.delta_over_lookback("#NONE", day()).await.unwrap();
  assert_eq!(delta, Stats::zero());
  assert_eq!(h.upstream.calls(), 0);
}

// ─── Refresh pipeline ────────────────────────────────────────────────────────

#[tokio::test]
async fn update_calculations_persists_denormalised_fields() {
  let h = Harness::new().await;
  h.append("#ABC", &[10, 20], t0()).await;
  h.append("#ABC", &[12, 22], t0() + TimeDelta::days(6)).await;
  h.append("#ABC", &[15, 25], t0() + TimeDelta::days(7)).await;

  let entity = h.refresher.update_calculations("abc").await.unwrap();
  assert_eq!(entity.tag, "#ABC");
  assert_eq!(entity.slug, "alpha-squad-abc");
  assert_eq!(entity.members, 2);
  assert_eq!(entity.clan_points, 31000);
  assert_eq!(entity.country_code.as_deref(), Some("US"));
  assert_eq!(entity.current.avg_donations, 20.0);
  assert_eq!(entity.day_delta.avg_donations, 3.0);
  assert_eq!(entity.week_delta.avg_donations, 5.0);
  assert_eq!(entity.updated_at, t0() + TimeDelta::days(7));

  let stored = h.store.get_entity("#ABC").await.unwrap().unwrap();
  assert_eq!(stored.current, entity.current);
  assert_eq!(stored.day_delta, entity.day_delta);
  assert_eq!(stored.week_delta, entity.week_delta);
  assert_eq!(stored.snapshot_id, entity.snapshot_id);
  assert_eq!(stored.payload_digest, entity.compact_payload.digest());
  assert_eq!(stored.compact_payload, entity.compact_payload);
}

#[tokio::test]
async fn update_calculations_is_idempotent_and_keeps_page_views() {
  let h = Harness::new().await;
  h.append("#ABC", &[10, 20], t0()).await;
  h.append("#ABC", &[15, 25], t0() + TimeDelta::days(1)).await;

  let first = h.refresher.update_calculations("#ABC").await.unwrap();
  assert!(h.store.record_page_view("#ABC").await.unwrap());
  assert!(h.store.record_page_view("#ABC").await.unwrap());
  let second = h.refresher.update_calculations("#ABC").await.unwrap();

  assert_eq!(first.current, second.current);
  assert_eq!(first.day_delta, second.day_delta);
  assert_eq!(first.week_delta, second.week_delta);
  assert_eq!(first.compact_payload, second.compact_payload);
  assert_eq!(first.updated_at, second.updated_at);

  let stored = h.store.get_entity("#ABC").await.unwrap().unwrap();
  assert_eq!(stored.page_views, 2);
  assert!(!h.store.record_page_view("#UNKNOWN").await.unwrap());
}

#[tokio::test]
async fn slug_lookup_returns_every_colliding_entity() {
  let h = Harness::new().await;
  for tag in ["#A1", "#A2", "#B1"] {
    h.append(tag, &[1], t0()).await;
    h.refresher.update_calculations(tag).await.unwrap();
  }
  for tag in ["#A1", "#A2"] {
    let mut entity = h.store.get_entity(tag).await.unwrap().unwrap();
    entity.slug = "alpha-squad".into();
    h.store.replace_entity(entity).await.unwrap();
  }

  let matches = h.store.find_entities_by_slug("alpha-squad").await.unwrap();
  let tags: Vec<&str> = matches.iter().map(|e| e.tag.as_str()).collect();
  assert_eq!(tags, vec!["#A1", "#A2"]);

  let single = h.store.find_entities_by_slug("alpha-squad-b1").await.unwrap();
  assert_eq!(single.len(), 1);
  assert_eq!(single[0].tag, "#B1");
  assert!(h.store.find_entities_by_slug("nobody").await.unwrap().is_empty());
}

#[tokio::test]
async fn slug_lookup_finds_players() {
  let h = Harness::new().await;
  for (tag, name) in [("#P1", "Sir Donates"), ("#P2", "Sir Donates")] {
    let player = RawRecord::from_value(json!({ "tag": tag, "name": name })).unwrap();
    h.accessor().store_player(&player, t0()).await.unwrap();
  }

  let found = h.store.find_players_by_slug("sir-donates-p2").await.unwrap();
  assert_eq!(found.len(), 1);
  assert_eq!(found[0].tag, "#P2");
  assert!(h.store.find_players_by_slug("sir-donates").await.unwrap().is_empty());
}

#[tokio::test]
async fn update_calculations_without_history_is_not_found() {
  let h = Harness::new().await;
  let err = h.refresher.update_calculations("#NONE").await.unwrap_err();
  assert!(matches!(err, clanstats_core::Error::EntityNotFound(tag) if tag == "#NONE"));
}

fn seed_upstream(upstream: &FakeUpstream) {
  upstream.set_clan(json!({
    "tag": "#ABC",
    "name": "Alpha Squad",
    "members": 3,
    "location": { "countryCode": "DE" },
    "memberList": [{ "tag": "#P1" }, { "tag": "#P2" }, { "tag": "#GONE" }]
  }));
  upstream.set_player(json!({
    "tag": "#P1",
    "name": "one",
    "donations": 100,
    "league": { "name": "Crystal League I" },
    "troops": [
      { "name": "P.E.K.K.A", "level": 8, "village": "home" },
      { "name": "Wall Breaker", "level": 7, "village": "home" }
    ]
  }));
  upstream.set_player(json!({ "tag": "#P2", "name": "two", "donations": 300 }));
}

#[tokio::test]
async fn refresh_fetches_appends_and_stores_players() {
  let h = Harness::new().await;
  seed_upstream(&h.upstream);

  let entity = h.refresher.refresh("#ABC").await.unwrap();
  assert_eq!(entity.current.avg_donations, 200.0);
  // Only one snapshot: the day delta reports the current values.
  assert_eq!(entity.day_delta, entity.current);
  assert_eq!(entity.level_index.get("home_PEKKA"), Some(8));
  assert_eq!(entity.level_index.get("home_Wall Breaker"), Some(7));
  let stored = h.store.get_entity("#ABC").await.unwrap().unwrap();
  assert_eq!(stored.level_index, entity.level_index);

  let snapshot = h.accessor().most_recent("#ABC").await.unwrap().unwrap();
  let roster: Vec<String> = snapshot.roster().into_iter().map(|m| m.tag).collect();
  assert_eq!(roster, vec!["#P1", "#P2"]);
  assert!(!snapshot.record.contains("memberList"));

  let player = h.store.get_player("#P1").await.unwrap().unwrap();
  assert_eq!(player.slug, "one-p1");
  assert_eq!(player.level_index.get("home_PEKKA"), Some(8));
  assert!(!player.record.contains("league"));
  let hydrated = player.hydrated().unwrap();
  assert_eq!(hydrated.path("league.name"), Some(&json!("Crystal League I")));
  assert_eq!(h.store.count_players().await.unwrap(), 2);
  assert!(h.store.get_player("#GONE").await.unwrap().is_none());
}

#[tokio::test]
async fn player_level_index_accumulates_across_refreshes() {
  let h = Harness::new().await;
  seed_upstream(&h.upstream);
  h.refresher.refresh("#ABC").await.unwrap();

  h.upstream.set_player(json!({
    "tag": "#P1",
    "name": "one",
    "troops": [{ "name": "P.E.K.K.A", "level": 9, "village": "home" }]
  }));
  h.refresher.refresh("#ABC").await.unwrap();

  let player = h.store.get_player("#P1").await.unwrap().unwrap();
  assert_eq!(player.level_index.get("home_PEKKA"), Some(9));
  assert_eq!(player.level_index.get("home_Wall Breaker"), Some(7));
}

#[tokio::test]
async fn transient_failure_leaves_no_partial_state() {
  let h = Harness::new().await;
  h.upstream.fail_clan("#ABC", FetchError::Transient("503".into()));

  let err = h.refresher.refresh("#ABC").await.unwrap_err();
  assert!(matches!(err, clanstats_core::Error::TransientFetch(_)));
  assert!(err.is_transient());
  assert!(h.accessor().most_recent("#ABC").await.unwrap().is_none());
  assert!(h.store.get_entity("#ABC").await.unwrap().is_none());
}

#[tokio::test]
async fn transient_member_failure_aborts_the_fetch() {
  let h = Harness::new().await;
  seed_upstream(&h.upstream);
  h.upstream.fail_player("#P2", FetchError::Transient("timeout".into()));

  let err = h.accessor().fetch_current("#ABC").await.unwrap_err();
  assert!(matches!(err, clanstats_core::Error::TransientFetch(_)), "{err}");
  assert!(h.accessor().most_recent("#ABC").await.unwrap().is_none());
  assert_eq!(h.store.count_players().await.unwrap(), 0);
}

#[tokio::test]
async fn roster_keeps_member_list_order() {
  let h = Harness::new().await;
  h.upstream.set_clan(json!({
    "tag": "#ORD",
    "name": "Order",
    "memberList": [{ "tag": "#M3" }, { "tag": "#M1" }, { "tag": "#M2" }]
  }));
  for tag in ["#M1", "#M2", "#M3"] {
    h.upstream.set_player(json!({ "tag": tag, "name": tag }));
  }

  let clan = h.accessor().fetch_current("#ORD").await.unwrap();
  let roster: Vec<String> = clan.roster().into_iter().map(|m| m.tag).collect();
  assert_eq!(roster, vec!["#M3", "#M1", "#M2"]);
}

#[tokio::test]
async fn unknown_clan_is_not_found_and_creates_nothing() {
  let h = Harness::new().await;
  let err = h.refresher.refresh("#MISSING").await.unwrap_err();
  assert!(matches!(err, clanstats_core::Error::EntityNotFound(_)));
  assert!(!err.is_transient());
  assert!(h.accessor().most_recent("#MISSING").await.unwrap().is_none());
}

#[tokio::test]
async fn nearest_prefers_history_and_fetches_on_miss() {
  let h = Harness::new().await;
  seed_upstream(&h.upstream);
  h.append("#ABC", &[1], t0()).await;

  let found = h.accessor().nearest("#ABC", t0() + TimeDelta::hours(5)).await.unwrap();
  assert_eq!(found.taken_at, t0());
  assert_eq!(h.upstream.calls(), 0);

  let fetched = h.accessor().nearest("#ABC", t0() - TimeDelta::days(3)).await.unwrap();
  assert_eq!(h.upstream.calls(), 1);
  assert!(fetched.taken_at > t0());
  let history = h.accessor().at_or_after("#ABC", t0()).await.unwrap();
  assert_eq!(history.len(), 2);
}

// ─── Corruption isolation ────────────────────────────────────────────────────

#[tokio::test]
async fn corrupt_snapshot_payload_reads_as_absent_heavy_fields() {
  let h = Harness::new().await;
  h.append("#ABC", &[10, 20], t0()).await;
  h.store
    .execute_raw("UPDATE snapshots SET payload = x'00' WHERE tag = '#ABC'")
    .await
    .unwrap();

  let snapshot = h.accessor().most_recent("#ABC").await.unwrap().unwrap();
  assert!(!snapshot.record.contains("players"));
  assert_eq!(snapshot.record.get_i64("members"), Some(2));
  assert_eq!(summarize(&snapshot), Stats::zero());

  let entity = h.refresher.update_calculations("#ABC").await.unwrap();
  assert_eq!(entity.current, Stats::zero());
}

#[tokio::test]
async fn status_rollup_skips_undecodable_entities() {
  let h = Harness::new().await;
  h.append("#GOOD", &[10], t0()).await;
  h.append("#BAD", &[10], t0()).await;
  h.refresher.update_calculations("#GOOD").await.unwrap();
  h.refresher.update_calculations("#BAD").await.unwrap();
  h.store
    .execute_raw("UPDATE entities SET current_stats = 'garbage' WHERE tag = '#BAD'")
    .await
    .unwrap();

  let now = t0() + TimeDelta::hours(1);
  let status = h.refresher.update_status(&StatusConfig::default(), now).await.unwrap();
  assert_eq!(status.total_clans, 1);
  assert_eq!(status.total_active_clans, 1);
  assert_eq!(status.ratio_indexed, 100.0);
  assert_eq!(status.popular_clans, vec!["#GOOD"]);

  assert_eq!(h.store.get_status().await.unwrap(), Some(status));
}

// ─── Status row ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn status_is_replaced_wholesale() {
  let h = Harness::new().await;
  assert!(h.store.get_status().await.unwrap().is_none());

  h.append("#ABC", &[10], t0()).await;
  h.refresher.update_calculations("#ABC").await.unwrap();

  let fresh = h
    .refresher
    .update_status(&StatusConfig::default(), t0() + TimeDelta::hours(1))
    .await
    .unwrap();
  assert_eq!(fresh.total_active_clans, 1);

  let later = h
    .refresher
    .update_status(&StatusConfig::default(), t0() + TimeDelta::days(2))
    .await
    .unwrap();
  assert_eq!(later.total_active_clans, 0);
  assert_eq!(later.total_stale_clans, 1);

  assert_eq!(h.store.get_status().await.unwrap(), Some(later));
}
